// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Bluetooth RFCOMM transport over raw Linux sockets

use std::io::{self, ErrorKind, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use tracing::debug;

use super::{BluetoothConfig, Connection, Endpoint, Framing, Listener};

const AF_BLUETOOTH: libc::c_int = 31;
const BTPROTO_RFCOMM: libc::c_int = 3;
const LISTEN_BACKLOG: libc::c_int = 1;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// `struct sockaddr_rc` from `<bluetooth/rfcomm.h>`
#[repr(C)]
#[derive(Clone, Copy)]
struct SockaddrRc {
    rc_family: libc::sa_family_t,
    rc_bdaddr: [u8; 6],
    rc_channel: u8,
}

impl SockaddrRc {
    fn any(channel: u8) -> Self {
        Self {
            rc_family: AF_BLUETOOTH as libc::sa_family_t,
            rc_bdaddr: [0; 6],
            rc_channel: channel,
        }
    }
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn set_timeout_opt(fd: &OwnedFd, opt: libc::c_int, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    // SAFETY: fd is open and tv outlives the call
    cvt(unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            opt,
            &tv as *const libc::timeval as *const libc::c_void,
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

/// Peer id: address in the usual big-endian notation plus the channel
fn client_id(bdaddr: [u8; 6], channel: u8) -> String {
    // bdaddr_t is stored little-endian
    let octets: Vec<String> = bdaddr.iter().rev().map(|b| format!("{:02X}", b)).collect();
    format!("{}:{}", octets.join(":"), channel)
}

/// Connected RFCOMM socket
pub struct RfcommStream(OwnedFd);

impl Read for RfcommStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for buf.len() bytes
        let n = unsafe { libc::read(self.0.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

impl Write for RfcommStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for buf.len() bytes
        let n = unsafe { libc::write(self.0.as_raw_fd(), buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for RfcommStream {
    fn try_clone_conn(&self) -> io::Result<Self> {
        Ok(Self(self.0.try_clone()?))
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        set_timeout_opt(&self.0, libc::SO_RCVTIMEO, timeout)
    }

    fn shutdown(&self) {
        // SAFETY: fd is open for the lifetime of self
        unsafe {
            libc::shutdown(self.0.as_raw_fd(), libc::SHUT_RDWR);
        }
    }
}

/// Listening RFCOMM socket in non-blocking mode
pub struct RfcommListener {
    fd: OwnedFd,
}

impl Listener for RfcommListener {
    type Conn = RfcommStream;

    fn accept(&mut self) -> io::Result<Option<(RfcommStream, String)>> {
        let mut addr = SockaddrRc::any(0);
        let mut len = mem::size_of::<SockaddrRc>() as libc::socklen_t;
        // SAFETY: addr and len describe a writable sockaddr_rc
        let ret = unsafe {
            libc::accept4(
                self.fd.as_raw_fd(),
                &mut addr as *mut SockaddrRc as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_CLOEXEC,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                ErrorKind::WouldBlock | ErrorKind::Interrupted => Ok(None),
                _ => Err(err),
            };
        }

        // SAFETY: accept4 returned a new descriptor we now own
        let fd = unsafe { OwnedFd::from_raw_fd(ret) };
        set_timeout_opt(&fd, libc::SO_SNDTIMEO, WRITE_TIMEOUT)?;
        Ok(Some((RfcommStream(fd), client_id(addr.rc_bdaddr, addr.rc_channel))))
    }
}

pub struct RfcommEndpoint {
    channel: u8,
    device_name: String,
    read_timeout: Option<Duration>,
}

impl RfcommEndpoint {
    pub fn new(config: &BluetoothConfig) -> Self {
        Self {
            channel: config.channel,
            device_name: config.device_name.clone(),
            read_timeout: (config.read_timeout_secs > 0).then(|| Duration::from_secs(config.read_timeout_secs)),
        }
    }
}

impl Endpoint for RfcommEndpoint {
    type Listener = RfcommListener;

    fn bind(&self) -> io::Result<RfcommListener> {
        // SAFETY: plain socket creation; the descriptor is owned right away
        let raw = cvt(unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, BTPROTO_RFCOMM) })?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let addr = SockaddrRc::any(self.channel);
        // SAFETY: addr is a valid sockaddr_rc of the given length
        cvt(unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const SockaddrRc as *const libc::sockaddr,
                mem::size_of::<SockaddrRc>() as libc::socklen_t,
            )
        })?;
        cvt(unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) })?;

        let flags = cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) })?;
        cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) })?;

        debug!("RFCOMM socket bound on channel {}", self.channel);
        Ok(RfcommListener { fd })
    }

    fn describe(&self) -> String {
        format!("rfcomm channel {} ({})", self.channel, self.device_name)
    }

    fn framing(&self) -> Framing {
        Framing::MessageBoundary
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_format() {
        let bdaddr = [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA];
        assert_eq!(client_id(bdaddr, 1), "AA:BB:CC:DD:EE:FF:1");
        assert_eq!(client_id([0x01, 0, 0, 0, 0, 0x0a], 12), "0A:00:00:00:00:01:12");
    }

    #[test]
    fn test_sockaddr_layout() {
        assert_eq!(mem::size_of::<SockaddrRc>(), 10);
        let addr = SockaddrRc::any(3);
        assert_eq!(addr.rc_family, 31);
        assert_eq!(addr.rc_channel, 3);
    }

    #[test]
    fn test_endpoint_settings() {
        let endpoint = RfcommEndpoint::new(&BluetoothConfig::default());
        assert_eq!(endpoint.framing(), Framing::MessageBoundary);
        assert_eq!(endpoint.read_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(endpoint.describe(), "rfcomm channel 1 (GuideCane)");
    }
}
