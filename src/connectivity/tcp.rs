// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Newline-delimited TCP transport

use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::{Connection, Endpoint, Framing, Listener, TcpConfig};

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

impl Connection for TcpStream {
    fn try_clone_conn(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        TcpStream::set_read_timeout(self, Some(timeout))
    }

    fn shutdown(&self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }
}

pub struct TcpConnListener {
    listener: TcpListener,
}

impl Listener for TcpConnListener {
    type Conn = TcpStream;

    fn accept(&mut self) -> io::Result<Option<(TcpStream, String)>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
                let _ = stream.set_nodelay(true);
                Ok(Some((stream, peer.to_string())))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// TCP address clients connect to
pub struct TcpEndpoint {
    addr: String,
    read_timeout: Option<Duration>,
    prebound: Mutex<Option<TcpListener>>,
}

impl TcpEndpoint {
    pub fn new(config: &TcpConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.bind_address, config.port),
            read_timeout: (config.read_timeout_secs > 0).then(|| Duration::from_secs(config.read_timeout_secs)),
            prebound: Mutex::new(None),
        }
    }

    /// Serve on an already bound socket (port 0 in tests)
    pub fn from_listener(listener: TcpListener, read_timeout: Option<Duration>) -> io::Result<Self> {
        let addr = listener.local_addr()?.to_string();
        Ok(Self {
            addr,
            read_timeout,
            prebound: Mutex::new(Some(listener)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.addr
            .parse()
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, format!("{}: {}", self.addr, e)))
    }
}

impl Endpoint for TcpEndpoint {
    type Listener = TcpConnListener;

    fn bind(&self) -> io::Result<TcpConnListener> {
        let listener = match self.prebound.lock().take() {
            Some(listener) => listener,
            None => TcpListener::bind(&self.addr)?,
        };
        listener.set_nonblocking(true)?;
        debug!("TCP socket bound on {}", self.addr);
        Ok(TcpConnListener { listener })
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    fn framing(&self) -> Framing {
        Framing::NewlineDelimited
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }
}
