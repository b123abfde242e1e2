// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Serial line transport (USB CDC or UART)

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use tracing::{debug, info, warn};

use super::{Connection, Endpoint, Framing, Listener, SerialConfig};

/// Pause between attempts to reopen a missing port
const REOPEN_INTERVAL: Duration = Duration::from_secs(2);

/// Open serial port; every handle shares the listener's liveness marker
pub struct SerialConnection {
    port: Box<dyn SerialPort>,
    _live: Arc<()>,
}

impl Read for SerialConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Connection for SerialConnection {
    fn try_clone_conn(&self) -> io::Result<Self> {
        Ok(Self {
            port: self.port.try_clone()?,
            _live: self._live.clone(),
        })
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }
}

/// Hands out the port as a single client, reopening it once the previous
/// connection is gone
pub struct SerialListener {
    path: String,
    baud_rate: u32,
    live: Arc<()>,
    failures: u32,
    next_attempt: Option<Instant>,
}

impl Listener for SerialListener {
    type Conn = SerialConnection;

    fn accept(&mut self) -> io::Result<Option<(SerialConnection, String)>> {
        if Arc::strong_count(&self.live) > 1 {
            return Ok(None);
        }
        if let Some(at) = self.next_attempt {
            if Instant::now() < at {
                return Ok(None);
            }
        }

        match serialport::new(&self.path, self.baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
        {
            Ok(port) => {
                self.failures = 0;
                self.next_attempt = None;
                info!("Serial port {} open at {} baud", self.path, self.baud_rate);
                let conn = SerialConnection {
                    port,
                    _live: self.live.clone(),
                };
                Ok(Some((conn, self.path.clone())))
            }
            Err(e) => {
                self.failures += 1;
                self.next_attempt = Some(Instant::now() + REOPEN_INTERVAL);
                if self.failures == 1 {
                    Err(io::Error::new(ErrorKind::NotConnected, format!("{}: {}", self.path, e)))
                } else {
                    debug!("Serial port {} still unavailable ({} attempts)", self.path, self.failures);
                    Ok(None)
                }
            }
        }
    }
}

pub struct SerialEndpoint {
    port: Option<String>,
    baud_rate: u32,
    auto_detect: bool,
}

impl SerialEndpoint {
    pub fn new(config: &SerialConfig) -> Self {
        Self {
            port: config.port.clone(),
            baud_rate: config.baud_rate,
            auto_detect: config.auto_detect,
        }
    }

    fn resolve(&self) -> Option<String> {
        match self.port {
            Some(ref port) => Some(port.clone()),
            None if self.auto_detect => detect_serial_port(),
            None => None,
        }
    }
}

impl Endpoint for SerialEndpoint {
    type Listener = SerialListener;

    fn bind(&self) -> io::Result<SerialListener> {
        let path = self
            .resolve()
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no serial port configured or detected"))?;
        Ok(SerialListener {
            path,
            baud_rate: self.baud_rate,
            live: Arc::new(()),
            failures: 0,
            next_attempt: None,
        })
    }

    fn describe(&self) -> String {
        format!("serial://{}", self.port.as_deref().unwrap_or("auto"))
    }

    fn framing(&self) -> Framing {
        Framing::NewlineDelimited
    }

    fn read_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Most likely port for the companion host, USB devices first
pub fn detect_serial_port() -> Option<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Cannot enumerate serial ports: {}", e);
            return None;
        }
    };
    let names: Vec<&str> = ports.iter().map(|p| p.port_name.as_str()).collect();
    debug!("Serial ports: {:?}", names);

    let chosen = select_port(&ports);
    match chosen {
        Some(ref name) => info!("Auto-detected serial port {}", name),
        None => warn!("No serial port available"),
    }
    chosen
}

fn port_rank(info: &SerialPortInfo) -> u8 {
    match info.port_type {
        SerialPortType::UsbPort(_) => 0,
        _ if info.port_name.contains("ttyACM") || info.port_name.contains("ttyUSB") => 1,
        SerialPortType::BluetoothPort => 3,
        _ => 2,
    }
}

fn select_port(ports: &[SerialPortInfo]) -> Option<String> {
    ports
        .iter()
        .min_by_key(|p| port_rank(p))
        .map(|p| p.port_name.clone())
}
