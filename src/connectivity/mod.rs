//! Connectivity module - command/telemetry transports for the companion phone

mod framing;
mod session;
mod server;
mod tcp;

#[cfg(feature = "serial")]
mod serial;

#[cfg(target_os = "linux")]
mod bluetooth;

pub use framing::{FrameDecoder, Framing};
pub use session::{
    Command, CommandEnvelope, CommandSessionFactory, CommandTable, CommandTarget, FrameObserver, ResponseEnvelope,
    ResponseStatus, TransportSession,
};
pub use server::{ServerSettings, Session, SessionFactory, TransportServer};
pub use tcp::{TcpConnListener, TcpEndpoint};

#[cfg(feature = "serial")]
pub use serial::{detect_serial_port, SerialConnection, SerialEndpoint, SerialListener};

#[cfg(target_os = "linux")]
pub use bluetooth::{RfcommEndpoint, RfcommListener, RfcommStream};

use std::io::{self, Read, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connectivity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Accept and read poll period
    pub poll_interval_ms: u64,

    /// Budget for joining transport threads on stop
    pub shutdown_timeout_secs: u64,

    /// Bluetooth RFCOMM server
    pub bluetooth: BluetoothConfig,

    /// USB / UART serial line
    pub serial: SerialConfig,

    /// Newline-delimited TCP server
    pub tcp: TcpConfig,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            shutdown_timeout_secs: 5,
            bluetooth: BluetoothConfig::default(),
            serial: SerialConfig::default(),
            tcp: TcpConfig::default(),
        }
    }
}

impl ConnectivityConfig {
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            ..ServerSettings::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub enabled: bool,

    /// Name shown to the phone when pairing
    pub device_name: String,

    /// RFCOMM channel to listen on
    pub channel: u8,

    /// Drop a client silent for this long
    pub read_timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_name: "GuideCane".to_string(),
            channel: 1,
            read_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub enabled: bool,

    /// Device path; auto-detected when absent
    pub port: Option<String>,

    pub baud_rate: u32,

    /// Probe for a port when none is configured
    pub auto_detect: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: None,
            baud_rate: 115_200,
            auto_detect: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub read_timeout_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0".to_string(),
            port: 8765,
            read_timeout_secs: 60,
        }
    }
}

/// A byte stream to one peer
pub trait Connection: Read + Write + Send + 'static {
    /// Second handle on the same stream, used as the writer
    fn try_clone_conn(&self) -> io::Result<Self>
    where
        Self: Sized;

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Unblock pending reads on every handle of this stream
    fn shutdown(&self) {}
}

/// Non-blocking accept side of a transport
pub trait Listener: Send + 'static {
    type Conn: Connection;

    /// A new peer and its client id, or `None` when nobody is waiting
    fn accept(&mut self) -> io::Result<Option<(Self::Conn, String)>>;
}

/// Something a [`TransportServer`] can listen on
pub trait Endpoint: Send + Sync + 'static {
    type Listener: Listener;

    fn bind(&self) -> io::Result<Self::Listener>;

    /// Human readable address for logs
    fn describe(&self) -> String;

    fn framing(&self) -> Framing;

    /// Idle limit per client; `None` keeps silent clients forever
    fn read_timeout(&self) -> Option<Duration>;
}
