// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! guidecane - smart white cane controller
//!
//! Measures the distance to obstacles, announces them by voice and
//! vibration, describes objects seen by the camera and talks to a companion
//! phone over Bluetooth, a serial line or TCP.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use guidecane::{build_info, Application, Config, VERSION};

/// guidecane - smart white cane controller
#[derive(Parser, Debug)]
#[command(name = "guidecane")]
#[command(author = "guidecane contributors")]
#[command(version = VERSION)]
#[command(about = "Obstacle alerts, object announcements and phone connectivity for a smart white cane")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Run on simulated hardware
    #[arg(long, visible_alias = "no-hardware")]
    demo: bool,

    /// Enable the Bluetooth RFCOMM server
    #[arg(long)]
    bluetooth: bool,

    /// Enable the USB serial link
    #[arg(long)]
    usb: bool,

    /// Serial device for the USB link (auto-detected otherwise)
    #[arg(long)]
    serial_port: Option<PathBuf>,

    /// Enable the TCP server on this port
    #[arg(long)]
    tcp_port: Option<u16>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if self.demo {
            config.demo_mode = true;
        }
        let connectivity = &mut config.connectivity;
        if self.bluetooth {
            connectivity.bluetooth.enabled = true;
        }
        if self.usb {
            connectivity.serial.enabled = true;
        }
        if let Some(ref port) = self.serial_port {
            connectivity.serial.enabled = true;
            connectivity.serial.port = Some(port.display().to_string());
        }
        if let Some(port) = self.tcp_port {
            connectivity.tcp.enabled = true;
            connectivity.tcp.port = port;
        }
    }

    /// Log filter: RUST_LOG, then the CLI flags, then the config file
    fn env_filter(&self, config_level: &str) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
        let level = if self.trace {
            "trace"
        } else if self.debug {
            "debug"
        } else {
            config_level
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;
    args.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(args.env_filter(&config.log_level))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug || args.trace)
        .with_line_number(args.debug || args.trace)
        .init();

    let build = build_info();
    info!("guidecane v{} ({}/{}, features: {:?})", VERSION, build.os, build.target, build.features);
    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let app = Application::build(&config)?;
    app.start();

    info!("Running. Press Ctrl+C to stop");
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(tokio::signal::ctrl_c())?;

    info!("Shutdown signal received, cleaning up...");
    app.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "guidecane",
            "--no-hardware",
            "--serial-port",
            "/dev/ttyACM1",
            "--tcp-port",
            "9000",
        ]);
        let mut config = Config::default();
        config.connectivity.serial.enabled = false;
        args.apply(&mut config);

        assert!(config.demo_mode);
        assert!(config.connectivity.serial.enabled);
        assert_eq!(config.connectivity.serial.port.as_deref(), Some("/dev/ttyACM1"));
        assert!(config.connectivity.tcp.enabled);
        assert_eq!(config.connectivity.tcp.port, 9000);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let args = Args::parse_from(["guidecane"]);
        let mut config = Config::default();
        config.connectivity.bluetooth.enabled = false;
        args.apply(&mut config);

        assert!(!config.demo_mode);
        assert!(!config.connectivity.bluetooth.enabled);
        assert!(!config.connectivity.tcp.enabled);
    }
}
