// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! guidecane - smart white cane controller
//!
//! Runs on a small Linux board fitted to a white cane:
//! - ultrasonic ranging with spoken and vibrating obstacle alerts
//! - periodic object detection announced in French
//! - a JSON command protocol for a companion phone over Bluetooth RFCOMM,
//!   a serial line or TCP, with pushed distance and object telemetry
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         System                           │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌────────────────┐  │
//! │  │ RangeFinder │ → │ AlertPolicy │ → │ Speech/Haptic  │  │
//! │  └─────────────┘   └─────────────┘   └────────────────┘  │
//! │  ┌─────────────┐          ↓                              │
//! │  │   Vision    │ → ┌──────────────────────────────────┐  │
//! │  └─────────────┘   │            Event Bus             │  │
//! │                    └──────────────────────────────────┘  │
//! │                       ↓             ↓            ↓       │
//! │               ┌───────────┐  ┌──────────┐  ┌─────────┐   │
//! │               │ Bluetooth │  │  Serial  │  │   TCP   │   │
//! │               └───────────┘  └──────────┘  └─────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod connectivity;
pub mod core;
pub mod detection;
pub mod error;
pub mod feedback;
pub mod sensors;

pub use crate::core::{Application, EventBus, System, SystemStatus};
pub use config::Config;
pub use error::{Error, Result};

/// guidecane version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: String,
    pub target: String,
    pub os: String,
    pub features: Vec<String>,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION.to_string(),
        target: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
        features: enabled_features(),
    }
}

fn enabled_features() -> Vec<String> {
    let mut features = vec![];

    #[cfg(feature = "serial")]
    features.push("serial".to_string());

    #[cfg(target_os = "linux")]
    features.push("bluetooth".to_string());

    features
}
