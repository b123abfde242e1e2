//! Core module - orchestration, event fan-out and thread plumbing

mod app;
mod engine;
mod event_bus;
mod worker;

pub use app::Application;
pub use engine::{Peripherals, System, SystemHandle, SystemSettings};
pub use event_bus::{DistanceUpdate, Event, EventBus, EventSink, ObjectsUpdate};
pub use worker::{StopSignal, StopToken, Worker};

use serde::{Deserialize, Serialize};

/// Snapshot reported by `get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub system_running: bool,
    pub camera_enabled: bool,
    pub detection_enabled: bool,
    /// Last measured distance in cm
    pub last_distance: Option<f64>,
    /// Battery charge in percent, when the board reports one
    pub battery_level: Option<u8>,
    /// Unix time in seconds
    pub timestamp: f64,
}
