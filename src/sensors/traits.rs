// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Hardware abstractions and sample types

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Logic level of a GPIO line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

/// Digital I/O handle.
///
/// One instance is owned by the application and shared by the range finder
/// and the haptic actuator; there is no process-wide pin mode.
pub trait Gpio: Send + Sync {
    /// Configure `pin` as an output driven low
    fn setup_output(&self, pin: u8) -> Result<()>;

    /// Configure `pin` as an input
    fn setup_input(&self, pin: u8) -> Result<()>;

    fn set_output(&self, pin: u8, level: Level) -> Result<()>;

    fn read_input(&self, pin: u8) -> Result<Level>;

    /// Drive outputs low and give the pins back to the system
    fn release(&self) {}
}

/// Monotonic time source used by timing-sensitive code
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        // thread::sleep overshoots badly for microsecond pulses
        if duration < Duration::from_millis(1) {
            let start = Instant::now();
            while start.elapsed() < duration {
                std::hint::spin_loop();
            }
        } else {
            std::thread::sleep(duration);
        }
    }
}

/// Polling phase in which an echo timeout happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EchoPhase {
    /// No echo at all: sensor disconnected or nothing in hardware range
    Rise,
    /// Echo never ended: object at or beyond maximum range
    Fall,
}

/// One distance measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceReading {
    pub distance_cm: f64,
    pub measured_at: DateTime<Utc>,
}

/// Outcome of one ranging cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DistanceSample {
    Distance(DistanceReading),
    Timeout { phase: EchoPhase },
}

impl DistanceSample {
    pub fn distance(distance_cm: f64) -> Self {
        DistanceSample::Distance(DistanceReading {
            distance_cm,
            measured_at: Utc::now(),
        })
    }

    pub fn distance_cm(&self) -> Option<f64> {
        match self {
            DistanceSample::Distance(reading) => Some(reading.distance_cm),
            DistanceSample::Timeout { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DistanceSample::Timeout { .. })
    }
}

/// Unix timestamp in fractional seconds, as sent to clients
pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
