// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Alert arbitration: thresholds, hysteresis and telemetry cadence

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AlertConfig;
use crate::sensors::DistanceSample;
use crate::{Error, Result};

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Danger,
}

/// Distance thresholds, strictly ordered `danger < warning < max`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    danger_cm: f64,
    warning_cm: f64,
    max_cm: f64,
}

impl Thresholds {
    pub fn new(danger_cm: f64, warning_cm: f64, max_cm: f64) -> Result<Self> {
        let finite = danger_cm.is_finite() && warning_cm.is_finite() && max_cm.is_finite();
        if !finite || danger_cm <= 0.0 || danger_cm >= warning_cm || warning_cm >= max_cm {
            return Err(Error::InvalidConfig(format!(
                "thresholds must satisfy 0 < danger ({}) < warning ({}) < max ({})",
                danger_cm, warning_cm, max_cm
            )));
        }
        Ok(Self {
            danger_cm,
            warning_cm,
            max_cm,
        })
    }

    pub fn danger_cm(&self) -> f64 {
        self.danger_cm
    }

    pub fn warning_cm(&self) -> f64 {
        self.warning_cm
    }

    pub fn max_cm(&self) -> f64 {
        self.max_cm
    }

    /// Distance alert level; `None` at or beyond the warning distance
    pub fn level_for(&self, distance_cm: f64) -> Option<AlertLevel> {
        if distance_cm < self.danger_cm {
            Some(AlertLevel::Danger)
        } else if distance_cm < self.warning_cm {
            Some(AlertLevel::Warning)
        } else {
            None
        }
    }
}

/// An alert the user should hear and feel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub level: AlertLevel,
    pub distance_cm: f64,
}

#[derive(Debug, Clone, Default)]
struct AlertState {
    last_distance: Option<f64>,
    last_alert_emitted_at: Option<Instant>,
    last_broadcast_at: Option<Instant>,
}

/// Period from seconds; unrepresentable values fall back to `default_secs`
fn interval(secs: f64, default_secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
        warn!("Invalid alert interval {}s, using {}s", secs, default_secs);
        Duration::from_secs_f64(default_secs)
    })
}

/// Turns a distance stream into user alerts and telemetry ticks.
///
/// Alerts are rate limited: after one is emitted, the next needs either a
/// distance change above `change_threshold_cm` or `min_alert_interval` of
/// silence. Telemetry ticks run on their own timer and ignore that gate.
pub struct AlertPolicy {
    thresholds: Thresholds,
    change_threshold_cm: f64,
    min_alert_interval: Duration,
    broadcast_interval: Duration,
    state: AlertState,
}

impl AlertPolicy {
    pub fn new(thresholds: Thresholds, config: &AlertConfig) -> Self {
        Self {
            thresholds,
            change_threshold_cm: config.change_threshold_cm,
            min_alert_interval: interval(config.min_alert_interval_secs, AlertConfig::default().min_alert_interval_secs),
            broadcast_interval: interval(config.broadcast_interval_secs, AlertConfig::default().broadcast_interval_secs),
            state: AlertState::default(),
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Decide whether `sample` warrants a user alert at `now`
    pub fn classify(&mut self, sample: &DistanceSample, now: Instant) -> Option<AlertEvent> {
        let distance = sample.distance_cm()?;
        let level = self.thresholds.level_for(distance)?;

        let state = &self.state;
        let due = match (state.last_distance, state.last_alert_emitted_at) {
            (Some(last), Some(emitted_at)) => {
                (distance - last).abs() > self.change_threshold_cm
                    || now.saturating_duration_since(emitted_at) > self.min_alert_interval
            }
            _ => true,
        };
        if !due {
            return None;
        }

        self.state.last_distance = Some(distance);
        self.state.last_alert_emitted_at = Some(now);
        Some(AlertEvent {
            level,
            distance_cm: distance,
        })
    }

    /// Whether a telemetry broadcast is due for `sample` at `now`
    pub fn broadcast_tick(&mut self, sample: &DistanceSample, now: Instant) -> bool {
        if sample.is_timeout() {
            return false;
        }
        let due = match self.state.last_broadcast_at {
            Some(at) => now.saturating_duration_since(at) >= self.broadcast_interval,
            None => true,
        };
        if due {
            self.state.last_broadcast_at = Some(now);
        }
        due
    }

    /// Forget all history, as after a restart
    pub fn reset(&mut self) {
        self.state = AlertState::default();
    }
}
