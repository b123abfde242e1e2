//! Feedback module - speech and vibration actuators

mod audio;
mod haptic;

pub use audio::{AudioFeedback, CommandSpeechEngine, LogSpeechEngine, SpeechEngine};
pub use haptic::{pattern_for, HapticFeedback, Pulse};

use crate::detection::AlertLevel;

/// Queue position of a spoken message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    /// Spoken next, ahead of anything already queued
    Urgent,
}

/// Spoken output
pub trait SpeechOutput: Send + Sync {
    fn speak(&self, text: &str, priority: Priority);

    /// Drop every message not yet spoken
    fn stop_all(&self);

    fn cleanup(&self) {
        self.stop_all();
    }
}

/// Vibration output
pub trait HapticOutput: Send + Sync {
    /// Play the pattern for `level`, interrupting any running one
    fn vibrate(&self, level: AlertLevel);

    fn stop(&self);

    fn cleanup(&self) {
        self.stop();
    }
}
