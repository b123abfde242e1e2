// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Vibration motor patterns

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::HapticOutput;
use crate::config::HapticConfig;
use crate::core::{StopSignal, Worker};
use crate::detection::AlertLevel;
use crate::sensors::{Gpio, Level};
use crate::Result;

/// One motor activation followed by a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub on: Duration,
    pub off: Duration,
}

impl Pulse {
    const fn ms(on: u64, off: u64) -> Self {
        Self {
            on: Duration::from_millis(on),
            off: Duration::from_millis(off),
        }
    }
}

/// Pulse train for an alert level
pub fn pattern_for(level: AlertLevel, info_duration: Duration) -> Vec<Pulse> {
    match level {
        AlertLevel::Info => vec![Pulse {
            on: info_duration,
            off: Duration::ZERO,
        }],
        AlertLevel::Warning => vec![Pulse::ms(200, 200), Pulse::ms(200, 200)],
        AlertLevel::Danger => vec![Pulse::ms(500, 100), Pulse::ms(500, 100), Pulse::ms(500, 500)],
    }
}

struct RunningPattern {
    stop: StopSignal,
    worker: Worker,
}

/// Vibration motor on a GPIO output
pub struct HapticFeedback {
    gpio: Arc<dyn Gpio>,
    pin: u8,
    enabled: bool,
    info_duration: Duration,
    running: Mutex<Option<RunningPattern>>,
}

impl HapticFeedback {
    pub fn new(gpio: Arc<dyn Gpio>, pin: u8, config: &HapticConfig) -> Result<Self> {
        if config.enabled {
            gpio.setup_output(pin)?;
            info!("Vibration motor on GPIO {}", pin);
        }
        Ok(Self {
            gpio,
            pin,
            enabled: config.enabled,
            info_duration: Duration::from_millis(config.info_duration_ms),
            running: Mutex::new(None),
        })
    }

    /// A pattern is still playing
    pub fn is_active(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|p| !p.worker.is_finished())
            .unwrap_or(false)
    }

    fn interrupt(&self) {
        let previous = self.running.lock().take();
        if let Some(previous) = previous {
            previous.stop.trigger();
            previous.worker.join_timeout(Duration::from_millis(500));
        }
    }

    fn motor(&self, level: Level) {
        if let Err(e) = self.gpio.set_output(self.pin, level) {
            warn!("Vibration motor write failed: {}", e);
        }
    }
}

impl HapticOutput for HapticFeedback {
    fn vibrate(&self, level: AlertLevel) {
        if !self.enabled {
            return;
        }
        self.interrupt();

        let pattern = pattern_for(level, self.info_duration);
        let stop = StopSignal::new();
        let token = stop.token();
        let gpio = self.gpio.clone();
        let pin = self.pin;

        let spawned = Worker::spawn("haptic", move || {
            for pulse in pattern {
                let _ = gpio.set_output(pin, Level::High);
                let stopped = token.wait(pulse.on);
                let _ = gpio.set_output(pin, Level::Low);
                if stopped || token.wait(pulse.off) {
                    debug!("Vibration pattern interrupted");
                    return;
                }
            }
        });

        match spawned {
            Ok(worker) => *self.running.lock() = Some(RunningPattern { stop, worker }),
            Err(e) => warn!("Failed to start vibration pattern: {}", e),
        }
    }

    fn stop(&self) {
        if !self.enabled {
            return;
        }
        self.interrupt();
        self.motor(Level::Low);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingGpio {
        writes: Mutex<Vec<(u8, Level)>>,
    }

    impl RecordingGpio {
        fn highs(&self) -> usize {
            self.writes.lock().iter().filter(|(_, l)| l.is_high()).count()
        }

        fn last(&self) -> Option<(u8, Level)> {
            self.writes.lock().last().copied()
        }
    }

    impl Gpio for RecordingGpio {
        fn setup_output(&self, pin: u8) -> Result<()> {
            self.writes.lock().push((pin, Level::Low));
            Ok(())
        }

        fn setup_input(&self, _pin: u8) -> Result<()> {
            Ok(())
        }

        fn set_output(&self, pin: u8, level: Level) -> Result<()> {
            self.writes.lock().push((pin, level));
            Ok(())
        }

        fn read_input(&self, _pin: u8) -> Result<Level> {
            Ok(Level::Low)
        }
    }

    fn wait_done(haptic: &HapticFeedback) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while haptic.is_active() {
            assert!(Instant::now() < deadline, "pattern never finished");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_patterns() {
        let info = Duration::from_millis(300);
        assert_eq!(pattern_for(AlertLevel::Warning, info).len(), 2);
        assert_eq!(pattern_for(AlertLevel::Danger, info)[2], Pulse::ms(500, 500));
        assert_eq!(pattern_for(AlertLevel::Info, info), vec![Pulse::ms(300, 0)]);
    }

    #[test]
    fn test_warning_pattern_drives_pin() {
        let gpio = Arc::new(RecordingGpio::default());
        let haptic = HapticFeedback::new(gpio.clone(), 18, &HapticConfig::default()).unwrap();

        haptic.vibrate(AlertLevel::Warning);
        wait_done(&haptic);

        assert_eq!(gpio.highs(), 2);
        assert_eq!(gpio.last(), Some((18, Level::Low)));
    }

    #[test]
    fn test_new_pattern_interrupts_running_one() {
        let gpio = Arc::new(RecordingGpio::default());
        let haptic = HapticFeedback::new(gpio.clone(), 18, &HapticConfig::default()).unwrap();

        let started = Instant::now();
        haptic.vibrate(AlertLevel::Danger);
        std::thread::sleep(Duration::from_millis(50));
        haptic.vibrate(AlertLevel::Info);
        wait_done(&haptic);

        // One pulse from the interrupted danger pattern, one info pulse
        assert_eq!(gpio.highs(), 2);
        assert_eq!(gpio.last(), Some((18, Level::Low)));
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[test]
    fn test_stop_drives_motor_low() {
        let gpio = Arc::new(RecordingGpio::default());
        let haptic = HapticFeedback::new(gpio.clone(), 18, &HapticConfig::default()).unwrap();

        haptic.vibrate(AlertLevel::Danger);
        haptic.stop();
        assert!(!haptic.is_active());
        assert_eq!(gpio.last(), Some((18, Level::Low)));
    }

    #[test]
    fn test_disabled_motor_ignores_requests() {
        let gpio = Arc::new(RecordingGpio::default());
        let config = HapticConfig {
            enabled: false,
            ..HapticConfig::default()
        };
        let haptic = HapticFeedback::new(gpio.clone(), 18, &config).unwrap();
        haptic.vibrate(AlertLevel::Danger);
        haptic.stop();
        assert!(gpio.writes.lock().is_empty());
    }
}
