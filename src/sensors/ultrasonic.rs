// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! HC-SR04 style ultrasonic range finder

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use super::{Clock, DistanceSample, EchoPhase, Gpio, Level};
use crate::config::{GpioConfig, UltrasonicConfig};
use crate::Result;

/// Half the speed of sound in cm/s (round trip)
pub const HALF_SPEED_OF_SOUND_CM_PER_S: f64 = 17_150.0;

/// Position in the trigger/echo cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangingState {
    Idle,
    Triggering,
    AwaitEchoRise,
    AwaitEchoFall,
    Computed,
}

/// Timing parameters for one measurement
#[derive(Debug, Clone)]
pub struct RangeFinderConfig {
    pub trig_pin: u8,
    pub echo_pin: u8,
    pub max_distance_cm: f64,
    pub echo_timeout: Duration,
    pub settle: Duration,
    pub trigger_pulse: Duration,
}

impl RangeFinderConfig {
    pub fn from_config(gpio: &GpioConfig, ultrasonic: &UltrasonicConfig) -> Self {
        Self {
            trig_pin: gpio.trig_pin,
            echo_pin: gpio.echo_pin,
            max_distance_cm: ultrasonic.max_distance_cm,
            echo_timeout: Duration::from_millis(ultrasonic.echo_timeout_ms),
            settle: Duration::from_millis(ultrasonic.settle_ms),
            trigger_pulse: Duration::from_micros(ultrasonic.trigger_pulse_us),
        }
    }
}

/// Drives the trigger line and times the echo pulse
pub struct RangeFinder {
    gpio: Arc<dyn Gpio>,
    clock: Arc<dyn Clock>,
    config: RangeFinderConfig,
    state: RangingState,
    last_sample: Option<DistanceSample>,
}

impl RangeFinder {
    /// Configure the pins and leave the trigger low
    pub fn new(gpio: Arc<dyn Gpio>, clock: Arc<dyn Clock>, config: RangeFinderConfig) -> Result<Self> {
        gpio.setup_output(config.trig_pin)?;
        gpio.setup_input(config.echo_pin)?;
        gpio.set_output(config.trig_pin, Level::Low)?;

        info!(
            "Ultrasonic sensor ready (trig: {}, echo: {}, max: {} cm)",
            config.trig_pin, config.echo_pin, config.max_distance_cm
        );

        Ok(Self {
            gpio,
            clock,
            config,
            state: RangingState::Idle,
            last_sample: None,
        })
    }

    pub fn state(&self) -> RangingState {
        self.state
    }

    pub fn last_sample(&self) -> Option<DistanceSample> {
        self.last_sample
    }

    pub fn max_distance_cm(&self) -> f64 {
        self.config.max_distance_cm
    }

    /// Run one trigger/echo cycle.
    ///
    /// Blocks for at most two echo timeouts plus the settle time. Errors are
    /// GPIO failures only; a missing echo is a [`DistanceSample::Timeout`].
    pub fn sample(&mut self) -> Result<DistanceSample> {
        let result = self.measure();
        self.state = RangingState::Idle;
        if let Ok(sample) = result {
            self.last_sample = Some(sample);
        }
        result
    }

    fn measure(&mut self) -> Result<DistanceSample> {
        let trig = self.config.trig_pin;
        let echo = self.config.echo_pin;

        self.transition(RangingState::Triggering);
        self.gpio.set_output(trig, Level::Low)?;
        self.clock.sleep(self.config.settle);
        self.gpio.set_output(trig, Level::High)?;
        self.clock.sleep(self.config.trigger_pulse);
        self.gpio.set_output(trig, Level::Low)?;

        self.transition(RangingState::AwaitEchoRise);
        let rise = match self.wait_for(echo, Level::High)? {
            Some(at) => at,
            None => {
                debug!("Timeout waiting for echo start");
                return Ok(DistanceSample::Timeout { phase: EchoPhase::Rise });
            }
        };

        self.transition(RangingState::AwaitEchoFall);
        let fall = match self.wait_for(echo, Level::Low)? {
            Some(at) => at,
            None => {
                debug!("Timeout waiting for echo end");
                return Ok(DistanceSample::Timeout { phase: EchoPhase::Fall });
            }
        };

        self.transition(RangingState::Computed);
        let pulse = fall.saturating_sub(rise);
        let distance = pulse_to_distance_cm(pulse, self.config.max_distance_cm);
        trace!("Echo pulse {:?} -> {} cm", pulse, distance);
        Ok(DistanceSample::distance(distance))
    }

    /// Poll `pin` until it reads `level`; returns the time it was seen
    fn wait_for(&self, pin: u8, level: Level) -> Result<Option<Duration>> {
        let started = self.clock.now();
        loop {
            let seen = self.gpio.read_input(pin)?;
            let now = self.clock.now();
            if seen == level {
                return Ok(Some(now));
            }
            if now.saturating_sub(started) > self.config.echo_timeout {
                return Ok(None);
            }
        }
    }

    fn transition(&mut self, next: RangingState) {
        trace!("Ranging {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Convert an echo pulse width to centimetres, rounded to 2 decimals and
/// clamped to `max_cm`.
pub fn pulse_to_distance_cm(pulse: Duration, max_cm: f64) -> f64 {
    let raw = pulse.as_secs_f64() * HALF_SPEED_OF_SOUND_CM_PER_S;
    let rounded = (raw * 100.0).round() / 100.0;
    if rounded > max_cm {
        debug!("Measured distance ({} cm) above max ({} cm)", rounded, max_cm);
        max_cm
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Virtual clock plus GPIO that answers an echo pulse relative to the
    /// trigger's falling edge. Every input read advances time by `step`.
    struct EchoBench {
        now: Mutex<Duration>,
        step: Duration,
        echo_delay: Duration,
        pulse: Option<Duration>,
        trigger_fell_at: Mutex<Option<Duration>>,
        trig_level: Mutex<Level>,
        writes: Mutex<Vec<(u8, Level)>>,
    }

    impl EchoBench {
        fn new(pulse: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Duration::ZERO),
                step: Duration::from_micros(5),
                echo_delay: Duration::from_micros(400),
                pulse,
                trigger_fell_at: Mutex::new(None),
                trig_level: Mutex::new(Level::Low),
                writes: Mutex::new(Vec::new()),
            })
        }
    }

    impl Gpio for EchoBench {
        fn setup_output(&self, _pin: u8) -> Result<()> {
            Ok(())
        }

        fn setup_input(&self, _pin: u8) -> Result<()> {
            Ok(())
        }

        fn set_output(&self, pin: u8, level: Level) -> Result<()> {
            self.writes.lock().push((pin, level));
            let mut trig = self.trig_level.lock();
            if *trig == Level::High && level == Level::Low {
                *self.trigger_fell_at.lock() = Some(*self.now.lock());
            }
            *trig = level;
            Ok(())
        }

        fn read_input(&self, _pin: u8) -> Result<Level> {
            let mut now = self.now.lock();
            let level = match (*self.trigger_fell_at.lock(), self.pulse) {
                (Some(fell), Some(pulse)) => {
                    let start = fell + self.echo_delay;
                    if *now >= start && *now < start + pulse {
                        Level::High
                    } else {
                        Level::Low
                    }
                }
                _ => Level::Low,
            };
            *now += self.step;
            Ok(level)
        }
    }

    impl Clock for EchoBench {
        fn now(&self) -> Duration {
            *self.now.lock()
        }

        fn sleep(&self, duration: Duration) {
            *self.now.lock() += duration;
        }
    }

    fn finder(bench: &Arc<EchoBench>, max_cm: f64) -> RangeFinder {
        let config = RangeFinderConfig {
            trig_pin: 23,
            echo_pin: 24,
            max_distance_cm: max_cm,
            echo_timeout: Duration::from_millis(100),
            settle: Duration::from_millis(10),
            trigger_pulse: Duration::from_micros(10),
        };
        RangeFinder::new(bench.clone(), bench.clone(), config).unwrap()
    }

    #[test]
    fn test_fifty_centimetre_echo() {
        let bench = EchoBench::new(Some(Duration::from_secs_f64(0.00292)));
        let mut sensor = finder(&bench, 200.0);

        let sample = sensor.sample().unwrap();
        let distance = sample.distance_cm().expect("expected a distance");
        assert!((distance - 50.0).abs() <= 0.5, "got {}", distance);
        assert_eq!(sensor.state(), RangingState::Idle);

        let writes = bench.writes.lock();
        assert!(writes.contains(&(23, Level::High)));
        assert!(writes.contains(&(23, Level::Low)));
    }

    #[test]
    fn test_far_echo_clamped_to_max() {
        let bench = EchoBench::new(Some(Duration::from_secs_f64(0.0292)));
        let mut sensor = finder(&bench, 200.0);

        let sample = sensor.sample().unwrap();
        assert_eq!(sample.distance_cm(), Some(200.0));
    }

    #[test]
    fn test_silent_echo_times_out() {
        let bench = EchoBench::new(None);
        let mut sensor = finder(&bench, 200.0);

        let sample = sensor.sample().unwrap();
        assert_eq!(sample, DistanceSample::Timeout { phase: EchoPhase::Rise });
        assert!(sensor.last_sample().unwrap().is_timeout());
        // Bounded by the phase budget plus settle and pulse time
        assert!(bench.now() < Duration::from_millis(120));
    }

    #[test]
    fn test_stuck_high_echo_times_out_in_fall_phase() {
        let bench = EchoBench::new(Some(Duration::from_secs(1)));
        let mut sensor = finder(&bench, 200.0);

        let sample = sensor.sample().unwrap();
        assert_eq!(sample, DistanceSample::Timeout { phase: EchoPhase::Fall });
    }

    #[test]
    fn test_pulse_conversion_rounds_to_two_decimals() {
        let d = pulse_to_distance_cm(Duration::from_micros(1000), 300.0);
        assert_eq!(d, 17.15);
        assert_eq!(pulse_to_distance_cm(Duration::from_secs(1), 300.0), 300.0);
    }
}
