// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Simulated hardware for demo mode

use std::collections::HashMap;
use std::time::{Duration, Instant};

use image::RgbImage;
use parking_lot::Mutex;
use rand::prelude::*;
use rand_distr::Normal;
use tracing::{debug, info};

use super::camera::{Camera, Frame};
use super::ultrasonic::HALF_SPEED_OF_SOUND_CM_PER_S;
use super::{Gpio, Level};
use crate::Result;

/// Delay between the trigger's falling edge and the echo rising
const ECHO_LATENCY: Duration = Duration::from_micros(450);

struct ObstacleWalk {
    rng: StdRng,
    distance_cm: f64,
    noise: Normal<f64>,
    dropout_probability: f64,
}

impl ObstacleWalk {
    fn next_pulse(&mut self) -> Option<Duration> {
        if self.rng.gen::<f64>() < self.dropout_probability {
            return None;
        }

        // Mostly slow drift, sometimes someone steps in front of the cane
        if self.rng.gen::<f64>() < 0.05 {
            self.distance_cm = self.rng.gen_range(20.0..120.0);
        } else {
            self.distance_cm += self.rng.sample(self.noise);
        }
        self.distance_cm = self.distance_cm.clamp(5.0, 400.0);

        Some(Duration::from_secs_f64(self.distance_cm / HALF_SPEED_OF_SOUND_CM_PER_S))
    }
}

struct EchoWindow {
    start: Instant,
    end: Instant,
}

/// GPIO lines answered in real time by a random-walk obstacle model
pub struct SimulatedGpio {
    trig_pin: u8,
    echo_pin: u8,
    walk: Mutex<ObstacleWalk>,
    outputs: Mutex<HashMap<u8, Level>>,
    echo: Mutex<Option<EchoWindow>>,
}

impl SimulatedGpio {
    pub fn new(trig_pin: u8, echo_pin: u8) -> Self {
        info!("Using simulated GPIO (trig: {}, echo: {})", trig_pin, echo_pin);
        Self {
            trig_pin,
            echo_pin,
            walk: Mutex::new(ObstacleWalk {
                rng: StdRng::from_entropy(),
                distance_cm: 180.0,
                noise: Normal::new(0.0, 8.0).expect("valid normal parameters"),
                dropout_probability: 0.02,
            }),
            outputs: Mutex::new(HashMap::new()),
            echo: Mutex::new(None),
        }
    }

    /// Current level of an output line
    pub fn output_level(&self, pin: u8) -> Level {
        self.outputs.lock().get(&pin).copied().unwrap_or(Level::Low)
    }
}

impl Gpio for SimulatedGpio {
    fn setup_output(&self, pin: u8) -> Result<()> {
        self.outputs.lock().insert(pin, Level::Low);
        Ok(())
    }

    fn setup_input(&self, _pin: u8) -> Result<()> {
        Ok(())
    }

    fn set_output(&self, pin: u8, level: Level) -> Result<()> {
        let previous = self.outputs.lock().insert(pin, level);
        if pin == self.trig_pin && previous == Some(Level::High) && level == Level::Low {
            let window = self.walk.lock().next_pulse().map(|pulse| {
                let start = Instant::now() + ECHO_LATENCY;
                EchoWindow { start, end: start + pulse }
            });
            *self.echo.lock() = window;
        }
        Ok(())
    }

    fn read_input(&self, pin: u8) -> Result<Level> {
        if pin != self.echo_pin {
            return Ok(Level::Low);
        }
        let now = Instant::now();
        let level = match *self.echo.lock() {
            Some(ref w) if now >= w.start && now < w.end => Level::High,
            _ => Level::Low,
        };
        Ok(level)
    }

    fn release(&self) {
        self.outputs.lock().clear();
        debug!("Simulated GPIO released");
    }
}

/// Camera producing noise frames at the configured resolution
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    rng: StdRng,
    frames: u64,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        info!("Using simulated camera ({}x{})", width, height);
        Self {
            width,
            height,
            rng: StdRng::from_entropy(),
            frames: 0,
        }
    }
}

impl Camera for SimulatedCamera {
    fn capture(&mut self) -> Option<Frame> {
        let mut image = RgbImage::new(self.width, self.height);
        self.rng.fill_bytes(&mut image);
        self.frames += 1;
        Some(Frame::new(image))
    }

    fn release(&mut self) {
        debug!("Simulated camera released after {} frames", self.frames);
    }
}
