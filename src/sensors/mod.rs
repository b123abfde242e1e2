//! Sensor module - hardware interfaces and simulations

mod traits;
mod ultrasonic;
mod gpio;
mod camera;
mod battery;
mod simulator;

pub use traits::{unix_seconds, Clock, DistanceReading, DistanceSample, EchoPhase, Gpio, Level, SystemClock};
pub use ultrasonic::{pulse_to_distance_cm, RangeFinder, RangeFinderConfig, RangingState, HALF_SPEED_OF_SOUND_CM_PER_S};
pub use gpio::SysfsGpio;
pub use camera::{Camera, CommandCamera, Frame};
pub use battery::battery_level;
pub use simulator::{SimulatedCamera, SimulatedGpio};
