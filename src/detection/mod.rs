//! Detection module - obstacle alerts and object recognition

mod alert;
mod objects;

pub use alert::{AlertEvent, AlertLevel, AlertPolicy, Thresholds};
pub use objects::{
    BoundingBox, CommandDetector, Detection, DetectionResult, ObjectDetector, SimulatedDetector, Vision,
};
