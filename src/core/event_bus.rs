// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Event bus fanning telemetry out to every transport

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::detection::DetectionResult;
use crate::sensors::{unix_seconds, DistanceReading};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceUpdate {
    pub distance: f64,
    pub unit: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectsUpdate {
    pub objects: Vec<String>,
    pub confidence: Vec<f32>,
    pub timestamp: f64,
}

/// Telemetry pushed to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    DistanceUpdate(DistanceUpdate),
    ObjectsUpdate(ObjectsUpdate),
}

impl Event {
    pub fn distance(reading: &DistanceReading) -> Self {
        Event::DistanceUpdate(DistanceUpdate {
            distance: reading.distance_cm,
            unit: "cm".to_string(),
            timestamp: unix_seconds(reading.measured_at),
        })
    }

    pub fn objects(result: &DetectionResult) -> Self {
        Event::ObjectsUpdate(ObjectsUpdate {
            objects: result.labels(),
            confidence: result.confidences(),
            timestamp: unix_seconds(result.detected_at),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::DistanceUpdate(_) => "distance_update",
            Event::ObjectsUpdate(_) => "objects_update",
        }
    }
}

/// A transport that can receive broadcasts
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    /// Begin accepting clients
    fn start(&self) -> Result<()>;

    /// Deliver an encoded event; returns the number of clients reached
    fn publish(&self, payload: &[u8]) -> usize;

    fn client_count(&self) -> usize;

    fn is_listening(&self) -> bool;

    fn stop(&self);
}

/// Central fan-out point for telemetry
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            event_counter: AtomicU64::new(0),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        debug!("Registered event sink '{}'", sink.name());
        self.sinks.write().push(sink);
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Start every sink; returns how many are listening afterwards
    pub fn start_all(&self) -> usize {
        let sinks = self.sinks.read().clone();
        let mut listening = 0;
        for sink in sinks {
            match sink.start() {
                Ok(()) => listening += 1,
                Err(e) => warn!("{} transport unavailable: {}", sink.name(), e),
            }
        }
        listening
    }

    pub fn stop_all(&self) {
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            sink.stop();
        }
    }

    /// Connected clients across all sinks
    pub fn client_count(&self) -> usize {
        self.sinks.read().iter().map(|s| s.client_count()).sum()
    }

    /// Events published since construction, delivered or not
    pub fn published_count(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }

    /// Encode `event` once and hand it to every sink with clients.
    /// Returns the total number of deliveries.
    pub fn publish(&self, event: &Event) -> usize {
        self.event_counter.fetch_add(1, Ordering::Relaxed);

        let sinks: Vec<Arc<dyn EventSink>> = self
            .sinks
            .read()
            .iter()
            .filter(|s| s.client_count() > 0)
            .cloned()
            .collect();
        if sinks.is_empty() {
            trace!("No clients for {}", event.kind());
            return 0;
        }

        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {}: {}", event.kind(), e);
                return 0;
            }
        };

        let delivered: usize = sinks.iter().map(|s| s.publish(&payload)).sum();
        trace!("{} delivered to {} client(s)", event.kind(), delivered);
        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let count = self.sinks.get_mut().len();
        if count > 0 {
            info!("Event bus dropped with {} sink(s)", count);
        }
    }
}
