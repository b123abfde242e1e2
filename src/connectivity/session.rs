// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! JSON command protocol shared by every transport

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::server::{Session, SessionFactory};
use crate::core::SystemStatus;
use crate::detection::DetectionResult;
use crate::sensors::{unix_seconds, DistanceReading};
use crate::{Error, Result};

/// Inbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl CommandEnvelope {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw).map_err(|e| Error::ProtocolDecode(e.to_string()))?;
        serde_json::from_str(text.trim()).map_err(|e| Error::ProtocolDecode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseEnvelope {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
            data: None,
        }
    }

    /// User-facing reply for a protocol error
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::ProtocolDecode(_) => Self::error("Format de données invalide"),
            Error::UnknownCommand(name) => Self::error(format!("Commande '{}' non reconnue", name)),
            other => Self::error(other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn encode(&self) -> Vec<u8> {
        // Plain data with string keys; serialization cannot fail
        serde_json::to_vec(self).unwrap_or_else(|_| br#"{"status":"error"}"#.to_vec())
    }
}

/// Commands understood over every transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GetStatus,
    StartSystem,
    StopSystem,
    GetDistance,
    GetObjects,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::GetStatus,
        Command::StartSystem,
        Command::StopSystem,
        Command::GetDistance,
        Command::GetObjects,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::GetStatus => "get_status",
            Command::StartSystem => "start_system",
            Command::StopSystem => "stop_system",
            Command::GetDistance => "get_distance",
            Command::GetObjects => "get_objects",
        }
    }

}

/// Wire name to [`Command`], built by a factory and shared by its sessions
#[derive(Debug, Clone)]
pub struct CommandTable {
    by_name: HashMap<&'static str, Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self {
            by_name: Command::ALL.iter().map(|c| (c.name(), *c)).collect(),
        }
    }

    /// Exact, case-sensitive match
    pub fn resolve(&self, name: &str) -> Option<Command> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

/// What the command protocol drives
pub trait CommandTarget: Send + Sync {
    fn status(&self) -> SystemStatus;

    /// Start the sensing loops in the background; false if already running
    fn request_start(&self) -> bool;

    /// Stop the sensing loops in the background; false if already stopped
    fn request_stop(&self) -> bool;

    /// Last known distance; `Err` when there is no range finder
    fn last_distance(&self) -> Result<Option<DistanceReading>>;

    /// Last detection result; `Err` when there is no camera or detector
    fn last_objects(&self) -> Result<Option<DetectionResult>>;
}

/// Called with `(client_id, message)` for every decoded request
pub type FrameObserver = Arc<dyn Fn(&str, &CommandEnvelope) + Send + Sync>;

/// Per-client protocol state
pub struct TransportSession {
    client_id: String,
    commands: Arc<CommandTable>,
    target: Arc<dyn CommandTarget>,
    observer: Option<FrameObserver>,
    /// Decoded request whose reply has not been written yet
    unreplied: Option<CommandEnvelope>,
}

impl TransportSession {
    pub fn new(
        client_id: &str,
        commands: Arc<CommandTable>,
        target: Arc<dyn CommandTarget>,
        observer: Option<FrameObserver>,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            commands,
            target,
            observer,
            unreplied: None,
        }
    }

    fn dispatch(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        let command = match self.commands.resolve(&envelope.command) {
            Some(command) => command,
            None => {
                return ResponseEnvelope::from_error(&Error::UnknownCommand(envelope.command.clone()));
            }
        };
        debug!("{} -> {}", self.client_id, command.name());

        match command {
            Command::GetStatus => match serde_json::to_value(self.target.status()) {
                Ok(data) => ResponseEnvelope::with_data(data),
                Err(e) => ResponseEnvelope::error(e.to_string()),
            },
            Command::StartSystem => {
                if self.target.request_start() {
                    ResponseEnvelope::success("Système démarré")
                } else {
                    ResponseEnvelope::success("Système déjà en cours d'exécution")
                }
            }
            Command::StopSystem => {
                if self.target.request_stop() {
                    ResponseEnvelope::success("Arrêt du système en cours")
                } else {
                    ResponseEnvelope::success("Système déjà arrêté")
                }
            }
            Command::GetDistance => match self.target.last_distance() {
                Ok(reading) => ResponseEnvelope::with_data(json!({
                    "distance": reading.map(|r| r.distance_cm),
                    "unit": "cm",
                    "timestamp": unix_seconds(reading.map(|r| r.measured_at).unwrap_or_else(Utc::now)),
                })),
                Err(_) => ResponseEnvelope::error("Capteur ultrasonique non disponible"),
            },
            Command::GetObjects => match self.target.last_objects() {
                Ok(result) => {
                    let (objects, confidence, at) = match result {
                        Some(r) => (r.labels(), r.confidences(), r.detected_at),
                        None => (Vec::new(), Vec::new(), Utc::now()),
                    };
                    ResponseEnvelope::with_data(json!({
                        "objects": objects,
                        "confidence": confidence,
                        "timestamp": unix_seconds(at),
                    }))
                }
                Err(_) => ResponseEnvelope::error("Caméra ou détecteur d'objets non disponible"),
            },
        }
    }

    fn notify(&self, envelope: &CommandEnvelope) {
        if let Some(ref observer) = self.observer {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer(&self.client_id, envelope)));
            if outcome.is_err() {
                warn!("Message observer panicked on a frame from {}", self.client_id);
            }
        }
    }
}

impl Session for TransportSession {
    fn handle_frame(&mut self, raw: &[u8]) -> Vec<u8> {
        self.unreplied = None;
        let envelope = match CommandEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Rejected frame from {}: {}", self.client_id, e);
                return ResponseEnvelope::from_error(&e).encode();
            }
        };

        let response = self.dispatch(&envelope).encode();
        self.unreplied = Some(envelope);
        response
    }

    fn after_reply(&mut self) {
        if let Some(envelope) = self.unreplied.take() {
            self.notify(&envelope);
        }
    }
}

/// Builds one [`TransportSession`] per accepted client
#[derive(Clone)]
pub struct CommandSessionFactory {
    commands: Arc<CommandTable>,
    target: Arc<dyn CommandTarget>,
    observer: Option<FrameObserver>,
}

impl CommandSessionFactory {
    pub fn new(target: Arc<dyn CommandTarget>) -> Self {
        Self {
            commands: Arc::new(CommandTable::new()),
            target,
            observer: None,
        }
    }

    pub fn commands(&self) -> &Arc<CommandTable> {
        &self.commands
    }

    pub fn with_observer(mut self, observer: FrameObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl SessionFactory for CommandSessionFactory {
    type Session = TransportSession;

    fn create(&self, client_id: &str) -> TransportSession {
        TransportSession::new(
            client_id,
            self.commands.clone(),
            self.target.clone(),
            self.observer.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, Detection};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeTarget {
        running: AtomicBool,
        mutations: AtomicUsize,
        has_sensor: bool,
        distance: Option<f64>,
        objects: Option<DetectionResult>,
    }

    impl CommandTarget for FakeTarget {
        fn status(&self) -> SystemStatus {
            SystemStatus {
                system_running: self.running.load(Ordering::SeqCst),
                camera_enabled: false,
                detection_enabled: false,
                last_distance: self.distance,
                battery_level: None,
                timestamp: 1_700_000_000.0,
            }
        }

        fn request_start(&self) -> bool {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            !self.running.swap(true, Ordering::SeqCst)
        }

        fn request_stop(&self) -> bool {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.running.swap(false, Ordering::SeqCst)
        }

        fn last_distance(&self) -> Result<Option<DistanceReading>> {
            if !self.has_sensor {
                return Err(Error::hardware("no range finder"));
            }
            Ok(self.distance.map(|d| DistanceReading {
                distance_cm: d,
                measured_at: Utc::now(),
            }))
        }

        fn last_objects(&self) -> Result<Option<DetectionResult>> {
            self.objects
                .clone()
                .map(Some)
                .ok_or_else(|| Error::hardware("no camera"))
        }
    }

    fn new_session(target: Arc<FakeTarget>) -> TransportSession {
        CommandSessionFactory::new(target).create("test")
    }

    /// One request as the server runs it: handle, write, then `after_reply`
    fn call(session: &mut TransportSession, raw: &str) -> Value {
        let reply = serde_json::from_slice(&session.handle_frame(raw.as_bytes())).unwrap();
        session.after_reply();
        reply
    }

    #[test]
    fn test_malformed_frames() {
        let target = Arc::new(FakeTarget::default());
        let mut session = new_session(target.clone());

        for raw in ["not json", "[1, 2]", "{\"params\": {}}", "{\"command\": 3}"] {
            let reply = call(&mut session, raw);
            assert_eq!(reply["status"], "error");
            assert_eq!(reply["message"], "Format de données invalide");
            assert!(reply.get("data").is_none());
        }

        let reply: Value = serde_json::from_slice(&session.handle_frame(&[0xff, 0xfe, b'{'])).unwrap();
        assert_eq!(reply["message"], "Format de données invalide");
        assert_eq!(target.mutations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_command_has_no_effect() {
        let target = Arc::new(FakeTarget::default());
        let mut session = new_session(target.clone());

        let reply = call(&mut session, r#"{"command": "self_destruct", "params": {"now": true}}"#);
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["message"], "Commande 'self_destruct' non reconnue");
        assert_eq!(target.mutations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_stop_messages() {
        let target = Arc::new(FakeTarget::default());
        let mut session = new_session(target.clone());

        assert_eq!(call(&mut session, r#"{"command":"start_system"}"#)["message"], "Système démarré");
        assert_eq!(
            call(&mut session, r#"{"command":"start_system"}"#)["message"],
            "Système déjà en cours d'exécution"
        );
        assert_eq!(call(&mut session, r#"{"command":"stop_system"}"#)["message"], "Arrêt du système en cours");
        let reply = call(&mut session, r#"{"command":"stop_system"}"#);
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["message"], "Système déjà arrêté");
    }

    #[test]
    fn test_status_payload() {
        let target = Arc::new(FakeTarget {
            distance: Some(87.5),
            ..FakeTarget::default()
        });
        let mut session = new_session(target);
        let reply = call(&mut session, r#"{"command":"get_status"}"#);
        assert_eq!(reply["status"], "success");
        assert!(reply.get("message").is_none());
        assert_eq!(reply["data"]["system_running"], false);
        assert_eq!(reply["data"]["last_distance"], 87.5);
        assert!(reply["data"]["battery_level"].is_null());
    }

    #[test]
    fn test_distance_without_sensor() {
        let mut session = new_session(Arc::new(FakeTarget::default()));
        let reply = call(&mut session, r#"{"command":"get_distance"}"#);
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["message"], "Capteur ultrasonique non disponible");
    }

    #[test]
    fn test_distance_with_sensor() {
        let target = Arc::new(FakeTarget {
            has_sensor: true,
            distance: Some(42.25),
            ..FakeTarget::default()
        });
        let mut session = new_session(target);
        let reply = call(&mut session, r#"{"command":"get_distance","params":{}}"#);
        assert_eq!(reply["data"]["distance"], 42.25);
        assert_eq!(reply["data"]["unit"], "cm");
        assert!(reply["data"]["timestamp"].as_f64().unwrap() > 1.6e9);
    }

    #[test]
    fn test_objects_payload() {
        let objects = DetectionResult::from_raw(
            vec![
                Detection {
                    label: "chaise".into(),
                    confidence: 0.75,
                    bbox: BoundingBox(0, 0, 5, 5),
                },
                Detection {
                    label: "personne".into(),
                    confidence: 0.5625,
                    bbox: BoundingBox(1, 1, 9, 9),
                },
            ],
            0.5,
            5,
        );
        let target = Arc::new(FakeTarget {
            objects: Some(objects),
            ..FakeTarget::default()
        });
        let mut session = new_session(target);
        let reply = call(&mut session, r#"{"command":"get_objects"}"#);
        assert_eq!(reply["data"]["objects"], json!(["chaise", "personne"]));
        assert_eq!(reply["data"]["confidence"], json!([0.75, 0.5625]));

        let mut bare = new_session(Arc::new(FakeTarget::default()));
        let reply = call(&mut bare, r#"{"command":"get_objects"}"#);
        assert_eq!(reply["message"], "Caméra ou détecteur d'objets non disponible");
    }

    #[test]
    fn test_observer_panic_is_contained() {
        let seen = Arc::new(AtomicUsize::new(0));
        let observer: FrameObserver = {
            let seen = seen.clone();
            Arc::new(move |_client: &str, envelope: &CommandEnvelope| {
                seen.fetch_add(1, Ordering::SeqCst);
                if envelope.command == "get_status" {
                    panic!("observer bug");
                }
            })
        };
        let factory = CommandSessionFactory::new(Arc::new(FakeTarget::default())).with_observer(observer);
        let mut session = factory.create("AA:BB:CC:DD:EE:FF:1");

        let reply = call(&mut session, r#"{"command":"get_status"}"#);
        assert_eq!(reply["status"], "success");
        let reply = call(&mut session, r#"{"command":"nope"}"#);
        assert_eq!(reply["status"], "error");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observer_runs_after_reply() {
        let seen = Arc::new(AtomicUsize::new(0));
        let observer: FrameObserver = {
            let seen = seen.clone();
            Arc::new(move |_client: &str, _envelope: &CommandEnvelope| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };
        let factory = CommandSessionFactory::new(Arc::new(FakeTarget::default())).with_observer(observer);
        let mut session = factory.create("phone");

        session.handle_frame(br#"{"command":"get_status"}"#);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        session.after_reply();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        session.after_reply();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        // Undecodable frames are not observed
        session.handle_frame(b"garbage");
        session.after_reply();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_shares_one_command_table() {
        let factory = CommandSessionFactory::new(Arc::new(FakeTarget::default()));
        let commands = factory.commands().clone();
        assert_eq!(commands.len(), Command::ALL.len());
        for command in Command::ALL {
            assert_eq!(commands.resolve(command.name()), Some(command));
        }
        assert_eq!(commands.resolve("GET_STATUS"), None);

        let cloned = factory.clone();
        let _a = factory.create("a");
        let _b = cloned.create("b");
        // The factory, its clone, both sessions and the local handle
        assert_eq!(Arc::strong_count(&commands), 5);
    }
}
