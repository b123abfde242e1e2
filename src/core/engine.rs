// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Sensing orchestrator: ranging and object detection loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use super::event_bus::{Event, EventBus};
use super::worker::{StopSignal, StopToken, Worker};
use super::SystemStatus;
use crate::config::{AlertConfig, Config};
use crate::connectivity::CommandTarget;
use crate::detection::{AlertEvent, AlertLevel, AlertPolicy, DetectionResult, Thresholds, Vision};
use crate::feedback::{HapticOutput, Priority, SpeechOutput};
use crate::sensors::{battery_level, unix_seconds, DistanceReading, DistanceSample, RangeFinder};
use crate::{Error, Result};

const START_MESSAGE: &str = "Système d'assistance pour malvoyants démarré. Je suis prêt à vous aider.";
const STOP_MESSAGE: &str = "Arrêt du système d'assistance.";

/// Telemetry events waiting for the publisher; newer events are dropped
/// while a slow transport holds it up
const EVENT_QUEUE_CAPACITY: usize = 32;

/// Loop timing and alert parameters
#[derive(Debug, Clone)]
pub struct SystemSettings {
    pub thresholds: Thresholds,
    pub alert: AlertConfig,
    /// Ranging period after a good measurement
    pub measure_interval: Duration,
    /// Pause after an echo timeout or GPIO error
    pub retry_backoff: Duration,
    /// Detection period
    pub capture_interval: Duration,
    /// Pause after the camera returned no frame
    pub frame_retry: Duration,
    /// Budget for joining the loops on stop
    pub join_timeout: Duration,
}

impl SystemSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.alert.validate()?;
        Ok(Self {
            thresholds: config.thresholds()?,
            alert: config.alert.clone(),
            measure_interval: config.ultrasonic.measure_interval(),
            retry_backoff: config.ultrasonic.retry_backoff(),
            capture_interval: Duration::from_secs(config.camera.capture_interval_secs),
            frame_retry: Duration::from_secs(1),
            join_timeout: Duration::from_secs(config.connectivity.shutdown_timeout_secs),
        })
    }
}

/// Hardware available to the orchestrator. Absent parts disable their loop.
#[derive(Default)]
pub struct Peripherals {
    pub range_finder: Option<RangeFinder>,
    pub vision: Option<Vision>,
    /// A camera is present, even if no detector could be set up
    pub camera_enabled: bool,
    pub speech: Option<Arc<dyn SpeechOutput>>,
    pub haptic: Option<Arc<dyn HapticOutput>>,
}

#[derive(Default)]
struct SensingState {
    last_distance: Option<DistanceReading>,
    last_objects: Option<DetectionResult>,
}

struct SensingLoops {
    stop: StopSignal,
    workers: Vec<Worker>,
}

/// What a sensing loop needs to report results
#[derive(Clone)]
struct Outputs {
    speech: Option<Arc<dyn SpeechOutput>>,
    haptic: Option<Arc<dyn HapticOutput>>,
    events: Sender<Event>,
    state: Arc<RwLock<SensingState>>,
}

impl Outputs {
    fn speak(&self, text: &str, priority: Priority) {
        if let Some(ref speech) = self.speech {
            speech.speak(text, priority);
        }
    }

    fn vibrate(&self, level: AlertLevel) {
        if let Some(ref haptic) = self.haptic {
            haptic.vibrate(level);
        }
    }

    /// Hand an event to the publisher without waiting on transports
    fn publish(&self, event: Event) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => debug!("Event queue full, dropping {}", event.kind()),
            Err(TrySendError::Disconnected(event)) => trace!("No publisher for {}", event.kind()),
        }
    }

    fn on_reading(&self, policy: &mut AlertPolicy, sample: &DistanceSample, reading: DistanceReading) {
        let now = Instant::now();
        self.state.write().last_distance = Some(reading);

        if let Some(alert) = policy.classify(sample, now) {
            self.alert(alert);
        }
        if policy.broadcast_tick(sample, now) {
            self.publish(Event::distance(&reading));
        }
    }

    fn alert(&self, alert: AlertEvent) {
        let cm = alert.distance_cm.trunc() as i64;
        debug!("{:?} alert at {} cm", alert.level, cm);
        match alert.level {
            AlertLevel::Danger => {
                self.speak(&format!("Attention! Obstacle à {} centimètres", cm), Priority::Urgent);
                self.vibrate(AlertLevel::Danger);
            }
            AlertLevel::Warning => {
                self.speak(&format!("Obstacle à {} centimètres", cm), Priority::Normal);
                self.vibrate(AlertLevel::Warning);
            }
            AlertLevel::Info => self.vibrate(AlertLevel::Info),
        }
    }

    fn on_objects(&self, result: DetectionResult) {
        info!("Objects: {:?}", result.labels());
        self.speak(&result.summary(), Priority::Normal);
        self.vibrate(AlertLevel::Info);
        self.publish(Event::objects(&result));
        self.state.write().last_objects = Some(result);
    }
}

fn publish_loop(events: Receiver<Event>, bus: Arc<EventBus>, token: StopToken) {
    debug!("Publisher started");
    while let Some(event) = token.recv(&events) {
        let delivered = bus.publish(&event);
        trace!("{} delivered to {} client(s)", event.kind(), delivered);
    }
    debug!("Publisher stopped");
}

fn ranging_loop(
    finder: Arc<Mutex<RangeFinder>>,
    mut policy: AlertPolicy,
    outputs: Outputs,
    settings: SystemSettings,
    token: StopToken,
) {
    debug!("Ranging loop started");
    loop {
        let sample = finder.lock().sample();
        let pause = match sample {
            Ok(sample) => match sample {
                DistanceSample::Distance(reading) => {
                    trace!("Distance: {:.1} cm", reading.distance_cm);
                    outputs.on_reading(&mut policy, &sample, reading);
                    settings.measure_interval
                }
                DistanceSample::Timeout { phase } => {
                    trace!("Echo timeout ({:?})", phase);
                    settings.retry_backoff
                }
            },
            Err(e) => {
                warn!("Distance measurement failed: {}", e);
                settings.retry_backoff
            }
        };
        if token.wait(pause) {
            break;
        }
    }
    debug!("Ranging loop stopped");
}

fn detection_loop(vision: Arc<Mutex<Vision>>, outputs: Outputs, settings: SystemSettings, token: StopToken) {
    debug!("Detection loop started");
    loop {
        let analysis = vision.lock().analyze();
        let pause = match analysis {
            Ok(Some(result)) => {
                if result.is_empty() {
                    trace!("No objects above threshold");
                } else {
                    outputs.on_objects(result);
                }
                settings.capture_interval
            }
            Ok(None) => {
                warn!("Camera returned no frame");
                settings.frame_retry
            }
            Err(e) => {
                warn!("Object detection failed: {:#}", e);
                settings.capture_interval
            }
        };
        if token.wait(pause) {
            break;
        }
    }
    debug!("Detection loop stopped");
}

/// Ties the range finder and the vision pipeline to the actuators and the
/// event bus.
///
/// Transports keep running while the sensing loops are stopped, so a phone
/// can always send `start_system` again.
pub struct System {
    settings: SystemSettings,
    range_finder: Option<Arc<Mutex<RangeFinder>>>,
    vision: Option<Arc<Mutex<Vision>>>,
    camera_enabled: bool,
    outputs: Outputs,
    bus: Arc<EventBus>,
    events: Receiver<Event>,
    running: AtomicBool,
    closed: AtomicBool,
    /// A start or stop requested over a transport has not finished yet
    transition: AtomicBool,
    loops: Mutex<Option<SensingLoops>>,
    control: Mutex<Vec<Worker>>,
}

impl System {
    pub fn new(peripherals: Peripherals, settings: SystemSettings, bus: Arc<EventBus>) -> Self {
        let Peripherals {
            range_finder,
            vision,
            camera_enabled,
            speech,
            haptic,
        } = peripherals;

        info!(
            "Sensing: ultrasonic {}, object detection {}",
            if range_finder.is_some() { "on" } else { "off" },
            if vision.is_some() { "on" } else { "off" }
        );

        let (events_tx, events) = channel::bounded(EVENT_QUEUE_CAPACITY);
        Self {
            settings,
            range_finder: range_finder.map(|f| Arc::new(Mutex::new(f))),
            camera_enabled: camera_enabled || vision.is_some(),
            vision: vision.map(|v| Arc::new(Mutex::new(v))),
            outputs: Outputs {
                speech,
                haptic,
                events: events_tx,
                state: Arc::new(RwLock::new(SensingState::default())),
            },
            bus,
            events,
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            transition: AtomicBool::new(false),
            loops: Mutex::new(None),
            control: Mutex::new(Vec::new()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the sensing loops. Returns false if they are already running.
    pub fn start(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut loops = self.loops.lock();
        if loops.is_some() {
            return false;
        }

        let stop = StopSignal::new();
        let mut workers = Vec::new();

        let events = self.events.clone();
        let bus = self.bus.clone();
        let token = stop.token();
        match Worker::spawn("publisher", move || publish_loop(events, bus, token)) {
            Ok(worker) => workers.push(worker),
            Err(e) => error!("Failed to start event publisher: {}", e),
        }

        if let Some(ref finder) = self.range_finder {
            let finder = finder.clone();
            let policy = AlertPolicy::new(self.settings.thresholds, &self.settings.alert);
            let outputs = self.outputs.clone();
            let settings = self.settings.clone();
            let token = stop.token();
            match Worker::spawn("ranging", move || ranging_loop(finder, policy, outputs, settings, token)) {
                Ok(worker) => workers.push(worker),
                Err(e) => error!("Failed to start ranging loop: {}", e),
            }
        }

        if let Some(ref vision) = self.vision {
            let vision = vision.clone();
            let outputs = self.outputs.clone();
            let settings = self.settings.clone();
            let token = stop.token();
            match Worker::spawn("detection", move || detection_loop(vision, outputs, settings, token)) {
                Ok(worker) => workers.push(worker),
                Err(e) => error!("Failed to start detection loop: {}", e),
            }
        }

        *loops = Some(SensingLoops { stop, workers });
        self.running.store(true, Ordering::SeqCst);
        info!("Assistance system started");
        self.outputs.speak(START_MESSAGE, Priority::Normal);
        true
    }

    /// Stop the sensing loops. Returns false if they were not running.
    pub fn stop(&self) -> bool {
        let mut loops = self.loops.lock();
        let Some(active) = loops.take() else {
            return false;
        };
        self.running.store(false, Ordering::SeqCst);

        active.stop.trigger();
        let deadline = Instant::now() + self.settings.join_timeout;
        for worker in active.workers {
            worker.join_until(deadline);
        }

        if let Some(ref haptic) = self.outputs.haptic {
            haptic.stop();
        }
        info!("Assistance system stopped");
        self.outputs.speak(STOP_MESSAGE, Priority::Normal);
        true
    }

    /// Stop for good: refuse new starts, wait for pending control requests,
    /// stop the loops and release the camera.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.settings.join_timeout;
        let control: Vec<Worker> = self.control.lock().drain(..).collect();
        for worker in control {
            worker.join_until(deadline);
        }

        self.stop();
        if let Some(ref vision) = self.vision {
            // An abandoned detection loop may still hold the pipeline
            match vision.try_lock_for(self.settings.join_timeout) {
                Some(mut vision) => vision.release(),
                None => warn!("Vision pipeline still busy, camera not released"),
            }
        }
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            system_running: self.is_running(),
            camera_enabled: self.camera_enabled,
            detection_enabled: self.vision.is_some(),
            last_distance: self.outputs.state.read().last_distance.map(|r| r.distance_cm),
            battery_level: battery_level(),
            timestamp: unix_seconds(Utc::now()),
        }
    }

    pub fn last_distance(&self) -> Result<Option<DistanceReading>> {
        if self.range_finder.is_none() {
            return Err(Error::hardware("no ultrasonic sensor"));
        }
        Ok(self.outputs.state.read().last_distance)
    }

    pub fn last_objects(&self) -> Result<Option<DetectionResult>> {
        if self.vision.is_none() {
            return Err(Error::hardware("no camera or object detector"));
        }
        Ok(self.outputs.state.read().last_objects.clone())
    }

    fn can_start(&self) -> bool {
        !self.is_running() && !self.closed.load(Ordering::SeqCst)
    }

    /// Run `action` on a control thread if `ready` holds. Only one requested
    /// transition runs at a time; returns false when another is pending.
    fn spawn_control(
        self: &Arc<Self>,
        name: &str,
        ready: fn(&System) -> bool,
        action: fn(&System) -> bool,
    ) -> bool {
        if self
            .transition
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if !ready(self) {
            self.transition.store(false, Ordering::SeqCst);
            return false;
        }

        let system = self.clone();
        let mut control = self.control.lock();
        control.retain(|w| !w.is_finished());
        match Worker::spawn(name, move || {
            action(&system);
            system.transition.store(false, Ordering::SeqCst);
        }) {
            Ok(worker) => {
                control.push(worker);
                true
            }
            Err(e) => {
                error!("Failed to spawn {} thread: {}", name, e);
                self.transition.store(false, Ordering::SeqCst);
                false
            }
        }
    }
}

/// Command target held by transport sessions.
///
/// Holds a weak reference so open sessions do not keep the system alive.
#[derive(Clone)]
pub struct SystemHandle(Weak<System>);

impl SystemHandle {
    pub fn new(system: &Arc<System>) -> Self {
        Self(Arc::downgrade(system))
    }

    fn system(&self) -> Result<Arc<System>> {
        self.0
            .upgrade()
            .ok_or_else(|| Error::hardware("system is shutting down"))
    }
}

impl CommandTarget for SystemHandle {
    fn status(&self) -> SystemStatus {
        match self.system() {
            Ok(system) => system.status(),
            Err(_) => SystemStatus {
                system_running: false,
                camera_enabled: false,
                detection_enabled: false,
                last_distance: None,
                battery_level: battery_level(),
                timestamp: unix_seconds(Utc::now()),
            },
        }
    }

    fn request_start(&self) -> bool {
        match self.system() {
            Ok(system) => system.spawn_control("control-start", System::can_start, System::start),
            Err(_) => false,
        }
    }

    fn request_stop(&self) -> bool {
        match self.system() {
            Ok(system) => system.spawn_control("control-stop", System::is_running, System::stop),
            Err(_) => false,
        }
    }

    fn last_distance(&self) -> Result<Option<DistanceReading>> {
        self.system()?.last_distance()
    }

    fn last_objects(&self) -> Result<Option<DetectionResult>> {
        self.system()?.last_objects()
    }
}
