// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Application wiring: hardware selection, transports and ordered shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::engine::{Peripherals, System, SystemHandle, SystemSettings};
use super::event_bus::{EventBus, EventSink};
use crate::config::Config;
use crate::connectivity::{
    CommandEnvelope, CommandSessionFactory, CommandTarget, FrameObserver, ServerSettings, TcpEndpoint,
    TransportServer,
};
use crate::detection::{CommandDetector, ObjectDetector, SimulatedDetector, Vision};
use crate::feedback::{AudioFeedback, HapticFeedback, HapticOutput, SpeechOutput};
use crate::sensors::{
    Camera, CommandCamera, Gpio, RangeFinder, RangeFinderConfig, SimulatedCamera, SimulatedGpio, SysfsGpio,
    SystemClock,
};

/// Time given to the farewell message before the speech queue is cleared
const FAREWELL_BUDGET: Duration = Duration::from_secs(2);

/// The assembled assistant: sensing system, actuators and transports
pub struct Application {
    system: Arc<System>,
    bus: Arc<EventBus>,
    gpio: Option<Arc<dyn Gpio>>,
    speech: Option<Arc<AudioFeedback>>,
    haptic: Option<Arc<HapticFeedback>>,
}

impl Application {
    /// Select backends for every subsystem. Missing hardware disables the
    /// subsystem that needs it, with a warning.
    pub fn build(config: &Config) -> Result<Self> {
        let settings = SystemSettings::from_config(config)?;
        let demo = config.demo_mode;
        if demo {
            info!("Demo mode: simulated hardware");
        }

        let gpio = open_gpio(config);

        let range_finder = match (&gpio, config.ultrasonic.enabled) {
            (Some(gpio), true) => {
                let rf_config = RangeFinderConfig::from_config(&config.gpio, &config.ultrasonic);
                match RangeFinder::new(gpio.clone(), Arc::new(SystemClock::new()), rf_config) {
                    Ok(finder) => Some(finder),
                    Err(e) => {
                        warn!("Ultrasonic sensor disabled: {}", e);
                        None
                    }
                }
            }
            (None, true) => {
                warn!("Ultrasonic sensor disabled: no GPIO");
                None
            }
            (_, false) => None,
        };

        let camera = open_camera(config);
        let camera_enabled = camera.is_some();
        let vision = match (camera, open_detector(config)) {
            (Some(camera), Some(detector)) => Some(Vision::new(camera, detector, &config.camera, &config.detection)),
            _ => None,
        };

        let speech = config
            .audio
            .enabled
            .then(|| Arc::new(AudioFeedback::from_config(&config.audio, demo)));

        let haptic = match (&gpio, config.haptic.enabled) {
            (Some(gpio), true) => match HapticFeedback::new(gpio.clone(), config.gpio.vibration_pin, &config.haptic) {
                Ok(haptic) => Some(Arc::new(haptic)),
                Err(e) => {
                    warn!("Vibration disabled: {}", e);
                    None
                }
            },
            (None, true) => {
                warn!("Vibration disabled: no GPIO");
                None
            }
            (_, false) => None,
        };

        let bus = Arc::new(EventBus::new());
        let peripherals = Peripherals {
            range_finder,
            vision,
            camera_enabled,
            speech: speech.clone().map(|s| s as Arc<dyn SpeechOutput>),
            haptic: haptic.clone().map(|h| h as Arc<dyn HapticOutput>),
        };
        let system = Arc::new(System::new(peripherals, settings, bus.clone()));

        register_transports(config, &bus, &system);

        Ok(Self {
            system,
            bus,
            gpio,
            speech,
            haptic,
        })
    }

    pub fn system(&self) -> &Arc<System> {
        &self.system
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Open the transports and start the sensing loops
    pub fn start(&self) {
        let listening = self.bus.start_all();
        if listening == 0 {
            warn!("No transport listening; the phone cannot connect");
        } else {
            info!("{} transport(s) listening", listening);
        }
        self.system.start();
    }

    /// Ordered teardown: loops, transports, actuators, then GPIO
    pub fn shutdown(&self) {
        info!("Shutting down");
        self.system.shutdown();
        self.bus.stop_all();

        if let Some(ref speech) = self.speech {
            if !speech.wait_idle(FAREWELL_BUDGET) {
                debug!("Speech still busy at shutdown");
            }
            speech.cleanup();
        }
        if let Some(ref haptic) = self.haptic {
            haptic.cleanup();
        }
        if let Some(ref gpio) = self.gpio {
            gpio.release();
        }
        info!("Shutdown complete");
    }
}

fn open_gpio(config: &Config) -> Option<Arc<dyn Gpio>> {
    if config.demo_mode {
        return Some(Arc::new(SimulatedGpio::new(config.gpio.trig_pin, config.gpio.echo_pin)));
    }
    match SysfsGpio::new(&config.gpio.sysfs_root) {
        Ok(gpio) => Some(Arc::new(gpio)),
        Err(e) => {
            warn!("GPIO unavailable: {}", e);
            None
        }
    }
}

fn open_camera(config: &Config) -> Option<Box<dyn Camera>> {
    if !config.camera.enabled {
        return None;
    }
    if config.demo_mode {
        let (width, height) = config.camera.resolution;
        return Some(Box::new(SimulatedCamera::new(width, height)));
    }
    let Some(ref command) = config.camera.capture_command else {
        warn!("Camera disabled: no capture command configured");
        return None;
    };
    match CommandCamera::new(command) {
        Ok(camera) => Some(Box::new(camera)),
        Err(e) => {
            warn!("Camera disabled: {:#}", e);
            None
        }
    }
}

fn open_detector(config: &Config) -> Option<Box<dyn ObjectDetector>> {
    if !config.detection.enabled {
        return None;
    }
    if config.demo_mode {
        return Some(Box::new(SimulatedDetector::new()));
    }
    let Some(ref command) = config.detection.detector_command else {
        warn!("Object detection disabled: no detector command configured");
        return None;
    };
    match CommandDetector::new(command) {
        Ok(detector) => Some(Box::new(detector)),
        Err(e) => {
            warn!("Object detection disabled: {:#}", e);
            None
        }
    }
}

fn session_factory(system: &Arc<System>) -> CommandSessionFactory {
    let target: Arc<dyn CommandTarget> = Arc::new(SystemHandle::new(system));
    let observer: FrameObserver = Arc::new(|client: &str, message: &CommandEnvelope| {
        debug!("Command from {}: {}", client, message.command);
    });
    CommandSessionFactory::new(target).with_observer(observer)
}

fn register_transports(config: &Config, bus: &Arc<EventBus>, system: &Arc<System>) {
    let connectivity = &config.connectivity;
    let settings: ServerSettings = connectivity.server_settings();

    if connectivity.bluetooth.enabled {
        #[cfg(target_os = "linux")]
        {
            let endpoint = crate::connectivity::RfcommEndpoint::new(&connectivity.bluetooth);
            let server = TransportServer::new("bluetooth", endpoint, session_factory(system), settings.clone());
            bus.add_sink(Arc::new(server) as Arc<dyn EventSink>);
        }
        #[cfg(not(target_os = "linux"))]
        warn!("Bluetooth RFCOMM is only supported on Linux");
    }

    if connectivity.serial.enabled {
        #[cfg(feature = "serial")]
        {
            let endpoint = crate::connectivity::SerialEndpoint::new(&connectivity.serial);
            let server = TransportServer::new("serial", endpoint, session_factory(system), settings.clone());
            bus.add_sink(Arc::new(server) as Arc<dyn EventSink>);
        }
        #[cfg(not(feature = "serial"))]
        warn!("Serial transport requested but built without the 'serial' feature");
    }

    if connectivity.tcp.enabled {
        let endpoint = TcpEndpoint::new(&connectivity.tcp);
        let server = TransportServer::new("tcp", endpoint, session_factory(system), settings);
        bus.add_sink(Arc::new(server) as Arc<dyn EventSink>);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::TcpConfig;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};

    fn demo_config() -> Config {
        let mut config = Config::default();
        config.demo_mode = true;
        config.audio.enabled = false;
        config.connectivity.bluetooth.enabled = false;
        config.connectivity.serial.enabled = false;
        config
    }

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn test_demo_build_enables_everything() {
        let app = Application::build(&demo_config()).unwrap();
        let status = app.system().status();
        assert!(status.camera_enabled);
        assert!(status.detection_enabled);
        assert!(app.system().last_distance().is_ok());
        assert!(app.bus().sink_names().is_empty());
        app.shutdown();
    }

    #[test]
    fn test_missing_hardware_disables_subsystems() {
        let mut config = demo_config();
        config.demo_mode = false;
        config.gpio.sysfs_root = "/nonexistent/gpio".into();
        config.camera.capture_command = None;

        let app = Application::build(&config).unwrap();
        assert!(app.system().last_distance().is_err());
        assert!(app.system().last_objects().is_err());
        assert!(!app.system().status().camera_enabled);
        app.shutdown();
    }

    #[test]
    fn test_tcp_client_drives_the_system() {
        let mut config = demo_config();
        config.camera.enabled = false;
        config.connectivity.tcp = TcpConfig {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: free_port(),
            read_timeout_secs: 60,
        };
        config.connectivity.poll_interval_ms = 20;

        let app = Application::build(&config).unwrap();
        assert_eq!(app.bus().sink_names(), vec!["tcp"]);
        app.start();
        assert!(app.system().is_running());

        let stream = TcpStream::connect(("127.0.0.1", config.connectivity.tcp.port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        writer.write_all(b"{\"command\":\"get_status\"}\n").unwrap();
        // Telemetry may arrive before the response
        let reply = loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            if value.get("status").is_some() {
                break value;
            }
        };
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["data"]["system_running"], true);

        app.shutdown();
        assert!(!app.system().is_running());
    }
}
