// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::connectivity::ConnectivityConfig;
use crate::detection::Thresholds;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Log level used when neither RUST_LOG nor a CLI flag overrides it
    pub log_level: String,

    /// Run against simulated hardware
    pub demo_mode: bool,

    /// GPIO pin assignment
    pub gpio: GpioConfig,

    /// Ultrasonic range finder
    pub ultrasonic: UltrasonicConfig,

    /// Alert arbitration
    pub alert: AlertConfig,

    /// Camera capture
    pub camera: CameraConfig,

    /// Object detection
    pub detection: DetectionConfig,

    /// Speech output
    pub audio: AudioConfig,

    /// Vibration motor
    pub haptic: HapticConfig,

    /// Phone connectivity
    pub connectivity: ConnectivityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "guidecane".to_string(),
            log_level: "info".to_string(),
            demo_mode: false,
            gpio: GpioConfig::default(),
            ultrasonic: UltrasonicConfig::default(),
            alert: AlertConfig::default(),
            camera: CameraConfig::default(),
            detection: DetectionConfig::default(),
            audio: AudioConfig::default(),
            haptic: HapticConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Check cross-field invariants once, at load time
    pub fn validate(&self) -> crate::Result<()> {
        self.thresholds()?;
        if self.detection.confidence_threshold < 0.0 || self.detection.confidence_threshold > 1.0 {
            return Err(crate::Error::InvalidConfig(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.detection.confidence_threshold
            )));
        }
        if self.ultrasonic.measure_interval_ms == 0 || self.camera.capture_interval_secs == 0 {
            return Err(crate::Error::InvalidConfig("loop intervals must be non-zero".into()));
        }
        self.alert.validate()
    }

    /// Validated distance thresholds
    pub fn thresholds(&self) -> crate::Result<Thresholds> {
        Thresholds::new(
            self.ultrasonic.danger_distance_cm,
            self.ultrasonic.warning_distance_cm,
            self.ultrasonic.max_distance_cm,
        )
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("guidecane"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// GPIO pin assignment (BCM numbering)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    /// Ultrasonic trigger output
    pub trig_pin: u8,

    /// Ultrasonic echo input
    pub echo_pin: u8,

    /// Vibration motor output
    pub vibration_pin: u8,

    /// sysfs GPIO root
    pub sysfs_root: PathBuf,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            trig_pin: 23,
            echo_pin: 24,
            vibration_pin: 18,
            sysfs_root: PathBuf::from("/sys/class/gpio"),
        }
    }
}

/// Ultrasonic sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UltrasonicConfig {
    /// Enable obstacle ranging
    pub enabled: bool,

    /// Readings above this are reported as this value (cm)
    pub max_distance_cm: f64,

    /// Warning alert below this distance (cm)
    pub warning_distance_cm: f64,

    /// Danger alert below this distance (cm)
    pub danger_distance_cm: f64,

    /// Ranging loop period
    pub measure_interval_ms: u64,

    /// Budget for each echo polling phase
    pub echo_timeout_ms: u64,

    /// Pause after a timed-out or failed measurement
    pub retry_backoff_ms: u64,

    /// Trigger settle time before the pulse
    pub settle_ms: u64,

    /// Trigger pulse width
    pub trigger_pulse_us: u64,
}

impl Default for UltrasonicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_distance_cm: 300.0,
            warning_distance_cm: 100.0,
            danger_distance_cm: 50.0,
            measure_interval_ms: 1000,
            echo_timeout_ms: 100,
            retry_backoff_ms: 100,
            settle_ms: 10,
            trigger_pulse_us: 10,
        }
    }
}

impl UltrasonicConfig {
    pub fn measure_interval(&self) -> Duration {
        Duration::from_millis(self.measure_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Alert arbitration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Distance change that re-arms an alert (cm)
    pub change_threshold_cm: f64,

    /// Re-alert period for a static obstacle
    pub min_alert_interval_secs: f64,

    /// Telemetry broadcast period
    pub broadcast_interval_secs: f64,
}

impl AlertConfig {
    /// Longest accepted alert or broadcast period
    pub const MAX_INTERVAL_SECS: f64 = 3600.0;

    pub fn validate(&self) -> crate::Result<()> {
        if !self.change_threshold_cm.is_finite() || self.change_threshold_cm < 0.0 {
            return Err(crate::Error::InvalidConfig(format!(
                "change_threshold_cm must be a non-negative number, got {}",
                self.change_threshold_cm
            )));
        }
        for (name, secs) in [
            ("min_alert_interval_secs", self.min_alert_interval_secs),
            ("broadcast_interval_secs", self.broadcast_interval_secs),
        ] {
            if !(secs > 0.0 && secs <= Self::MAX_INTERVAL_SECS) {
                return Err(crate::Error::InvalidConfig(format!(
                    "{} must be within (0, {}], got {}",
                    name,
                    Self::MAX_INTERVAL_SECS,
                    secs
                )));
            }
        }
        Ok(())
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            change_threshold_cm: 10.0,
            min_alert_interval_secs: 3.0,
            broadcast_interval_secs: 1.0,
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Enable the camera
    pub enabled: bool,

    /// Capture resolution
    pub resolution: (u32, u32),

    /// Frame rotation in degrees (0, 90, 180, 270)
    pub rotation: u16,

    /// Detection loop period
    pub capture_interval_secs: u64,

    /// Command printing one PPM (P6) frame on stdout
    pub capture_command: Option<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: (640, 480),
            rotation: 0,
            capture_interval_secs: 5,
            capture_command: None,
        }
    }
}

/// Object detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Enable object detection
    pub enabled: bool,

    /// Minimum confidence for a detection to be kept
    pub confidence_threshold: f32,

    /// Maximum number of objects announced per cycle
    pub max_detections: usize,

    /// Command reading a PPM frame on stdin and printing JSON detections
    pub detector_command: Option<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.5,
            max_detections: 5,
            detector_command: None,
        }
    }
}

/// Speech configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Enable spoken alerts
    pub enabled: bool,

    /// Synthesis language
    pub language: String,

    /// Volume (0.0 - 1.0)
    pub volume: f32,

    /// Speech rate (0.5 - 2.0)
    pub speech_rate: f32,

    /// Synthesizer program (espeak-ng compatible arguments)
    pub command: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "fr".to_string(),
            volume: 1.0,
            speech_rate: 1.0,
            command: "espeak-ng".to_string(),
        }
    }
}

/// Vibration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HapticConfig {
    /// Enable vibration feedback
    pub enabled: bool,

    /// Info pulse length
    pub info_duration_ms: u64,
}

impl Default for HapticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            info_duration_ms: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        let thresholds = config.thresholds().unwrap();
        assert_eq!(thresholds.danger_cm(), 50.0);
        assert_eq!(thresholds.warning_cm(), 100.0);
        assert_eq!(thresholds.max_cm(), 300.0);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            demo_mode = true

            [ultrasonic]
            warning_distance_cm = 120.0

            [connectivity.bluetooth]
            enabled = false
            "#,
        )
        .unwrap();

        assert!(config.demo_mode);
        assert_eq!(config.ultrasonic.warning_distance_cm, 120.0);
        assert_eq!(config.ultrasonic.danger_distance_cm, 50.0);
        assert!(!config.connectivity.bluetooth.enabled);
        assert_eq!(config.gpio.trig_pin, 23);
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut config = Config::default();
        config.ultrasonic.danger_distance_cm = 150.0;
        assert!(matches!(config.validate(), Err(crate::Error::InvalidConfig(_))));
    }

    #[test]
    fn test_out_of_range_alert_intervals_rejected() {
        for secs in [f64::INFINITY, 1e30, f64::NAN, 0.0, -1.0] {
            let mut config = Config::default();
            config.alert.min_alert_interval_secs = secs;
            assert!(matches!(config.validate(), Err(crate::Error::InvalidConfig(_))), "{}", secs);

            let mut config = Config::default();
            config.alert.broadcast_interval_secs = secs;
            assert!(matches!(config.validate(), Err(crate::Error::InvalidConfig(_))), "{}", secs);
        }

        let config: Config = toml::from_str("[alert]\nbroadcast_interval_secs = inf\n").unwrap();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.alert.change_threshold_cm = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let mut config = Config::default();
        config.alert.change_threshold_cm = 15.0;
        config.connectivity.serial.port = Some("/dev/ttyACM0".to_string());

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.alert.change_threshold_cm, 15.0);
        assert_eq!(parsed.connectivity.serial.port.as_deref(), Some("/dev/ttyACM0"));
    }
}
