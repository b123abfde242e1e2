// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Object detection: detector backends, post-processing and spoken summaries

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CameraConfig, DetectionConfig};
use crate::sensors::{Camera, Frame};

/// Pixel box `(x_min, y_min, x_max, y_max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox(pub i32, pub i32, pub i32, pub i32);

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Objects kept from one detection cycle, most confident first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub objects: Vec<Detection>,
    pub detected_at: DateTime<Utc>,
}

impl DetectionResult {
    /// Keep detections strictly above `confidence_threshold`, best first,
    /// at most `max_detections` of them
    pub fn from_raw(mut raw: Vec<Detection>, confidence_threshold: f32, max_detections: usize) -> Self {
        raw.retain(|d| d.confidence > confidence_threshold);
        raw.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        raw.truncate(max_detections);
        Self {
            objects: raw,
            detected_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.objects.iter().map(|d| d.label.clone()).collect()
    }

    pub fn confidences(&self) -> Vec<f32> {
        self.objects.iter().map(|d| d.confidence).collect()
    }

    /// French sentence announcing the detected objects
    pub fn summary(&self) -> String {
        if self.objects.is_empty() {
            return "Aucun objet détecté.".to_string();
        }

        // Counts per label, in order of first appearance
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for detection in &self.objects {
            match counts.iter_mut().find(|(label, _)| *label == detection.label) {
                Some((_, count)) => *count += 1,
                None => counts.push((detection.label.as_str(), 1)),
            }
        }

        let mut parts: Vec<String> = counts
            .into_iter()
            .map(|(label, count)| {
                if count == 1 {
                    format!("un {}", label)
                } else {
                    format!("{} {}s", count, label)
                }
            })
            .collect();

        match parts.len() {
            1 => format!("Détecté: {}.", parts[0]),
            _ => {
                let last = parts.pop().unwrap_or_default();
                format!("Détecté: {} et {}.", parts.join(", "), last)
            }
        }
    }
}

/// Object detector backend
pub trait ObjectDetector: Send {
    fn name(&self) -> &str;

    /// Raw detections for `frame`, before thresholding
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Detector backed by an external program.
///
/// The frame is written to the program's stdin as a binary PPM; the program
/// prints a JSON array of `{"label", "confidence", "bbox": [x0, y0, x1, y1]}`.
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
}

impl CommandDetector {
    pub fn new(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| anyhow!("empty detector command"))?;
        info!("Object detector command: {}", command_line);
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl ObjectDetector for CommandDetector {
    fn name(&self) -> &str {
        &self.program
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&frame.to_ppm()?).context("writing frame to detector")?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            bail!("{} exited with {}", self.program, output.status);
        }
        let detections: Vec<Detection> =
            serde_json::from_slice(&output.stdout).context("parsing detector output")?;
        debug!("{} raw detections", detections.len());
        Ok(detections)
    }
}

const SIMULATED_LABELS: &[&str] = &["personne", "chaise", "porte", "table", "voiture", "vélo"];

/// Random detections for demo mode
pub struct SimulatedDetector {
    rng: StdRng,
}

impl SimulatedDetector {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SimulatedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectDetector for SimulatedDetector {
    fn name(&self) -> &str {
        "simulated"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let count = self.rng.gen_range(0..=3);
        let (w, h) = (frame.width().max(2) as i32, frame.height().max(2) as i32);
        let detections = (0..count)
            .map(|_| {
                let label = SIMULATED_LABELS[self.rng.gen_range(0..SIMULATED_LABELS.len())];
                let x0 = self.rng.gen_range(0..w / 2);
                let y0 = self.rng.gen_range(0..h / 2);
                let x1 = self.rng.gen_range(x0 + 1..=w);
                let y1 = self.rng.gen_range(y0 + 1..=h);
                Detection {
                    label: label.to_string(),
                    confidence: self.rng.gen_range(0.3..0.95),
                    bbox: BoundingBox(x0, y0, x1, y1),
                }
            })
            .collect();
        Ok(detections)
    }
}

/// Camera plus detector, producing post-processed results
pub struct Vision {
    camera: Box<dyn Camera>,
    detector: Box<dyn ObjectDetector>,
    rotation: u16,
    confidence_threshold: f32,
    max_detections: usize,
}

impl Vision {
    pub fn new(
        camera: Box<dyn Camera>,
        detector: Box<dyn ObjectDetector>,
        camera_config: &CameraConfig,
        detection_config: &DetectionConfig,
    ) -> Self {
        info!("Vision pipeline ready (detector: {})", detector.name());
        Self {
            camera,
            detector,
            rotation: camera_config.rotation,
            confidence_threshold: detection_config.confidence_threshold,
            max_detections: detection_config.max_detections,
        }
    }

    /// Capture and analyse one frame; `Ok(None)` when no frame was available
    pub fn analyze(&mut self) -> Result<Option<DetectionResult>> {
        let frame = match self.camera.capture() {
            Some(frame) => frame.rotated(self.rotation),
            None => return Ok(None),
        };
        let raw = self.detector.detect(&frame)?;
        Ok(Some(DetectionResult::from_raw(
            raw,
            self.confidence_threshold,
            self.max_detections,
        )))
    }

    pub fn release(&mut self) {
        self.camera.release();
    }
}
