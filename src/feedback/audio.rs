// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Speech queue and synthesizer backends

use std::collections::VecDeque;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Priority, SpeechOutput};
use crate::config::AudioConfig;
use crate::core::Worker;

/// Base words-per-minute at speech rate 1.0
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// Time for a drained worker to finish exiting before it is replaced
const WORKER_EXIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Text-to-speech backend. `say` blocks until the utterance is finished.
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;

    fn say(&self, text: &str) -> Result<()>;
}

/// Synthesizer invoked as an espeak-compatible program
pub struct CommandSpeechEngine {
    program: String,
    language: String,
    amplitude: u32,
    words_per_minute: u32,
}

impl CommandSpeechEngine {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            program: config.command.clone(),
            language: config.language.clone(),
            amplitude: (config.volume.clamp(0.0, 1.0) * 200.0).round() as u32,
            words_per_minute: (BASE_WORDS_PER_MINUTE * config.speech_rate.clamp(0.5, 2.0)).round() as u32,
        }
    }

    fn args(&self, text: &str) -> Vec<String> {
        vec![
            "-v".to_string(),
            self.language.clone(),
            "-a".to_string(),
            self.amplitude.to_string(),
            "-s".to_string(),
            self.words_per_minute.to_string(),
            text.to_string(),
        ]
    }
}

impl SpeechEngine for CommandSpeechEngine {
    fn name(&self) -> &str {
        &self.program
    }

    fn say(&self, text: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(self.args(text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("running {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// Engine that only logs, for demo mode and headless runs
pub struct LogSpeechEngine;

impl SpeechEngine for LogSpeechEngine {
    fn name(&self) -> &str {
        "log"
    }

    fn say(&self, text: &str) -> Result<()> {
        info!("Speech: {}", text);
        Ok(())
    }
}

#[derive(Default)]
struct SpeechQueue {
    pending: VecDeque<String>,
    worker_active: bool,
}

/// Queued speech output.
///
/// Messages are spoken one at a time by a worker thread that is started on
/// demand and exits once the queue is empty.
pub struct AudioFeedback {
    engine: Arc<dyn SpeechEngine>,
    enabled: bool,
    queue: Arc<Mutex<SpeechQueue>>,
    worker: Mutex<Option<Worker>>,
    live_workers: Arc<AtomicUsize>,
}

impl AudioFeedback {
    pub fn new(engine: Arc<dyn SpeechEngine>, enabled: bool) -> Self {
        info!("Speech output: {} ({})", engine.name(), if enabled { "enabled" } else { "disabled" });
        Self {
            engine,
            enabled,
            queue: Arc::new(Mutex::new(SpeechQueue::default())),
            worker: Mutex::new(None),
            live_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Engine chosen from configuration; demo mode only logs
    pub fn from_config(config: &AudioConfig, demo_mode: bool) -> Self {
        let engine: Arc<dyn SpeechEngine> = if demo_mode {
            Arc::new(LogSpeechEngine)
        } else {
            Arc::new(CommandSpeechEngine::new(config))
        };
        Self::new(engine, config.enabled)
    }

    /// Messages waiting to be spoken
    pub fn pending(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// No message queued and no worker running
    pub fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        queue.pending.is_empty() && !queue.worker_active
    }

    /// Speech threads still running
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    /// Poll until idle or `timeout` elapses; returns true when idle
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        true
    }

    fn spawn_worker(&self) {
        // The previous worker has drained the queue and is exiting
        let previous = self.worker.lock().take();
        if let Some(previous) = previous {
            previous.join_timeout(WORKER_EXIT_TIMEOUT);
        }

        let queue = self.queue.clone();
        let engine = self.engine.clone();
        let spawned = Worker::spawn_counted("speech", Some(self.live_workers.clone()), move || loop {
            let text = {
                let mut queue = queue.lock();
                match queue.pending.pop_front() {
                    Some(text) => text,
                    None => {
                        queue.worker_active = false;
                        break;
                    }
                }
            };
            debug!("Speaking: {}", text);
            if let Err(e) = engine.say(&text) {
                warn!("Speech synthesis failed: {:#}", e);
            }
        });

        match spawned {
            Ok(worker) => *self.worker.lock() = Some(worker),
            Err(e) => {
                warn!("Failed to start speech worker: {}", e);
                self.queue.lock().worker_active = false;
            }
        }
    }
}

impl SpeechOutput for AudioFeedback {
    fn speak(&self, text: &str, priority: Priority) {
        if !self.enabled || text.is_empty() {
            return;
        }

        let start_worker = {
            let mut queue = self.queue.lock();
            match priority {
                Priority::Urgent => queue.pending.push_front(text.to_string()),
                Priority::Normal => queue.pending.push_back(text.to_string()),
            }
            !std::mem::replace(&mut queue.worker_active, true)
        };

        if start_worker {
            self.spawn_worker();
        }
    }

    fn stop_all(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.pending.len();
            queue.pending.clear();
            n
        };
        if dropped > 0 {
            debug!("Dropped {} queued messages", dropped);
        }
    }

    fn cleanup(&self) {
        self.stop_all();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // Lets the utterance in progress finish
            worker.join_timeout(Duration::from_secs(5));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{self, Receiver, Sender};

    /// Blocks every utterance until the gate sender is dropped
    struct GatedEngine {
        spoken: Mutex<Vec<String>>,
        started: Sender<()>,
        gate: Receiver<()>,
    }

    impl SpeechEngine for GatedEngine {
        fn name(&self) -> &str {
            "gated"
        }

        fn say(&self, text: &str) -> Result<()> {
            let _ = self.started.try_send(());
            let _ = self.gate.recv();
            if text == "boom" {
                bail!("synthesizer crashed");
            }
            self.spoken.lock().push(text.to_string());
            Ok(())
        }
    }

    fn gated() -> (Arc<GatedEngine>, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = channel::bounded(1);
        let (gate_tx, gate_rx) = channel::bounded(0);
        let engine = Arc::new(GatedEngine {
            spoken: Mutex::new(Vec::new()),
            started: started_tx,
            gate: gate_rx,
        });
        (engine, started_rx, gate_tx)
    }

    fn wait_idle(audio: &AudioFeedback) {
        assert!(audio.wait_idle(Duration::from_secs(2)), "speech queue never drained");
    }

    #[test]
    fn test_urgent_message_jumps_queue() {
        let (engine, started, gate) = gated();
        let audio = AudioFeedback::new(engine.clone(), true);

        audio.speak("premier", Priority::Normal);
        started.recv_timeout(Duration::from_secs(2)).unwrap();
        audio.speak("deuxième", Priority::Normal);
        audio.speak("urgent", Priority::Urgent);
        assert_eq!(audio.pending(), 2);

        drop(gate);
        wait_idle(&audio);
        assert_eq!(*engine.spoken.lock(), vec!["premier", "urgent", "deuxième"]);
    }

    #[test]
    fn test_failure_does_not_stop_queue() {
        let (engine, _started, gate) = gated();
        drop(gate);
        let audio = AudioFeedback::new(engine.clone(), true);

        audio.speak("boom", Priority::Normal);
        audio.speak("après", Priority::Normal);
        wait_idle(&audio);
        assert_eq!(*engine.spoken.lock(), vec!["après"]);

        // A new worker is started after the first one exited
        audio.speak("encore", Priority::Normal);
        wait_idle(&audio);
        assert_eq!(engine.spoken.lock().len(), 2);
    }

    #[test]
    fn test_respawn_reaps_previous_worker() {
        let (engine, _started, gate) = gated();
        drop(gate);
        let audio = AudioFeedback::new(engine.clone(), true);

        for i in 0..5 {
            audio.speak(&format!("message {}", i), Priority::Normal);
            assert!(audio.live_workers() <= 1, "{} speech threads", audio.live_workers());
            wait_idle(&audio);
        }
        assert_eq!(engine.spoken.lock().len(), 5);

        audio.cleanup();
        assert_eq!(audio.live_workers(), 0);
    }

    #[test]
    fn test_stop_all_clears_pending() {
        let (engine, started, gate) = gated();
        let audio = AudioFeedback::new(engine.clone(), true);

        audio.speak("a", Priority::Normal);
        started.recv_timeout(Duration::from_secs(2)).unwrap();
        audio.speak("b", Priority::Normal);
        audio.speak("c", Priority::Normal);
        audio.stop_all();
        assert_eq!(audio.pending(), 0);

        drop(gate);
        wait_idle(&audio);
        assert_eq!(*engine.spoken.lock(), vec!["a"]);
        audio.cleanup();
    }

    #[test]
    fn test_disabled_output_ignores_messages() {
        let (engine, _started, gate) = gated();
        drop(gate);
        let audio = AudioFeedback::new(engine.clone(), false);
        audio.speak("rien", Priority::Urgent);
        assert!(audio.is_idle());
        assert!(engine.spoken.lock().is_empty());
    }

    #[test]
    fn test_command_engine_arguments() {
        let config = AudioConfig {
            volume: 0.5,
            speech_rate: 1.2,
            ..AudioConfig::default()
        };
        let engine = CommandSpeechEngine::new(&config);
        assert_eq!(engine.args("Bonjour"), vec!["-v", "fr", "-a", "100", "-s", "210", "Bonjour"]);
    }
}
