// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Linux sysfs GPIO backend

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Gpio, Level};
use crate::{Error, Result};

struct PinHandle {
    value: File,
    output: bool,
}

/// GPIO through `/sys/class/gpio`
pub struct SysfsGpio {
    root: PathBuf,
    pins: Mutex<HashMap<u8, PinHandle>>,
}

impl SysfsGpio {
    pub fn new(root: &Path) -> Result<Self> {
        if !root.join("export").exists() {
            return Err(Error::hardware(format!("no GPIO controller at {:?}", root)));
        }
        info!("Using sysfs GPIO at {:?}", root);
        Ok(Self {
            root: root.to_path_buf(),
            pins: Mutex::new(HashMap::new()),
        })
    }

    fn pin_dir(&self, pin: u8) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn export(&self, pin: u8, direction: &str) -> Result<File> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            write_file(&self.root.join("export"), &pin.to_string())?;
        }

        // udev may need a moment to fix permissions on a fresh export
        let mut last_err = None;
        for _ in 0..20 {
            match write_file(&dir.join("direction"), direction) {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
        if let Some(e) = last_err {
            return Err(e);
        }

        OpenOptions::new()
            .read(true)
            .write(direction == "out")
            .open(dir.join("value"))
            .map_err(|e| Error::hardware(format!("gpio{} value: {}", pin, e)))
    }

    fn setup(&self, pin: u8, output: bool) -> Result<()> {
        let value = self.export(pin, if output { "out" } else { "in" })?;
        self.pins.lock().insert(pin, PinHandle { value, output });
        debug!("gpio{} configured as {}", pin, if output { "output" } else { "input" });
        Ok(())
    }
}

impl Gpio for SysfsGpio {
    fn setup_output(&self, pin: u8) -> Result<()> {
        self.setup(pin, true)?;
        self.set_output(pin, Level::Low)
    }

    fn setup_input(&self, pin: u8) -> Result<()> {
        self.setup(pin, false)
    }

    fn set_output(&self, pin: u8, level: Level) -> Result<()> {
        let mut pins = self.pins.lock();
        let handle = pins
            .get_mut(&pin)
            .filter(|h| h.output)
            .ok_or_else(|| Error::hardware(format!("gpio{} is not an output", pin)))?;
        let byte = if level.is_high() { b"1" } else { b"0" };
        handle
            .value
            .write_all(byte)
            .and_then(|_| handle.value.flush())
            .map_err(|e| Error::hardware(format!("gpio{} write: {}", pin, e)))
    }

    fn read_input(&self, pin: u8) -> Result<Level> {
        let mut pins = self.pins.lock();
        let handle = pins
            .get_mut(&pin)
            .ok_or_else(|| Error::hardware(format!("gpio{} not configured", pin)))?;
        let mut buf = [0u8; 1];
        handle
            .value
            .seek(SeekFrom::Start(0))
            .and_then(|_| handle.value.read_exact(&mut buf))
            .map_err(|e| Error::hardware(format!("gpio{} read: {}", pin, e)))?;
        Ok(if buf[0] == b'1' { Level::High } else { Level::Low })
    }

    fn release(&self) {
        let mut pins = self.pins.lock();
        for (pin, handle) in pins.iter_mut() {
            if handle.output {
                let _ = handle.value.write_all(b"0");
            }
            if let Err(e) = write_file(&self.root.join("unexport"), &pin.to_string()) {
                warn!("Failed to unexport gpio{}: {}", pin, e);
            }
        }
        pins.clear();
        info!("GPIO released");
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::hardware(format!("{:?}: {}", path, e)))?;
    file.write_all(content.as_bytes())
        .map_err(|e| Error::hardware(format!("{:?}: {}", path, e)))
}
