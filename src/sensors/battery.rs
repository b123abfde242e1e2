// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Battery level from the kernel power-supply class

use std::path::Path;

const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// Capacity in percent of the first battery found, if any
pub fn battery_level() -> Option<u8> {
    battery_level_in(Path::new(POWER_SUPPLY_ROOT))
}

fn battery_level_in(root: &Path) -> Option<u8> {
    let mut entries: Vec<_> = std::fs::read_dir(root).ok()?.flatten().collect();
    entries.sort_by_key(|e| e.file_name());
    entries.iter().find_map(|entry| {
        let dir = entry.path();
        let kind = std::fs::read_to_string(dir.join("type")).ok()?;
        if kind.trim() != "Battery" {
            return None;
        }
        std::fs::read_to_string(dir.join("capacity"))
            .ok()?
            .trim()
            .parse::<u8>()
            .ok()
            .map(|level| level.min(100))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_root_yields_none() {
        assert_eq!(battery_level_in(Path::new("/nonexistent/power_supply")), None);
    }

    #[test]
    fn test_reads_first_battery() {
        let root = std::env::temp_dir().join(format!("guidecane-battery-{}", std::process::id()));
        let ac = root.join("AC");
        let bat = root.join("BAT0");
        std::fs::create_dir_all(&ac).unwrap();
        std::fs::create_dir_all(&bat).unwrap();
        std::fs::write(ac.join("type"), "Mains\n").unwrap();
        std::fs::write(bat.join("type"), "Battery\n").unwrap();
        std::fs::write(bat.join("capacity"), "85\n").unwrap();

        assert_eq!(battery_level_in(&root), Some(85));
        let _ = std::fs::remove_dir_all(&root);
    }
}
