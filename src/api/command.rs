use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{core::mode::Mode, prelude::*, store};

/// The document the device client watches for mode changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ModeCommand {
    mode: Mode,
    device_name: String,
    since: DateTime<Utc>,
}

/// Where mode commands go. The production sink is the cloud device client;
/// this seam keeps it out of the planner.
pub trait CommandSink {
    /// Returns whether a command was actually emitted (only transitions are).
    fn command_mode(&mut self, mode: Mode, now: DateTime<Utc>) -> Result<bool>;
}

/// Writes the command document, de-duplicating repeated modes.
#[derive(Debug)]
pub struct FileCommandSink {
    path: PathBuf,
    last: Option<Mode>,
}

impl FileCommandSink {
    pub fn new(path: PathBuf) -> Self {
        let last = store::read_json::<ModeCommand>(&path)
            .ok()
            .flatten()
            .map(|command| command.mode);
        Self { path, last }
    }
}

impl CommandSink for FileCommandSink {
    fn command_mode(&mut self, mode: Mode, now: DateTime<Utc>) -> Result<bool> {
        if self.last == Some(mode) {
            return Ok(false);
        }
        store::write_json(&self.path, &ModeCommand {
            mode,
            device_name: mode.device_name().to_string(),
            since: now,
        })?;
        info!(%mode, "commanded a mode transition");
        self.last = Some(mode);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn repeated_modes_are_not_rewritten() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("mode_command.json");
        let mut sink = FileCommandSink::new(path.clone());
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap();
        assert!(sink.command_mode(Mode::HomeUps, now).unwrap());
        assert!(!sink.command_mode(Mode::HomeUps, now).unwrap());
        assert!(sink.command_mode(Mode::HomeI, now).unwrap());

        // A fresh sink remembers the last command from disk.
        let mut restored = FileCommandSink::new(path);
        assert!(!restored.command_mode(Mode::HomeI, now).unwrap());
    }
}
