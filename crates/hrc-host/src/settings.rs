//! TOML-backed settings store. Holds the single flag the protocol layer
//! cares about, under the key the desktop application uses.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use hrc_core::settings::SettingsStore;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default, rename = "playbackAPI")]
    playback_api: bool,
}

pub struct FileSettings {
    path: PathBuf,
    enabled: AtomicBool,
}

impl FileSettings {
    /// Read the settings file, falling back to defaults when it is missing
    /// or unreadable.
    pub fn load(path: &Path) -> Self {
        let file = match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str::<SettingsFile>(&raw).unwrap_or_else(|error| {
                warn!(path = %path.display(), %error, "settings file unreadable; using defaults");
                SettingsFile::default()
            }),
            Err(_) => SettingsFile::default(),
        };
        Self {
            path: path.to_owned(),
            enabled: AtomicBool::new(file.playback_api),
        }
    }

    fn persist(&self) {
        let file = SettingsFile {
            playback_api: self.enabled.load(Ordering::Acquire),
        };
        let raw = match toml::to_string_pretty(&file) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "failed to serialize settings");
                return;
            }
        };
        if let Err(error) = std::fs::write(&self.path, raw) {
            warn!(path = %self.path.display(), %error, "failed to write settings");
        }
    }
}

impl SettingsStore for FileSettings {
    fn remote_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_remote_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        self.persist();
    }
}
