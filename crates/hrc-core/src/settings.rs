//! Persisted-settings collaborator.
//!
//! The remote API is opt-in; the hosting application persists the enable
//! flag wherever it keeps its settings. The host binary ships a TOML-file
//! store; [`MemorySettings`] backs tests and embedders that manage
//! persistence themselves.

use std::sync::atomic::{AtomicBool, Ordering};

/// Access to the persisted remote-API settings.
pub trait SettingsStore: Send + Sync {
    /// Whether the remote API should be running.
    fn remote_enabled(&self) -> bool;

    /// Persist the enable flag. Persistence failures are the store's own
    /// concern (log and carry on); the toggle must not fail the caller.
    fn set_remote_enabled(&self, enabled: bool);
}

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct MemorySettings {
    enabled: AtomicBool,
}

impl MemorySettings {
    pub fn new(enabled: bool) -> Self {
        Self { enabled: AtomicBool::new(enabled) }
    }
}

impl SettingsStore for MemorySettings {
    fn remote_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_remote_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_settings_round_trip() {
        let settings = MemorySettings::default();
        assert!(!settings.remote_enabled());
        settings.set_remote_enabled(true);
        assert!(settings.remote_enabled());
        settings.set_remote_enabled(false);
        assert!(!settings.remote_enabled());
    }
}
