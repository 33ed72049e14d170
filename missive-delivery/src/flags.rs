//! Process-wide switches read at the top of each pipeline stage.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;

/// Initial values for [`ControlFlags`], loaded from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SendingConfig {
    /// When false every claimed job is cancelled instead of sent.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Jobs run through the pipeline but are cancelled instead of handed
    /// to the transport.
    #[serde(default)]
    pub demo_mode: bool,

    /// Claimed jobs are left untouched by the pipeline.
    #[serde(default)]
    pub pause_all: bool,

    /// Envelope sender for every outgoing message
    #[serde(default = "defaults::from_address")]
    pub from_address: String,
}

impl Default for SendingConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            demo_mode: false,
            pause_all: false,
            from_address: defaults::from_address(),
        }
    }
}

mod defaults {
    pub const fn enabled() -> bool {
        true
    }

    pub fn from_address() -> String {
        "Letters <letters@example.com>".to_string()
    }
}

/// Shared mutable switches. Construct once and hand out as `Arc<ControlFlags>`.
#[derive(Debug, Default)]
pub struct ControlFlags {
    paused: AtomicBool,
    sending_enabled: AtomicBool,
    demo_mode: AtomicBool,
    pause_all: AtomicBool,
}

impl ControlFlags {
    #[must_use]
    pub fn new(config: &SendingConfig) -> Self {
        Self {
            paused: AtomicBool::new(false),
            sending_enabled: AtomicBool::new(config.enabled),
            demo_mode: AtomicBool::new(config.demo_mode),
            pause_all: AtomicBool::new(config.pause_all),
        }
    }

    /// Dispatch ticks become no-ops while paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn sending_enabled(&self) -> bool {
        self.sending_enabled.load(Ordering::SeqCst)
    }

    pub fn set_sending_enabled(&self, enabled: bool) {
        self.sending_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn demo_mode(&self) -> bool {
        self.demo_mode.load(Ordering::SeqCst)
    }

    pub fn set_demo_mode(&self, demo: bool) {
        self.demo_mode.store(demo, Ordering::SeqCst);
    }

    pub fn pause_all(&self) -> bool {
        self.pause_all.load(Ordering::SeqCst)
    }

    pub fn set_pause_all(&self, pause: bool) {
        self.pause_all.store(pause, Ordering::SeqCst);
    }

    pub fn set(&self, flag: Flag, value: bool) {
        match flag {
            Flag::Paused => self.set_paused(value),
            Flag::SendingEnabled => self.set_sending_enabled(value),
            Flag::DemoMode => self.set_demo_mode(value),
            Flag::PauseAll => self.set_pause_all(value),
        }
    }

    #[must_use]
    pub fn state(&self) -> FlagState {
        FlagState {
            paused: self.is_paused(),
            sending_enabled: self.sending_enabled(),
            demo_mode: self.demo_mode(),
            pause_all: self.pause_all(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Paused,
    SendingEnabled,
    DemoMode,
    PauseAll,
}

/// Point-in-time copy of every flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagState {
    pub paused: bool,
    pub sending_enabled: bool,
    pub demo_mode: bool,
    pub pause_all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_from_config() {
        let config = SendingConfig {
            demo_mode: true,
            ..SendingConfig::default()
        };
        let flags = ControlFlags::new(&config);

        assert!(flags.sending_enabled());
        assert!(flags.demo_mode());
        assert!(!flags.pause_all());
        assert!(!flags.is_paused());

        flags.set(Flag::PauseAll, true);
        assert!(flags.state().pause_all);

        flags.set_paused(true);
        assert!(flags.is_paused());
    }

    #[test]
    fn config_defaults() {
        let config: SendingConfig = ron::from_str("()").unwrap();
        assert!(config.enabled);
        assert!(!config.demo_mode);
        assert_eq!(config.from_address, "Letters <letters@example.com>");
    }
}
