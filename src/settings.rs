//! Knobs of the startup.
//!
//! The [`Settings`] can be deserialized from a configuration file (see the
//! [`cfg_loader`][crate::cfg_loader]), all the fields have sensible defaults.
//!
//! ```toml
//! eager-init = true
//! slow-extension = "500ms"
//! detector = true
//!
//! [guard]
//! enabled = true
//! level = "warn"
//!
//! [[logging]]
//! type = "stderr"
//! level = "debug"
//! ```

use std::time::Duration;

use log::Level;
use serde::Deserialize;

use crate::logging::Logging;
use crate::utils;

fn default_true() -> bool {
    true
}

fn default_guard_level() -> Level {
    Level::Info
}

/// Settings of the interceptor [`Guard`][crate::interceptors::Guard].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct GuardSettings {
    /// Install the guard at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// The log level of the diagnostic about components created before all the interceptors
    /// were installed.
    #[serde(
        default = "default_guard_level",
        deserialize_with = "utils::deserialize_level"
    )]
    pub level: Level,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_guard_level(),
        }
    }
}

/// The startup settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// The guard interceptor.
    #[serde(default)]
    pub guard: GuardSettings,

    /// Install the [`Detector`][crate::interceptors::Detector] of listeners.
    #[serde(default = "default_true")]
    pub detector: bool,

    /// Create all the non-lazy plain components and listeners during the startup.
    #[serde(default = "default_true")]
    pub eager_init: bool,

    /// Warn about extensions taking longer than this.
    #[serde(default, deserialize_with = "utils::deserialize_opt_duration")]
    pub slow_extension: Option<Duration>,

    /// Where to log.
    ///
    /// This is not used by the startup itself, it is up to the application to
    /// [install][crate::logging::install] it.
    #[serde(default)]
    pub logging: Vec<Logging>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            guard: GuardSettings::default(),
            detector: true,
            eager_init: true,
            slow_extension: None,
            logging: Vec::new(),
        }
    }
}
