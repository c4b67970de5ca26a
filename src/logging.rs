//! Logging setup.
//!
//! The library itself only logs through the [`log`] facade. This turns the `[[logging]]` part of
//! the [`Settings`][crate::settings::Settings] into a logger, if the application wants it.
//!
//! ```toml
//! [[logging]]
//! type = "file"
//! filename = "/var/log/startup.log"
//! level = "info"
//!
//! [logging.per-module]
//! bootstage = "trace"
//! ```

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use chrono::Local;
use fern::Dispatch;
use log::{debug, LevelFilter};
use serde::Deserialize;

use crate::error::AnyError;
use crate::utils;

/// Where to send the logs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LogDestination {
    /// Appended to a file.
    File {
        /// The path to the file.
        filename: PathBuf,
    },
    /// The standard output.
    #[serde(rename = "stdout")]
    StdOut,
    /// The standard error output.
    #[serde(rename = "stderr")]
    StdErr,
}

fn default_level_filter() -> LevelFilter {
    LevelFilter::Error
}

/// One logging destination with its levels.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Logging {
    /// Where to log.
    #[serde(flatten)]
    pub destination: LogDestination,

    /// The level of messages to pass through.
    #[serde(
        default = "default_level_filter",
        deserialize_with = "utils::deserialize_level_filter"
    )]
    pub level: LevelFilter,

    /// Overrides of the level for specific modules.
    #[serde(default, deserialize_with = "utils::deserialize_per_module")]
    pub per_module: HashMap<String, LevelFilter>,
}

impl Logging {
    /// Creates the logger for this destination.
    pub fn create(&self) -> Result<Dispatch, AnyError> {
        let logger = self
            .per_module
            .iter()
            .fold(Dispatch::new().level(self.level), |logger, (module, level)| {
                logger.level_for(module.clone(), *level)
            })
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} {:5} {:30} {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message,
                ))
            });
        match self.destination {
            LogDestination::File { ref filename } => Ok(logger.chain(fern::log_file(filename)?)),
            LogDestination::StdOut => Ok(logger.chain(io::stdout())),
            LogDestination::StdErr => Ok(logger.chain(io::stderr())),
        }
    }
}

/// Combines all the destinations into one logger.
pub fn create<'a, I>(logging: I) -> Result<Dispatch, AnyError>
where
    I: IntoIterator<Item = &'a Logging>,
{
    let mut top = Dispatch::new();
    for sub in logging {
        top = top.chain(sub.create()?);
    }
    Ok(top)
}

/// Creates and installs the global logger.
///
/// Does nothing if there are no destinations. Fails if a global logger is already installed.
pub fn install<'a, I>(logging: I) -> Result<(), AnyError>
where
    I: IntoIterator<Item = &'a Logging>,
{
    let logging = logging.into_iter().collect::<Vec<_>>();
    if logging.is_empty() {
        return Ok(());
    }
    create(logging)?.apply()?;
    debug!("Logging installed");
    Ok(())
}
