//! Configuration loading.
//!
//! The [`Settings`][crate::settings::Settings] (or the application's own configuration embedding
//! them) may need to be combined from multiple sources: defaults compiled into the program,
//! multiple files, directories with files, environment variables and explicit overrides. Later
//! sources win.
//!
//! The lifetime of loading is:
//!
//! 1. Create a [`Builder`] with [`Builder::new`].
//! 2. Configure it.
//! 3. Turn it into a [`Loader`] with [`build`][Builder::build].
//! 4. Load (even as many times as needed) the configuration using [`load`][Loader::load].
//!
//! # Examples
//!
//! ```rust
//! use bootstage::cfg_loader::Builder;
//! use bootstage::settings::Settings;
//! use bootstage::AnyError;
//!
//! fn main() -> Result<(), AnyError> {
//!     let mut loader = Builder::new()
//!         .defaults("eager-init = false")
//!         .env("STARTUP")
//!         .build();
//!     let settings: Settings = loader.load()?;
//!     assert!(!settings.eager_init);
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::ffi::OsString;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use err_context::prelude::*;
use fallible_iterator::FallibleIterator;
use log::{debug, trace, warn};
use serde::de::DeserializeOwned;

use crate::error::AnyError;

/// An error returned whenever the user passes something not a file nor a directory as
/// configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidFileType(pub PathBuf);

impl Display for InvalidFileType {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(
            fmt,
            "Configuration path {} is not a file nor a directory",
            self.0.display()
        )
    }
}

impl Error for InvalidFileType {}

/// Returned if configuration path is missing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MissingFile(pub PathBuf);

impl Display for MissingFile {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Configuration path {} does not exist", self.0.display())
    }
}

impl Error for MissingFile {}

/// A builder for [`Loader`].
///
/// See the [module documentation](index.html) for details about the use.
pub struct Builder {
    paths: Vec<PathBuf>,
    defaults: Option<String>,
    env: Option<String>,
    overrides: BTreeMap<String, String>,
    filter: Box<dyn FnMut(&Path) -> bool + Send>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Creates a new config loader builder.
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            defaults: None,
            env: None,
            overrides: BTreeMap::new(),
            filter: Box::new(|_| false),
        }
    }

    /// Sets the configuration paths.
    ///
    /// This replaces any previously set paths. If none are set, no files are loaded (but it is not
    /// an error, simply the defaults will be used).
    pub fn paths<P, I>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths = paths.into_iter().map(Into::into).collect();
        Self { paths, ..self }
    }

    /// Specifies the default configuration.
    ///
    /// This "loads" the lowest layer of the configuration from the passed string. The expected
    /// format is TOML.
    pub fn defaults<D: Into<String>>(self, config: D) -> Self {
        Self {
            defaults: Some(config.into()),
            ..self
        }
    }

    /// Enables loading configuration from environment variables.
    ///
    /// After loading the files, variables with the provided prefix are merged into the
    /// configuration. With the `STARTUP` prefix, `STARTUP_DETECTOR=false` sets the `detector`
    /// field.
    pub fn env<E: Into<String>>(self, env: E) -> Self {
        Self {
            env: Some(env.into()),
            ..self
        }
    }

    /// Overrides a single value, on top of everything else.
    ///
    /// The key is a dotted path (eg. `guard.level`).
    pub fn override_value<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Configures a config dir filter for a single extension.
    ///
    /// Sets the config directory filter (see [`filter`][Builder::filter]) to one matching this
    /// single extension.
    pub fn ext<E: Into<OsString>>(self, ext: E) -> Self {
        let ext = ext.into();
        Self {
            filter: Box::new(move |path| path.extension() == Some(&ext)),
            ..self
        }
    }

    /// Configures a config dir filter for multiple extensions.
    pub fn exts<I, E>(self, exts: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<OsString>,
    {
        let exts = exts.into_iter().map(Into::into).collect::<HashSet<_>>();
        Self {
            filter: Box::new(move |path| {
                path.extension()
                    .map(|ext| exts.contains(ext))
                    .unwrap_or(false)
            }),
            ..self
        }
    }

    /// Sets a configuration dir filter.
    ///
    /// If a path is a directory, the files directly inside it passing this filter are merged into
    /// the configuration, in the lexicographical order of their names. Subdirectories are not
    /// traversed.
    ///
    /// The default filter passes no files, so directories are ignored by default.
    pub fn filter<F: FnMut(&Path) -> bool + Send + 'static>(self, filter: F) -> Self {
        Self {
            filter: Box::new(filter),
            ..self
        }
    }

    /// Turns the builder into the [`Loader`].
    pub fn build(self) -> Loader {
        debug!("Created cfg loader with {} paths", self.paths.len());
        Loader {
            files: self.paths,
            defaults: self.defaults,
            env: self.env,
            overrides: self.overrides,
            filter: self.filter,
        }
    }
}

/// The loader of configuration.
///
/// This is created by the [`Builder`]. See the [module documentation](index.html) for details.
pub struct Loader {
    files: Vec<PathBuf>,
    defaults: Option<String>,
    env: Option<String>,
    overrides: BTreeMap<String, String>,
    filter: Box<dyn FnMut(&Path) -> bool + Send>,
}

impl Loader {
    fn scan_dir(&mut self, path: &Path) -> Result<Vec<PathBuf>, AnyError> {
        let filter = &mut self.filter;
        let mut files = fallible_iterator::convert(path.read_dir()?)
            .filter_map(|entry| -> Result<Option<PathBuf>, std::io::Error> {
                let path = entry.path();
                let meta = path.symlink_metadata()?;
                if meta.is_file() && (filter)(&path) {
                    Ok(Some(path))
                } else {
                    trace!("Skipping {}", path.display());
                    Ok(None)
                }
            })
            .collect::<Vec<_>>()?;
        files.sort();
        Ok(files)
    }

    /// Loads the configuration.
    ///
    /// Keys not used by the target structure are logged as warnings. Decoding errors carry the
    /// path of the offending key.
    pub fn load<C: DeserializeOwned>(&mut self) -> Result<C, AnyError> {
        debug!("Loading configuration");
        let mut config = Config::new();
        // Without any source, the config is a unit and that doesn't decode into a struct.
        config.merge(File::from_str("", FileFormat::Toml))?;
        if let Some(ref defaults) = self.defaults {
            trace!("Loading config defaults");
            config
                .merge(File::from_str(defaults, FileFormat::Toml))
                .context("Failed to read defaults")?;
        }
        for path in self.files.clone() {
            if path.is_file() {
                trace!("Loading config file {}", path.display());
                config
                    .merge(File::from(&path as &Path))
                    .with_context(|_| format!("Failed to load config file {}", path.display()))?;
            } else if path.is_dir() {
                trace!("Scanning directory {}", path.display());
                for file in self.scan_dir(&path)? {
                    trace!("Loading config file {}", file.display());
                    config
                        .merge(File::from(&file as &Path))
                        .with_context(|_| {
                            format!("Failed to load config file {}", file.display())
                        })?;
                }
            } else if path.exists() {
                return Err(InvalidFileType(path).into());
            } else {
                return Err(MissingFile(path).into());
            }
        }
        if let Some(env_prefix) = self.env.as_ref() {
            trace!("Loading config from environment {}", env_prefix);
            config
                .merge(Environment::with_prefix(env_prefix).separator("_"))
                .context("Failed to include environment in config")?;
        }
        for (key, value) in &self.overrides {
            trace!("Config override {} => {}", key, value);
            config
                .set(key, value.as_str())
                .with_context(|_| {
                    format!("Failed to push override {}={} into config", key, value)
                })?;
        }

        let mut ignored = Vec::new();
        let result = {
            let mut track = |path: serde_ignored::Path| ignored.push(path.to_string());
            let deserializer = serde_ignored::Deserializer::new(config, &mut track);
            serde_path_to_error::deserialize(deserializer)
                .context("Failed to decode configuration")?
        };
        for path in ignored {
            warn!("Unused configuration key {}", path);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde::Deserialize;

    use super::*;
    use crate::settings::Settings;

    #[derive(Debug, Default, Deserialize)]
    struct Cfg {
        #[serde(default)]
        message: String,
        #[serde(default)]
        count: u32,
    }

    struct TmpDir(PathBuf);

    impl TmpDir {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "bootstage-cfg-{}-{}",
                name,
                std::process::id()
            ));
            fs::create_dir_all(&path).unwrap();
            TmpDir(path)
        }
    }

    impl Drop for TmpDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn nothing() {
        let cfg: Cfg = Builder::new().build().load().unwrap();
        assert!(cfg.message.is_empty());
        assert_eq!(0, cfg.count);
    }

    #[test]
    fn layers() {
        let dir = TmpDir::new("layers");
        let conf_d = dir.0.join("conf.d");
        fs::create_dir_all(&conf_d).unwrap();
        fs::write(dir.0.join("main.toml"), "message = 'file'\ncount = 1").unwrap();
        fs::write(conf_d.join("b.toml"), "count = 3").unwrap();
        fs::write(conf_d.join("a.toml"), "count = 2\nmessage = 'dir'").unwrap();
        fs::write(conf_d.join("c.txt"), "this is not toml").unwrap();

        let cfg: Cfg = Builder::new()
            .defaults("message = 'default'")
            .paths(vec![dir.0.join("main.toml"), conf_d])
            .ext("toml")
            .build()
            .load()
            .unwrap();
        assert_eq!("dir", cfg.message);
        assert_eq!(3, cfg.count);

        let cfg: Cfg = Builder::new()
            .paths(vec![dir.0.join("main.toml")])
            .override_value("count", "42")
            .build()
            .load()
            .unwrap();
        assert_eq!("file", cfg.message);
        assert_eq!(42, cfg.count);
    }

    #[test]
    fn missing_path() {
        let dir = TmpDir::new("missing");
        let err = Builder::new()
            .paths(vec![dir.0.join("nope.toml")])
            .build()
            .load::<Cfg>()
            .unwrap_err();
        assert_eq!(
            &MissingFile(dir.0.join("nope.toml")),
            err.downcast_ref::<MissingFile>().unwrap()
        );
    }

    #[test]
    fn settings_from_defaults() {
        let settings: Settings = Builder::new()
            .defaults("detector = false\n[guard]\nlevel = 'warn'\nunknown = 1")
            .override_value("slow-extension", "2s")
            .build()
            .load()
            .unwrap();
        assert!(!settings.detector);
        assert_eq!(log::Level::Warn, settings.guard.level);
        assert_eq!(
            Some(std::time::Duration::from_secs(2)),
            settings.slow_extension
        );
    }

    #[test]
    fn decode_error() {
        let err = Builder::new()
            .defaults("count = 'many'")
            .build()
            .load::<Cfg>()
            .unwrap_err();
        assert!(err.to_string().contains("Failed to decode configuration"));
    }
}
