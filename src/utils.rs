//! Various utilities.
//!
//! Mostly the serde helpers for the [`Settings`][crate::settings::Settings] and the logging
//! configuration.

use std::collections::HashMap;
use std::fmt::Display;
use std::time::{Duration, Instant};

use log::{warn, Level, LevelFilter};
use serde::de::{Deserialize, Deserializer, Error as DeError, Unexpected};

const LEVELS: &[&str] = &["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

/// Deserialize an `Option<Duration>` using the [`humantime`] crate.
///
/// This allows reading human-friendly representations of time, like `30s` or `5days`. To act like
/// [`Option`] does when deserializing by default, the `#[serde(default)]` is recommended.
///
/// # Examples
///
/// ```rust
/// # #![allow(dead_code)]
/// use std::time::Duration;
///
/// use serde::Deserialize;
///
/// #[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
/// struct Cfg {
///     #[serde(deserialize_with = "bootstage::utils::deserialize_opt_duration", default)]
///     how_long: Option<Duration>,
/// }
/// ```
pub fn deserialize_opt_duration<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Duration>, D::Error> {
    if let Some(dur) = Option::<String>::deserialize(d)? {
        humantime::parse_duration(&dur)
            .map_err(|_| DeError::invalid_value(Unexpected::Str(&dur), &"Human readable duration"))
            .map(Some)
    } else {
        Ok(None)
    }
}

/// Deserialize a log [`Level`] from its (case insensitive) name.
pub fn deserialize_level<'de, D: Deserializer<'de>>(d: D) -> Result<Level, D::Error> {
    let s = String::deserialize(d)?;
    s.parse()
        .map_err(|_| D::Error::unknown_variant(&s, &LEVELS[1..]))
}

/// Deserialize a [`LevelFilter`] from its (case insensitive) name.
pub fn deserialize_level_filter<'de, D: Deserializer<'de>>(d: D) -> Result<LevelFilter, D::Error> {
    let s = String::deserialize(d)?;
    s.parse().map_err(|_| D::Error::unknown_variant(&s, LEVELS))
}

/// Deserialize a map of module names to [`LevelFilter`]s.
pub fn deserialize_per_module<'de, D>(d: D) -> Result<HashMap<String, LevelFilter>, D::Error>
where
    D: Deserializer<'de>,
{
    HashMap::<String, String>::deserialize(d)?
        .into_iter()
        .map(|(k, v)| {
            let parsed = v
                .parse()
                .map_err(|_| D::Error::unknown_variant(&v, LEVELS))?;
            Ok((k, parsed))
        })
        .collect()
}

/// Runs the closure and warns if it takes longer than the threshold.
///
/// Without a threshold, this only runs the closure.
pub(crate) fn timed<R, P, F>(name: &str, phase: P, threshold: Option<Duration>, f: F) -> R
where
    P: Display,
    F: FnOnce() -> R,
{
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    if is_slow(elapsed, threshold) {
        warn!(
            "{} took {} in the {} phase",
            name,
            humantime::format_duration(elapsed),
            phase
        );
    }
    result
}

/// Should a call taking `elapsed` be reported?
fn is_slow(elapsed: Duration, threshold: Option<Duration>) -> bool {
    threshold.map(|t| elapsed > t).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "deserialize_opt_duration", default)]
        timeout: Option<Duration>,
        #[serde(deserialize_with = "deserialize_level")]
        level: Level,
        #[serde(deserialize_with = "deserialize_level_filter")]
        filter: LevelFilter,
        #[serde(deserialize_with = "deserialize_per_module", default)]
        modules: HashMap<String, LevelFilter>,
    }

    fn sample(cfg: &str) -> Result<Sample, config::ConfigError> {
        let mut config = config::Config::new();
        config.merge(config::File::from_str(cfg, config::FileFormat::Toml))?;
        config.try_into()
    }

    #[test]
    fn parse_helpers() {
        let parsed = sample(
            r#"
            timeout = "1m 30s"
            level = "warn"
            filter = "OFF"
            [modules]
            hyper = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(Some(Duration::from_secs(90)), parsed.timeout);
        assert_eq!(Level::Warn, parsed.level);
        assert_eq!(LevelFilter::Off, parsed.filter);
        assert_eq!(Some(&LevelFilter::Debug), parsed.modules.get("hyper"));

        let parsed = sample("level = 'info'\nfilter = 'trace'").unwrap();
        assert!(parsed.timeout.is_none());
        assert!(parsed.modules.is_empty());
    }

    #[test]
    fn parse_helpers_reject() {
        assert!(sample("timeout = 'soon'\nlevel = 'info'\nfilter = 'off'").is_err());
        // Off is fine as a filter, not as a level
        assert!(sample("level = 'off'\nfilter = 'off'").is_err());
        assert!(sample("level = 'info'\nfilter = 'loud'").is_err());
    }

    #[test]
    fn timed_returns_result() {
        assert_eq!(42, timed("quick", "test", None, || 42));
        let slow = timed("slow", "test", Some(Duration::from_millis(1)), || {
            thread::sleep(Duration::from_millis(5));
            "done"
        });
        assert_eq!("done", slow);
    }

    #[test]
    fn slowness() {
        let ms = Duration::from_millis;
        assert!(is_slow(ms(20), Some(ms(10))));
        assert!(!is_slow(ms(10), Some(ms(10))));
        assert!(!is_slow(ms(5), Some(ms(10))));
        assert!(!is_slow(ms(5_000), None));
    }
}
