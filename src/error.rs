//! Error types and error handling utilities.
//!
//! Errors are passed around as [`AnyError`]. The types here are the concrete errors produced by
//! the registry and the startup pipeline, so callers can downcast to them if they care.

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

use err_context::prelude::*;
use log::{log, Level};

pub use err_context::AnyError;

use crate::component::Kind;

/// The part of startup an extension failed in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    /// The [`mutate_registry`][crate::component::RegistryMutator::mutate_registry] callback.
    MutateRegistry,
    /// The [`configure`][crate::component::RegistryConfigurer::configure] callback.
    Configure,
    /// A [`Listener`][crate::component::Listener] reacting to an event.
    Event,
}

impl Display for Phase {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match self {
            Phase::MutateRegistry => write!(fmt, "mutate-registry"),
            Phase::Configure => write!(fmt, "configure"),
            Phase::Event => write!(fmt, "event"),
        }
    }
}

/// An extension returned an error.
///
/// Nothing is retried or skipped. The error aborts the rest of the startup and carries the
/// original error as its source.
#[derive(Debug)]
pub struct ExtensionFailed {
    /// Name of the failed extension.
    pub name: String,
    /// What it was doing.
    pub phase: Phase,
    source: AnyError,
}

impl ExtensionFailed {
    pub(crate) fn new(name: &str, phase: Phase, source: AnyError) -> Self {
        Self {
            name: name.to_owned(),
            phase,
            source,
        }
    }
}

impl Display for ExtensionFailed {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Extension {} failed in the {} phase", self.name, self.phase)
    }
}

impl Error for ExtensionFailed {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.source)
    }
}

/// There's no definition of the requested name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownComponent(pub String);

impl Display for UnknownComponent {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "No component named {}", self.0)
    }
}

impl Error for UnknownComponent {}

/// The component is defined, but wasn't created yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NotCreated(pub String);

impl Display for NotCreated {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Component {} was not created yet", self.0)
    }
}

impl Error for NotCreated {}

/// The component is not of the kind the caller asked for (or the definition declared).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KindMismatch {
    /// Name of the component.
    pub name: String,
    /// The kind that was expected.
    pub expected: Kind,
    /// The kind that was found.
    pub found: Kind,
}

impl Display for KindMismatch {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(
            fmt,
            "Component {} is a {}, expected a {}",
            self.name, self.found, self.expected
        )
    }
}

impl Error for KindMismatch {}

/// A plain component is not of the requested type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WrongType {
    /// Name of the component.
    pub name: String,
    /// The requested type.
    pub expected: &'static str,
}

impl Display for WrongType {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Component {} is not of type {}", self.name, self.expected)
    }
}

impl Error for WrongType {}

/// The parent chain of a definition loops back onto itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParentCycle(pub String);

impl Display for ParentCycle {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Definition {} is its own ancestor", self.0)
    }
}

impl Error for ParentCycle {}

/// A component (indirectly) depends on itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreationCycle(pub String);

impl Display for CreationCycle {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Component {} is already being created", self.0)
    }
}

impl Error for CreationCycle {}

/// How to format errors in logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ErrorLogFormat {
    /// Multi-cause error will span multiple log messages.
    MultiLine,

    /// The error is formatted on a single line.
    ///
    /// The causes are separated by semicolons.
    SingleLine,
}

/// Log one error on given log level.
///
/// It is printed to the log with all the causes.
///
/// This is the low-level version with full customization. You might also be interested in
/// [`log_errors`] or the convenience macro ([`log_error`][macro@log_error]).
pub fn log_error(level: Level, target: &str, e: &AnyError, format: ErrorLogFormat) {
    match format {
        ErrorLogFormat::MultiLine => {
            for cause in e.chain() {
                log!(target: target, level, "{}", cause);
            }
        }
        ErrorLogFormat::SingleLine => {
            log!(target: target, level, "{}", e.display("; "));
        }
    }
}

/// A convenience macro to log an [`AnyError`].
///
/// This logs an [`AnyError`] on given log level as a single line (or multiple lines, with the
/// `multi` prefix). Removes some boilerplate from the [`log_error`] function.
///
/// # Examples
///
/// ```rust
/// use bootstage::error::UnknownComponent;
/// use bootstage::log_error;
///
/// log_error!(Warn, UnknownComponent("database".to_owned()).into());
/// ```
///
/// [`log_error`]: fn@crate::error::log_error
#[macro_export]
macro_rules! log_error {
    ($level: ident, $descr: expr => $err: expr) => {
        $crate::log_error!(@SingleLine, $level, $err.context($descr).into());
    };
    ($level: ident, $err: expr) => {
        $crate::log_error!(@SingleLine, $level, $err);
    };
    (multi $level: ident, $descr: expr => $err: expr) => {
        $crate::log_error!(@MultiLine, $level, $err.context($descr).into());
    };
    (multi $level: ident, $err: expr) => {
        $crate::log_error!(@MultiLine, $level, $err);
    };
    (@$format: ident, $level: ident, $err: expr) => {
        $crate::error::log_error(
            $crate::macro_support::Level::$level,
            module_path!(),
            &$err,
            $crate::error::ErrorLogFormat::$format,
        );
    };
}

/// A wrapper around a fallible function, logging any returned errors.
///
/// The errors are logged in the provided target, in the multi-line fashion, and returned
/// unchanged.
pub fn log_errors<R, F>(target: &str, f: F) -> Result<R, AnyError>
where
    F: FnOnce() -> Result<R, AnyError>,
{
    let result = f();
    if let Err(ref e) = result {
        log_error(Level::Error, target, e, ErrorLogFormat::MultiLine);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_error_macro() {
        let err = UnknownComponent("db".to_owned());
        log_error!(Debug, err.clone().into());
        log_error!(Debug, err.clone().context("Another level").into());
        log_error!(Debug, "Another level" => err.clone());
        let multi_err = err.context("Another level").into();
        log_error!(multi Info, multi_err);
    }

    #[test]
    fn extension_failed_keeps_source() {
        let failed = ExtensionFailed::new(
            "scanner",
            Phase::MutateRegistry,
            UnknownComponent("db".to_owned()).into(),
        );
        assert_eq!(
            "Extension scanner failed in the mutate-registry phase",
            failed.to_string()
        );
        let source = failed.source().expect("Missing source");
        assert_eq!("No component named db", source.to_string());

        let any: AnyError = failed.into();
        assert_eq!(
            "Extension scanner failed in the mutate-registry phase; No component named db",
            any.display("; ").to_string()
        );
    }

    #[test]
    fn log_errors_passes_through() {
        let ok: Result<u8, AnyError> = log_errors(module_path!(), || Ok(42));
        assert_eq!(42, ok.unwrap());
        let err = log_errors::<(), _>(module_path!(), || {
            Err(ParentCycle("child".to_owned()).into())
        })
        .unwrap_err();
        assert!(err.downcast_ref::<ParentCycle>().is_some());
    }
}
