//! Paths used by the exported macros.
//!
//! The [`log_error`][crate::log_error] macro reaches the log levels through `$crate`, so users
//! don't need a direct dependency on `log`. Not part of the public API.

pub use log::Level;
