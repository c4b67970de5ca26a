#![doc(
    html_root_url = "https://docs.rs/bootstage/0.1.0/bootstage/",
    test(attr(deny(warnings)))
)]
#![allow(clippy::type_complexity)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Staged, deterministic startup of a component registry.
//!
//! An application puts definitions of its components into a [`Registry`]. Some of the components
//! are extensions of the startup itself:
//!
//! * [`RegistryMutator`]s add more definitions (possibly more mutators).
//! * [`RegistryConfigurer`]s adjust the definitions once they are all known.
//! * [`Interceptor`]s wrap the construction of all the other components.
//! * [`Listener`]s get notified about the startup progress.
//!
//! The crate decides *when* and *in what order* these run. Mutators run until no new ones appear,
//! each exactly once. Everything runs in the order of the declared [`Tier`]s (eager ones first,
//! then ordered ones by their order value, then the rest), unless a custom [`Comparator`] is set.
//! The first error aborts the startup.
//!
//! The parts can be used separately:
//!
//! * [`pipeline::invoke_extensions`] runs the mutators and configurers.
//! * [`interceptors::install_interceptors`] builds the interceptor chain.
//! * [`tier::sort`] is the shared ordering.
//!
//! Or all at once, through the [`Builder`].
//!
//! # Features
//!
//! * `ini`, `json`, `hjson`, `yaml`: support for given configuration formats in the
//!   [`cfg_loader`].
//!
//! # Examples
//!
//! ```rust
//! use bootstage::prelude::*;
//!
//! /// Registers a component the application itself doesn't know about.
//! struct Plugin;
//!
//! impl RegistryConfigurer for Plugin {
//!     fn configure(&self, _: &mut Registry) -> Result<(), AnyError> {
//!         Ok(())
//!     }
//! }
//!
//! impl RegistryMutator for Plugin {
//!     fn mutate_registry(&self, registry: &mut Registry) -> Result<(), AnyError> {
//!         registry.register("plugin.greeting", Definition::value("Hello".to_owned()));
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), AnyError> {
//!     let context = Builder::new()
//!         .define("plugin", Definition::mutator(|_| Plugin).tier(Tier::Eager(0)))
//!         .build()?;
//!     assert_eq!("Hello", *context.get::<String>("plugin.greeting")?);
//!     Ok(())
//! }
//! ```
//!
//! [`RegistryMutator`]: component::RegistryMutator
//! [`RegistryConfigurer`]: component::RegistryConfigurer
//! [`Interceptor`]: component::Interceptor
//! [`Listener`]: component::Listener
//! [`Comparator`]: tier::Comparator

pub mod cfg_loader;
pub mod component;
pub mod context;
pub mod error;
pub mod interceptors;
pub mod logging;
#[doc(hidden)]
pub mod macro_support;
pub mod pipeline;
pub mod registry;
pub mod settings;
#[cfg(test)]
mod testing;
pub mod tier;
pub mod utils;

pub use crate::context::{Builder, Context, Extensible, Module};
pub use crate::error::AnyError;
pub use crate::registry::{Definition, Registry};
pub use crate::settings::Settings;
pub use crate::tier::Tier;

/// The prelude.
///
/// To use the crate effectively, a lot of traits and types need to be imported. This brings them
/// all in at once:
///
/// ```rust
/// # #![allow(unused_imports)]
/// use bootstage::prelude::*;
/// ```
pub mod prelude {
    pub use super::component::{
        Component, Event, Extension, Interceptor, Kind, Listener, RegistryConfigurer,
        RegistryMutator, Role,
    };
    pub use super::context::{Builder, Context, Extensible, Module};
    pub use super::error::AnyError;
    pub use super::registry::{Definition, Merged, Registry};
    pub use super::settings::Settings;
    pub use super::tier::Tier;
}
