//! The whole startup, put together.
//!
//! The [`Builder`] collects the definitions, the manual extensions and the [`Settings`]. Its
//! [`build`][Builder::build] then runs the startup extensions, installs the interceptors, creates
//! the eager components and hands out a running [`Context`].
//!
//! The [`Extensible`] trait describes the interface for setting up the builder. It is also
//! implemented for `Result`s containing the builder. This allows chaining the setup without
//! manually handling the errors, they get returned by the final [`build`][Builder::build].
//!
//! Libraries may want to provide bits of functionality that need to register several definitions
//! at once. This is described by the [`Module`] trait.
//!
//! # Examples
//!
//! ```rust
//! use bootstage::prelude::*;
//!
//! struct Greeter;
//!
//! impl RegistryConfigurer for Greeter {
//!     fn configure(&self, registry: &mut Registry) -> Result<(), AnyError> {
//!         if let Some(def) = registry.definition_mut("greeting") {
//!             def.properties_mut().insert("who".to_owned(), "world".to_owned());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), AnyError> {
//!     let context = Builder::new()
//!         .define(
//!             "greeting",
//!             Definition::plain(|m| format!("Hello {}", m.property("who").unwrap_or("nobody"))),
//!         )
//!         .extension("greeter", Extension::configuring(Greeter))
//!         .build()?;
//!     assert_eq!("Hello world", *context.get::<String>("greeting")?);
//!     Ok(())
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use crate::component::{Event, Extension, Kind};
use crate::error::AnyError;
use crate::interceptors::{self, Guard};
use crate::pipeline::{self, ManualExtension};
use crate::registry::{Definition, Registry};
use crate::settings::Settings;
use crate::tier::Comparator;

/// An internal trait to make working uniformly with the [`Builder`] and `Result<Builder,
/// AnyError>` possible.
///
/// You should not need to interact with the trait directly.
pub trait IntoResult<T>: Sized {
    /// Turns self into the result.
    fn into_result(self) -> Result<T, AnyError>;
}

impl<T> IntoResult<T> for Result<T, AnyError> {
    fn into_result(self) -> Result<T, AnyError> {
        self
    }
}

impl<T> IntoResult<T> for T {
    fn into_result(self) -> Result<T, AnyError> {
        Ok(self)
    }
}

/// A bundle of setup applied to the builder in one go.
///
/// There's an implementation for `FnOnce(Builder) -> Builder` (or `-> Result<Builder,
/// AnyError>`), so modules can be either custom types or just closures.
///
/// # Examples
///
/// ```rust
/// use bootstage::prelude::*;
///
/// fn database<E: Extensible<Ok = E>>(builder: E) -> E {
///     builder
///         .define("db.url", Definition::value("sqlite::memory:".to_owned()))
///         .define("db.pool-size", Definition::value(4usize))
/// }
///
/// let context = Builder::new().with(database).build().unwrap();
/// assert_eq!(4, *context.get::<usize>("db.pool-size").unwrap());
/// ```
pub trait Module<B> {
    /// Performs the setup on the given builder.
    fn apply(self, builder: B) -> Result<B, AnyError>;
}

impl<B, F, R> Module<B> for F
where
    F: FnOnce(B) -> R,
    R: IntoResult<B>,
{
    fn apply(self, builder: B) -> Result<B, AnyError> {
        self(builder).into_result()
    }
}

/// An interface for setting up the startup.
///
/// Implemented by the [`Builder`] and `Result<Builder, AnyError>`. On the latter, everything is
/// skipped once an error happened and the error is passed on.
pub trait Extensible: Sized {
    /// The type returned when the operation may fail.
    type Ok;

    /// Registers a definition.
    ///
    /// Defining the same name again replaces the previous definition.
    fn define<N: Into<String>>(self, name: N, definition: Definition) -> Self;

    /// Adds a manual extension.
    ///
    /// These run before the extensions found in the registry and in the order they were added.
    fn extension<N: Into<String>>(self, name: N, extension: Extension) -> Self;

    /// Sets a custom comparator to sort the extensions and interceptors with.
    fn comparator(self, comparator: Comparator) -> Self;

    /// Replaces the settings.
    fn settings(self, settings: Settings) -> Self;

    /// Applies a [`Module`].
    fn with<M>(self, module: M) -> Result<Self::Ok, AnyError>
    where
        M: Module<Self::Ok>;

    /// Checks if this is the first call with the given type.
    ///
    /// The first call with given type returns `true`, any future ones with the same type return
    /// `false`. A higher-level interface is the [`with_singleton`][Extensible::with_singleton]
    /// method.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bootstage::prelude::*;
    ///
    /// let mut builder = Builder::new();
    ///
    /// struct X;
    /// struct Y;
    ///
    /// assert!(builder.singleton::<X>());
    /// assert!(!builder.singleton::<X>());
    /// assert!(builder.singleton::<Y>());
    /// ```
    fn singleton<T: 'static>(&mut self) -> bool;

    /// Applies the first [`Module`] of the same type.
    ///
    /// Other instances of the same type are ignored, so the first one wins.
    fn with_singleton<T>(self, singleton: T) -> Result<Self::Ok, AnyError>
    where
        T: Module<Self::Ok> + 'static;
}

impl<C> Extensible for Result<C, AnyError>
where
    C: Extensible<Ok = C>,
{
    type Ok = C;

    fn define<N: Into<String>>(self, name: N, definition: Definition) -> Self {
        self.map(|c| c.define(name, definition))
    }

    fn extension<N: Into<String>>(self, name: N, extension: Extension) -> Self {
        self.map(|c| c.extension(name, extension))
    }

    fn comparator(self, comparator: Comparator) -> Self {
        self.map(|c| c.comparator(comparator))
    }

    fn settings(self, settings: Settings) -> Self {
        self.map(|c| c.settings(settings))
    }

    fn with<M>(self, module: M) -> Result<C, AnyError>
    where
        M: Module<C>,
    {
        self.and_then(|c| c.with(module))
    }

    fn singleton<T: 'static>(&mut self) -> bool {
        // Errored out, so nothing more is going to happen anyway.
        self.as_mut()
            .map(Extensible::singleton::<T>)
            .unwrap_or_default()
    }

    fn with_singleton<T>(self, singleton: T) -> Result<C, AnyError>
    where
        T: Module<C> + 'static,
    {
        self.and_then(|c| c.with_singleton(singleton))
    }
}

/// The builder of the [`Context`].
///
/// See the [module documentation](index.html).
#[derive(Debug, Default)]
pub struct Builder {
    registry: Registry,
    manual: Vec<ManualExtension>,
    settings: Settings,
    singletons: HashSet<TypeId>,
}

impl Builder {
    /// Creates an empty builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the startup.
    ///
    /// In this order:
    ///
    /// 1. All the startup extensions (see [`invoke_extensions`][pipeline::invoke_extensions]).
    /// 2. The interceptors are installed (see
    ///    [`install_interceptors`][interceptors::install_interceptors]).
    /// 3. Unless turned off in the settings, all the non-lazy plain components and listeners are
    ///    created, in the order of registration.
    /// 4. The [`Started`][Event::Started] event is published.
    ///
    /// The first error aborts the startup.
    pub fn build(self) -> Result<Context, AnyError> {
        let Builder {
            mut registry,
            manual,
            settings,
            ..
        } = self;
        debug!(
            "Starting up with {} definitions and {} manual extensions",
            registry.len(),
            manual.len()
        );
        pipeline::invoke_extensions(&mut registry, &manual, &settings)?;
        let installation = interceptors::install_interceptors(&mut registry, &settings)?;
        if settings.eager_init {
            let eager = registry
                .names()
                .filter(|name| {
                    registry
                        .definition(name)
                        .map(|def| {
                            !def.is_lazy() && matches!(def.kind(), Kind::Plain | Kind::Listener)
                        })
                        .unwrap_or(false)
                })
                .map(str::to_owned)
                .collect::<Vec<_>>();
            debug!("Creating {} eager components", eager.len());
            for name in eager {
                registry.instantiate(&name)?;
            }
        }
        let context = Context {
            registry,
            guard: installation.guard,
            closed: false,
        };
        context.publish(&Event::Started)?;
        info!("Startup complete");
        Ok(context)
    }
}

impl Extensible for Builder {
    type Ok = Self;

    fn define<N: Into<String>>(mut self, name: N, definition: Definition) -> Self {
        self.registry.register(name, definition);
        self
    }

    fn extension<N: Into<String>>(mut self, name: N, extension: Extension) -> Self {
        self.manual.push(ManualExtension::new(name, extension));
        self
    }

    fn comparator(mut self, comparator: Comparator) -> Self {
        self.registry.set_comparator(Some(comparator));
        self
    }

    fn settings(self, settings: Settings) -> Self {
        Self { settings, ..self }
    }

    fn with<M>(self, module: M) -> Result<Self, AnyError>
    where
        M: Module<Self>,
    {
        module.apply(self)
    }

    fn singleton<T: 'static>(&mut self) -> bool {
        self.singletons.insert(TypeId::of::<T>())
    }

    fn with_singleton<T>(mut self, singleton: T) -> Result<Self, AnyError>
    where
        T: Module<Self> + 'static,
    {
        if self.singleton::<T>() {
            self.with(singleton)
        } else {
            debug!("Singleton {} already applied", std::any::type_name::<T>());
            Ok(self)
        }
    }
}

/// The started up registry.
///
/// Closed (publishing the [`Closing`][Event::Closing] event) explicitly by
/// [`close`][Context::close] or when dropped.
pub struct Context {
    registry: Registry,
    guard: Option<Arc<Guard>>,
    closed: bool,
}

impl Context {
    /// Access to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable access to the registry.
    ///
    /// Allows creating the lazy components.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Gets an already created plain component.
    ///
    /// Lazy components need to be created through [`registry_mut`][Context::registry_mut] first.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, AnyError> {
        self.registry.created::<T>(name)
    }

    /// Publishes an event to all the listeners.
    pub fn publish(&self, event: &Event) -> Result<(), AnyError> {
        self.registry.publish(event)
    }

    /// Components created before the interceptor chain was complete.
    ///
    /// See [`Guard`].
    pub fn skipped_components(&self) -> Vec<String> {
        self.guard
            .as_ref()
            .map(|guard| guard.flagged())
            .unwrap_or_default()
    }

    /// Publishes the [`Closing`][Event::Closing] event.
    ///
    /// Only the first call does anything.
    pub fn close(&mut self) -> Result<(), AnyError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing");
        self.publish(&Event::Closing)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            crate::log_error!(multi Warn, e);
        }
    }
}
