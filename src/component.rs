//! The things living inside a [`Registry`].
//!
//! Every definition in the registry produces one [`Component`] when first requested. The
//! component is one of a closed set of kinds. Some of them have a special meaning during startup:
//!
//! * [`RegistryMutator`]s may add new definitions to the registry before it is finalized.
//! * [`RegistryConfigurer`]s may adjust the already registered definitions.
//! * [`Interceptor`]s wrap the construction of every component created after they are installed.
//! * [`Listener`]s receive the [`Event`]s published through the registry.
//!
//! Everything else is a plain component, an arbitrary `Any` value.

use std::any::Any;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use crate::error::{AnyError, ExtensionFailed, KindMismatch, Phase};
use crate::registry::{Merged, Registry};

/// The kind of a component.
///
/// This is declared on the [`Definition`][crate::registry::Definition] up front and checked
/// against what the factory produces.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Kind {
    /// A [`RegistryMutator`].
    Mutator,
    /// A [`RegistryConfigurer`].
    Configurer,
    /// An [`Interceptor`].
    Interceptor,
    /// A [`Listener`].
    Listener,
    /// Anything else.
    Plain,
}

impl Display for Kind {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let name = match self {
            Kind::Mutator => "registry mutator",
            Kind::Configurer => "registry configurer",
            Kind::Interceptor => "interceptor",
            Kind::Listener => "listener",
            Kind::Plain => "plain component",
        };
        write!(fmt, "{}", name)
    }
}

/// The role of a component.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    /// Part of the application proper.
    Application,
    /// Internal plumbing.
    ///
    /// These are expected to be created early, so the interceptor guard doesn't complain about
    /// them.
    Infrastructure,
}

impl Default for Role {
    fn default() -> Self {
        Role::Application
    }
}

/// An extension allowed to adjust the registered definitions.
///
/// It runs after all the [`RegistryMutator`]s are done, so it sees the final set of definitions.
/// It is not supposed to register new extensions (if it does, they won't be run).
pub trait RegistryConfigurer: Send + Sync {
    /// Adjusts the registry.
    ///
    /// Any error aborts the startup.
    fn configure(&self, registry: &mut Registry) -> Result<(), AnyError>;
}

/// An extension allowed to add new definitions into the registry.
///
/// The new definitions may be other mutators. These are then picked up and run too, until no new
/// ones appear. Each mutator is also a [`RegistryConfigurer`] and gets its
/// [`configure`][RegistryConfigurer::configure] called once all the mutators are done.
pub trait RegistryMutator: RegistryConfigurer {
    /// Adds or alters definitions.
    ///
    /// Any error aborts the startup.
    fn mutate_registry(&self, registry: &mut Registry) -> Result<(), AnyError>;
}

/// A hook run on the merged view of a definition right before its component is constructed.
///
/// Interceptors providing this are considered internal plumbing and are moved to the end of the
/// interceptor chain.
pub trait MergeHook: Send + Sync {
    /// Inspects or adjusts the merged definition of `name`.
    fn after_merge(&self, merged: &mut Merged, name: &str) -> Result<(), AnyError>;
}

/// Wraps the construction of components.
///
/// Each freshly created component passes through all the installed interceptors, first through
/// all the [`before_construct`][Interceptor::before_construct] ones, then through all the
/// [`after_construct`][Interceptor::after_construct] ones, in the order of the chain. Each may
/// return the same component or replace it by another (wrapped) one of the same kind.
pub trait Interceptor: Send + Sync {
    /// May supply the component instead of its factory.
    ///
    /// Asked in the chain order before the factory runs; the first `Some` wins. A supplied
    /// component skips the factory and all the `before_construct` calls, it still passes through
    /// `after_construct`.
    fn before_instantiate(
        &self,
        _registry: &Registry,
        _merged: &Merged,
        _name: &str,
    ) -> Result<Option<Component>, AnyError> {
        Ok(None)
    }

    /// Called first on a freshly created component.
    fn before_construct(
        &self,
        _registry: &Registry,
        component: Component,
        _name: &str,
    ) -> Result<Component, AnyError> {
        Ok(component)
    }

    /// Called once all the `before_construct` were run.
    fn after_construct(
        &self,
        _registry: &Registry,
        component: Component,
        _name: &str,
    ) -> Result<Component, AnyError> {
        Ok(component)
    }

    /// The merge hook, if this interceptor has one.
    fn merge_hook(&self) -> Option<&dyn MergeHook> {
        None
    }
}

/// Something published through the registry.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Event {
    /// The startup is complete.
    Started,
    /// The context is being closed.
    Closing,
    /// An application-defined event.
    Custom(String),
}

/// A receiver of [`Event`]s.
///
/// Listener components are picked up automatically once constructed, see
/// [`Detector`][crate::interceptors::Detector].
pub trait Listener: Send + Sync {
    /// Reacts to the event.
    fn on_event(&self, event: &Event) -> Result<(), AnyError>;
}

/// An instance produced by the registry.
///
/// Cloning is cheap, it only clones the inner `Arc`.
#[derive(Clone)]
pub enum Component {
    /// See [`RegistryMutator`].
    Mutator(Arc<dyn RegistryMutator>),
    /// See [`RegistryConfigurer`].
    Configurer(Arc<dyn RegistryConfigurer>),
    /// See [`Interceptor`].
    Interceptor(Arc<dyn Interceptor>),
    /// See [`Listener`].
    Listener(Arc<dyn Listener>),
    /// Anything else.
    Plain(Arc<dyn Any + Send + Sync>),
}

impl Component {
    /// Wraps an arbitrary value as a plain component.
    pub fn plain<T: Any + Send + Sync>(value: T) -> Self {
        Component::Plain(Arc::new(value))
    }

    /// The kind of this component.
    pub fn kind(&self) -> Kind {
        match self {
            Component::Mutator(_) => Kind::Mutator,
            Component::Configurer(_) => Kind::Configurer,
            Component::Interceptor(_) => Kind::Interceptor,
            Component::Listener(_) => Kind::Listener,
            Component::Plain(_) => Kind::Plain,
        }
    }

    /// Is this an [`Interceptor`]?
    pub fn is_interceptor(&self) -> bool {
        matches!(self, Component::Interceptor(_))
    }

    /// Tries to get the concrete value of a plain component.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Component::Plain(value) => Arc::clone(value).downcast().ok(),
            _ => None,
        }
    }

    pub(crate) fn into_extension(self, name: &str) -> Result<Extension, KindMismatch> {
        match self {
            Component::Mutator(m) => Ok(Extension::Mutating(m)),
            Component::Configurer(c) => Ok(Extension::Configuring(c)),
            other => Err(KindMismatch {
                name: name.to_owned(),
                expected: Kind::Configurer,
                found: other.kind(),
            }),
        }
    }
}

impl Debug for Component {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Component({})", self.kind())
    }
}

/// One of the two kinds of startup extensions.
///
/// Extensions can be either discovered through the registry or handed to the startup directly
/// (see [`invoke_extensions`][crate::pipeline::invoke_extensions]).
#[derive(Clone)]
pub enum Extension {
    /// An extension able to add definitions.
    Mutating(Arc<dyn RegistryMutator>),
    /// An extension able to only adjust definitions.
    Configuring(Arc<dyn RegistryConfigurer>),
}

impl Extension {
    /// Wraps a mutating extension.
    pub fn mutating<M: RegistryMutator + 'static>(mutator: M) -> Self {
        Extension::Mutating(Arc::new(mutator))
    }

    /// Wraps a configuring extension.
    pub fn configuring<C: RegistryConfigurer + 'static>(configurer: C) -> Self {
        Extension::Configuring(Arc::new(configurer))
    }

    /// Is it the mutating kind?
    pub fn is_mutating(&self) -> bool {
        matches!(self, Extension::Mutating(_))
    }

    /// Runs the configure callback, whatever the kind is.
    pub(crate) fn configure(&self, registry: &mut Registry, name: &str) -> Result<(), AnyError> {
        let result = match self {
            Extension::Mutating(m) => m.configure(registry),
            Extension::Configuring(c) => c.configure(registry),
        };
        result.map_err(|e| ExtensionFailed::new(name, Phase::Configure, e).into())
    }
}

impl Debug for Extension {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match self {
            Extension::Mutating(_) => write!(fmt, "Extension(mutating)"),
            Extension::Configuring(_) => write!(fmt, "Extension(configuring)"),
        }
    }
}
