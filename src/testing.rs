//! Recording extensions shared by the unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::component::{Interceptor, RegistryConfigurer, RegistryMutator};
use crate::error::AnyError;
use crate::registry::{Definition, Registry};

/// A shared log of what happened, in order.
#[derive(Clone, Debug, Default)]
pub(crate) struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub(crate) fn push<S: Into<String>>(&self, entry: S) {
        self.0.lock().push(entry.into());
    }

    /// Returns everything recorded so far and starts over.
    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }
}

/// Does nothing, whatever it is used as.
pub(crate) struct Nop;

impl RegistryConfigurer for Nop {
    fn configure(&self, _: &mut Registry) -> Result<(), AnyError> {
        Ok(())
    }
}

impl RegistryMutator for Nop {
    fn mutate_registry(&self, _: &mut Registry) -> Result<(), AnyError> {
        Ok(())
    }
}

impl Interceptor for Nop {}

/// Something to run during `mutate_registry`.
pub(crate) type Action = Arc<dyn Fn(&mut Registry) -> Result<(), AnyError> + Send + Sync>;

/// A mutating extension recording its calls as `name.mutate` and `name.configure`.
#[derive(Clone)]
pub(crate) struct Recorder {
    pub(crate) name: String,
    pub(crate) trace: Trace,
    pub(crate) action: Option<Action>,
}

impl Recorder {
    pub(crate) fn new(name: &str, trace: &Trace) -> Self {
        Self {
            name: name.to_owned(),
            trace: trace.clone(),
            action: None,
        }
    }

    pub(crate) fn with_action<F>(self, action: F) -> Self
    where
        F: Fn(&mut Registry) -> Result<(), AnyError> + Send + Sync + 'static,
    {
        Self {
            action: Some(Arc::new(action)),
            ..self
        }
    }

    /// A definition producing this recorder as a mutator.
    pub(crate) fn mutator(self) -> Definition {
        Definition::mutator(move |_| self.clone())
    }

    /// A definition producing this recorder as a configuring-only extension.
    pub(crate) fn configurer(self) -> Definition {
        Definition::configurer(move |_| self.clone())
    }
}

impl RegistryConfigurer for Recorder {
    fn configure(&self, _: &mut Registry) -> Result<(), AnyError> {
        self.trace.push(format!("{}.configure", self.name));
        Ok(())
    }
}

impl RegistryMutator for Recorder {
    fn mutate_registry(&self, registry: &mut Registry) -> Result<(), AnyError> {
        self.trace.push(format!("{}.mutate", self.name));
        match &self.action {
            Some(action) => action(registry),
            None => Ok(()),
        }
    }
}
