//! The shared registry of component definitions.
//!
//! The [`Registry`] is what all the startup extensions work on. It holds named [`Definition`]s
//! (in the order of registration), creates the [`Component`]s out of them lazily when first asked
//! for, caches them and runs them through the installed interceptor chain.
//!
//! # Merged definitions
//!
//! A definition may name a parent. The [`Merged`] view of a definition overlays its properties
//! over the properties of the whole parent chain. The merged views are derived metadata; they are
//! cached and the cache needs to be [invalidated][Registry::invalidate_metadata_cache] when
//! definitions are modified in place.

use std::any::{self, Any};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use err_context::prelude::*;
use log::{debug, trace};
use parking_lot::Mutex;

use crate::component::{
    Component, Event, Extension, Interceptor, Kind, Listener, RegistryConfigurer, RegistryMutator,
    Role,
};
use crate::error::{
    AnyError, CreationCycle, ExtensionFailed, KindMismatch, NotCreated, ParentCycle, Phase,
    UnknownComponent, WrongType,
};
use crate::tier::{Comparator, Tier};

/// The thing that creates a component out of its (merged) definition.
pub type Factory = Arc<dyn Fn(&Merged) -> Result<Component, AnyError> + Send + Sync>;

/// A definition of a component.
///
/// Describes what kind of component it is, its [`Tier`], [`Role`] and properties, and how to
/// create it. The instance itself is created by the registry only when first needed.
///
/// # Examples
///
/// ```rust
/// use bootstage::registry::{Definition, Registry};
///
/// let mut registry = Registry::new();
/// registry.register(
///     "greeting",
///     Definition::plain(|merged| format!("Hello {}", merged.property("who").unwrap_or("world")))
///         .property("who", "everyone"),
/// );
/// let greeting = registry.get::<String>("greeting").unwrap();
/// assert_eq!("Hello everyone", *greeting);
/// ```
#[derive(Clone)]
pub struct Definition {
    kind: Kind,
    tier: Tier,
    role: Role,
    lazy: bool,
    parent: Option<String>,
    depends_on: Vec<String>,
    properties: BTreeMap<String, String>,
    factory: Factory,
}

impl Definition {
    /// Creates a definition from a fallible factory.
    ///
    /// The factory must produce a component of the given `kind`, otherwise the instantiation
    /// fails.
    pub fn new<F>(kind: Kind, factory: F) -> Self
    where
        F: Fn(&Merged) -> Result<Component, AnyError> + Send + Sync + 'static,
    {
        Self {
            kind,
            tier: Tier::default(),
            role: Role::default(),
            lazy: false,
            parent: None,
            depends_on: Vec::new(),
            properties: BTreeMap::new(),
            factory: Arc::new(factory),
        }
    }

    /// A definition of a [`RegistryMutator`].
    pub fn mutator<M, F>(factory: F) -> Self
    where
        M: RegistryMutator + 'static,
        F: Fn(&Merged) -> M + Send + Sync + 'static,
    {
        Self::new(Kind::Mutator, move |merged| {
            Ok(Component::Mutator(Arc::new(factory(merged))))
        })
    }

    /// A definition of a [`RegistryConfigurer`].
    pub fn configurer<C, F>(factory: F) -> Self
    where
        C: RegistryConfigurer + 'static,
        F: Fn(&Merged) -> C + Send + Sync + 'static,
    {
        Self::new(Kind::Configurer, move |merged| {
            Ok(Component::Configurer(Arc::new(factory(merged))))
        })
    }

    /// A definition of an [`Interceptor`].
    pub fn interceptor<I, F>(factory: F) -> Self
    where
        I: Interceptor + 'static,
        F: Fn(&Merged) -> I + Send + Sync + 'static,
    {
        Self::new(Kind::Interceptor, move |merged| {
            Ok(Component::Interceptor(Arc::new(factory(merged))))
        })
    }

    /// A definition of a [`Listener`].
    pub fn listener<L, F>(factory: F) -> Self
    where
        L: Listener + 'static,
        F: Fn(&Merged) -> L + Send + Sync + 'static,
    {
        Self::new(Kind::Listener, move |merged| {
            Ok(Component::Listener(Arc::new(factory(merged))))
        })
    }

    /// A definition of a plain component.
    pub fn plain<T, F>(factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Merged) -> T + Send + Sync + 'static,
    {
        Self::new(Kind::Plain, move |merged| Ok(Component::plain(factory(merged))))
    }

    /// A plain component that is a clone of the given value.
    pub fn value<T: Any + Clone + Send + Sync>(value: T) -> Self {
        Self::plain(move |_| value.clone())
    }

    /// Sets the tier.
    pub fn tier(self, tier: Tier) -> Self {
        Self { tier, ..self }
    }

    /// Sets the role.
    pub fn role(self, role: Role) -> Self {
        Self { role, ..self }
    }

    /// Marks the component as lazy.
    ///
    /// Lazy components are not created during startup, only when asked for.
    pub fn lazy(self, lazy: bool) -> Self {
        Self { lazy, ..self }
    }

    /// Sets the parent definition to inherit properties from.
    pub fn parent<P: Into<String>>(self, parent: P) -> Self {
        Self {
            parent: Some(parent.into()),
            ..self
        }
    }

    /// Makes sure the other component is created before this one.
    pub fn depends_on<N: Into<String>>(mut self, name: N) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Adds a property.
    pub fn property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The declared kind.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The declared tier.
    pub fn declared_tier(&self) -> Tier {
        self.tier
    }

    /// The role.
    pub fn declared_role(&self) -> Role {
        self.role
    }

    /// Is the component lazy?
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    /// The parent, if any.
    pub fn parent_name(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Components created before this one.
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    /// The own (not merged) properties.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Mutable access to the own properties.
    pub fn properties_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.properties
    }

    /// Changes the tier in place.
    pub fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
    }

    /// Changes the role in place.
    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    /// Changes the laziness in place.
    pub fn set_lazy(&mut self, lazy: bool) {
        self.lazy = lazy;
    }
}

impl Debug for Definition {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("Definition")
            .field("kind", &self.kind)
            .field("tier", &self.tier)
            .field("role", &self.role)
            .field("lazy", &self.lazy)
            .field("parent", &self.parent)
            .field("depends_on", &self.depends_on)
            .field("properties", &self.properties)
            .finish()
    }
}

/// The merged view of a definition.
///
/// Kind, tier and role come from the definition itself, the properties are inherited from the
/// parent chain and overridden by the closer ancestors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Merged {
    /// Name of the definition.
    pub name: String,
    /// Its kind.
    pub kind: Kind,
    /// Its tier.
    pub tier: Tier,
    /// Its role.
    pub role: Role,
    /// The merged properties.
    pub properties: BTreeMap<String, String>,
}

impl Merged {
    /// Looks up a merged property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// A declared capability to look definitions up by.
///
/// All of these are checked against the [`Definition`], without creating the component.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Capability {
    /// Is a [`RegistryMutator`].
    Mutate,
    /// Is a [`RegistryConfigurer`] (mutators are configurers too).
    Configure,
    /// Is an [`Interceptor`].
    Intercept,
    /// Is a [`Listener`].
    Listen,
    /// Is in the [`Eager`][Tier::Eager] tier.
    Eager,
    /// Is in the [`Ordered`][Tier::Ordered] tier.
    Ordered,
}

impl Capability {
    fn matches(self, definition: &Definition) -> bool {
        match self {
            Capability::Mutate => definition.kind == Kind::Mutator,
            Capability::Configure => {
                matches!(definition.kind, Kind::Mutator | Kind::Configurer)
            }
            Capability::Intercept => definition.kind == Kind::Interceptor,
            Capability::Listen => definition.kind == Kind::Listener,
            Capability::Eager => definition.tier.is_eager(),
            Capability::Ordered => definition.tier.is_ordered(),
        }
    }
}

/// The set of active listeners.
///
/// It is shared (cloning gives another handle to the same set), so interceptors can add to it.
#[derive(Clone, Default)]
pub struct Listeners(Arc<Mutex<Vec<(String, Arc<dyn Listener>)>>>);

impl Listeners {
    /// Adds a listener under a name, replacing any previous one with the same name.
    pub fn add<N: Into<String>>(&self, name: N, listener: Arc<dyn Listener>) {
        let name = name.into();
        let mut listeners = self.0.lock();
        listeners.retain(|(n, _)| *n != name);
        listeners.push((name, listener));
    }

    /// Removes a listener.
    ///
    /// Returns if it was present.
    pub fn remove(&self, name: &str) -> bool {
        let mut listeners = self.0.lock();
        let before = listeners.len();
        listeners.retain(|(n, _)| n != name);
        listeners.len() != before
    }

    /// Names of the listeners, in the order they are notified.
    pub fn names(&self) -> Vec<String> {
        self.0.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Are there no listeners?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends the event to all the listeners.
    ///
    /// The first failing listener stops the delivery and its error is returned.
    pub fn publish(&self, event: &Event) -> Result<(), AnyError> {
        // Snapshot, so listeners may add more listeners without a deadlock.
        let listeners = self.0.lock().clone();
        trace!("Publishing {:?} to {} listeners", event, listeners.len());
        for (name, listener) in listeners {
            listener
                .on_event(event)
                .map_err(|e| ExtensionFailed::new(&name, Phase::Event, e))?;
        }
        Ok(())
    }
}

impl Debug for Listeners {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_tuple("Listeners").field(&self.names()).finish()
    }
}

/// The registry of components.
///
/// See the [module documentation](index.html).
#[derive(Default)]
pub struct Registry {
    order: Vec<String>,
    definitions: HashMap<String, Definition>,
    instances: HashMap<String, Component>,
    merged: HashMap<String, Merged>,
    hooked: HashSet<String>,
    chain: Vec<(String, Arc<dyn Interceptor>)>,
    comparator: Option<Comparator>,
    listeners: Listeners,
    creating: HashSet<String>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition.
    ///
    /// If there already is a definition of the same name, it is replaced (keeping its position in
    /// the registration order) and any component already created from it is forgotten. The
    /// previous definition is returned.
    pub fn register<N: Into<String>>(
        &mut self,
        name: N,
        definition: Definition,
    ) -> Option<Definition> {
        let name = name.into();
        trace!("Registering {} ({})", name, definition.kind);
        let previous = self.definitions.insert(name.clone(), definition);
        if previous.is_some() {
            debug!("Overriding definition {}", name);
            self.instances.remove(&name);
            // Children may have inherited from it.
            self.merged.clear();
            self.hooked.clear();
        } else {
            self.order.push(name);
        }
        previous
    }

    /// Removes a definition, together with its component.
    pub fn remove(&mut self, name: &str) -> Option<Definition> {
        let removed = self.definitions.remove(name)?;
        self.order.retain(|n| n != name);
        self.instances.remove(name);
        self.merged.clear();
        self.hooked.clear();
        Some(removed)
    }

    /// Is there a definition of this name?
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Access to a definition.
    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    /// Mutable access to a definition.
    ///
    /// Note that this doesn't invalidate the cached [`Merged`] views.
    pub fn definition_mut(&mut self, name: &str) -> Option<&mut Definition> {
        self.definitions.get_mut(name)
    }

    /// All the names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Is the registry empty?
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Names of all definitions with the given capability, in registration order.
    pub fn names_for(&self, capability: Capability) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| capability.matches(&self.definitions[name.as_str()]))
            .cloned()
            .collect()
    }

    /// Does the definition of this name have the capability?
    ///
    /// Unknown names have no capabilities.
    pub fn matches(&self, name: &str, capability: Capability) -> bool {
        self.definitions
            .get(name)
            .map(|def| capability.matches(def))
            .unwrap_or(false)
    }

    /// Is the component marked as infrastructure?
    pub fn is_infrastructure(&self, name: &str) -> bool {
        self.definitions
            .get(name)
            .map(|def| def.role == Role::Infrastructure)
            .unwrap_or(false)
    }

    /// Was the component already created?
    pub fn is_instantiated(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// The merged view of a definition.
    ///
    /// The view is computed on the first call and cached.
    pub fn merged(&mut self, name: &str) -> Result<Merged, AnyError> {
        if let Some(merged) = self.merged.get(name) {
            return Ok(merged.clone());
        }
        let merged = self.merge(name)?;
        self.merged.insert(name.to_owned(), merged.clone());
        Ok(merged)
    }

    /// Is there a cached merged view of this name?
    pub fn has_merged(&self, name: &str) -> bool {
        self.merged.contains_key(name)
    }

    /// Drops all the cached merged views.
    ///
    /// Needs to be called after modifying definitions in place, otherwise the components still
    /// get created from the old view.
    pub fn invalidate_metadata_cache(&mut self) {
        trace!("Dropping {} merged definitions", self.merged.len());
        self.merged.clear();
        self.hooked.clear();
    }

    fn merge(&self, name: &str) -> Result<Merged, AnyError> {
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| UnknownComponent(name.to_owned()))?;
        let mut lineage = vec![definition];
        let mut seen = HashSet::new();
        seen.insert(name);
        let mut current = definition;
        while let Some(parent) = current.parent.as_deref() {
            if !seen.insert(parent) {
                return Err(ParentCycle(name.to_owned()).into());
            }
            current = self
                .definitions
                .get(parent)
                .ok_or_else(|| UnknownComponent(parent.to_owned()))?;
            lineage.push(current);
        }
        let properties = lineage
            .iter()
            .rev()
            .flat_map(|def| def.properties.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Merged {
            name: name.to_owned(),
            kind: definition.kind,
            tier: definition.tier,
            role: definition.role,
            properties,
        })
    }

    /// Gets the component of this name, creating it if it doesn't exist yet.
    ///
    /// Creation goes like this:
    ///
    /// * The [dependencies][Definition::depends_on] are created.
    /// * The merged definition is computed and passed through the merge hooks of the installed
    ///   interceptors (only once per cached view).
    /// * The first interceptor whose `before_instantiate` supplies a component wins and the factory
    ///   is skipped. Otherwise the factory is called.
    /// * The component passes through `before_construct` of all the interceptors (unless it was
    ///   supplied), then through all the `after_construct`.
    /// * The result is cached and returned (also on all future calls).
    pub fn instantiate(&mut self, name: &str) -> Result<Component, AnyError> {
        if let Some(component) = self.instances.get(name) {
            return Ok(component.clone());
        }
        if !self.creating.insert(name.to_owned()) {
            return Err(CreationCycle(name.to_owned()).into());
        }
        let result = self.create(name);
        self.creating.remove(name);
        result
    }

    fn create(&mut self, name: &str) -> Result<Component, AnyError> {
        let (kind, factory, dependencies) = match self.definitions.get(name) {
            Some(def) => (def.kind, Arc::clone(&def.factory), def.depends_on.clone()),
            None => return Err(UnknownComponent(name.to_owned()).into()),
        };
        for dependency in &dependencies {
            trace!("Creating {} as a dependency of {}", dependency, name);
            self.instantiate(dependency)?;
        }
        let mut merged = self.merged(name)?;
        // The chain may change while the component is being created (eg. when an interceptor is
        // created), but this one creation goes through the chain as it is now.
        let chain = self.chain.clone();
        // The hooks see each merged view only once, even if the creation fails and is retried.
        if !self.hooked.contains(name) {
            for (_, interceptor) in &chain {
                if let Some(hook) = interceptor.merge_hook() {
                    hook.after_merge(&mut merged, name)?;
                }
            }
            self.merged.insert(name.to_owned(), merged.clone());
            self.hooked.insert(name.to_owned());
        }

        let mut supplied = None;
        for (iname, interceptor) in &chain {
            supplied = interceptor
                .before_instantiate(self, &merged, name)
                .with_context(|_| format!("Interceptor {} failed to supply {}", iname, name))?;
            if supplied.is_some() {
                debug!("Interceptor {} supplied {}", iname, name);
                break;
            }
        }
        let shortcut = supplied.is_some();
        let mut component = match supplied {
            Some(component) => component,
            None => {
                trace!("Creating {}", name);
                factory(&merged)?
            }
        };
        if component.kind() != kind {
            return Err(KindMismatch {
                name: name.to_owned(),
                expected: kind,
                found: component.kind(),
            }
            .into());
        }
        // A supplied component is taken as constructed already.
        if !shortcut {
            for (iname, interceptor) in &chain {
                component = interceptor
                    .before_construct(self, component, name)
                    .with_context(|_| format!("Interceptor {} failed before {}", iname, name))?;
            }
        }
        for (iname, interceptor) in &chain {
            component = interceptor
                .after_construct(self, component, name)
                .with_context(|_| format!("Interceptor {} failed after {}", iname, name))?;
        }
        self.instances.insert(name.to_owned(), component.clone());
        Ok(component)
    }

    /// Gets a [`RegistryMutator`].
    pub fn mutator(&mut self, name: &str) -> Result<Arc<dyn RegistryMutator>, AnyError> {
        match self.instantiate(name)? {
            Component::Mutator(mutator) => Ok(mutator),
            other => Err(mismatch(name, Kind::Mutator, &other)),
        }
    }

    /// Gets any [`RegistryConfigurer`], including mutators.
    pub fn extension(&mut self, name: &str) -> Result<Extension, AnyError> {
        Ok(self.instantiate(name)?.into_extension(name)?)
    }

    /// Gets an [`Interceptor`].
    pub fn interceptor(&mut self, name: &str) -> Result<Arc<dyn Interceptor>, AnyError> {
        match self.instantiate(name)? {
            Component::Interceptor(interceptor) => Ok(interceptor),
            other => Err(mismatch(name, Kind::Interceptor, &other)),
        }
    }

    /// Gets the value of a plain component.
    pub fn get<T: Any + Send + Sync>(&mut self, name: &str) -> Result<Arc<T>, AnyError> {
        let component = self.instantiate(name)?;
        downcast(name, &component)
    }

    /// Gets the value of an already created plain component.
    ///
    /// Unlike [`get`][Registry::get], this never creates the component.
    pub fn created<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, AnyError> {
        let component = match self.instances.get(name) {
            Some(component) => component,
            None if self.contains(name) => return Err(NotCreated(name.to_owned()).into()),
            None => return Err(UnknownComponent(name.to_owned()).into()),
        };
        downcast(name, component)
    }

    /// Appends an interceptor to the end of the chain.
    ///
    /// If an interceptor of the same name is already present, it is moved to the end instead of
    /// being there twice.
    pub fn add_interceptor<N: Into<String>>(&mut self, name: N, interceptor: Arc<dyn Interceptor>) {
        let name = name.into();
        self.chain.retain(|(n, _)| *n != name);
        self.chain.push((name, interceptor));
    }

    /// Appends multiple interceptors at once, keeping their order.
    ///
    /// Acts as [`add_interceptor`][Registry::add_interceptor] for each of them.
    pub fn add_interceptors<I, N>(&mut self, interceptors: I)
    where
        I: IntoIterator<Item = (N, Arc<dyn Interceptor>)>,
        N: Into<String>,
    {
        let added = interceptors
            .into_iter()
            .map(|(name, interceptor)| (name.into(), interceptor))
            .collect::<Vec<_>>();
        self.chain
            .retain(|(n, _)| !added.iter().any(|(name, _)| name == n));
        self.chain.extend(added);
    }

    /// How many interceptors are installed.
    pub fn interceptor_count(&self) -> usize {
        self.chain.len()
    }

    /// Names of the installed interceptors, in the chain order.
    pub fn interceptor_names(&self) -> Vec<&str> {
        self.chain.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// The configured custom comparator.
    pub fn comparator(&self) -> Option<&Comparator> {
        self.comparator.as_ref()
    }

    /// Sets or resets the custom comparator used to sort extensions.
    pub fn set_comparator(&mut self, comparator: Option<Comparator>) {
        self.comparator = comparator;
    }

    /// The active listeners.
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Publishes an event to all the active listeners.
    pub fn publish(&self, event: &Event) -> Result<(), AnyError> {
        self.listeners.publish(event)
    }
}

impl Debug for Registry {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("Registry")
            .field("names", &self.order)
            .field("instantiated", &self.instances.len())
            .field("interceptors", &self.interceptor_names())
            .field("listeners", &self.listeners)
            .finish()
    }
}

fn downcast<T: Any + Send + Sync>(name: &str, component: &Component) -> Result<Arc<T>, AnyError> {
    if component.kind() != Kind::Plain {
        return Err(mismatch(name, Kind::Plain, component));
    }
    component.downcast().ok_or_else(|| {
        WrongType {
            name: name.to_owned(),
            expected: any::type_name::<T>(),
        }
        .into()
    })
}

fn mismatch(name: &str, expected: Kind, found: &Component) -> AnyError {
    KindMismatch {
        name: name.to_owned(),
        expected,
        found: found.kind(),
    }
    .into()
}
