//! Installation of the interceptor chain.
//!
//! The interceptors found in the [`Registry`] are installed by [`install_interceptors`] in the
//! order of their [`Tier`]s. The internal ones (the ones with a
//! [`MergeHook`][crate::component::MergeHook]) go last, whatever their tier. Around them, two
//! fixed interceptors may be put:
//!
//! * The [`Guard`] at the very start. It notices components created while the chain was still
//!   incomplete.
//! * The [`Detector`] at the very end. It picks up the [`Listener`][crate::component::Listener]s.

use std::sync::Arc;

use log::{debug, log, Level};
use parking_lot::Mutex;

use crate::component::{Component, Interceptor};
use crate::error::AnyError;
use crate::registry::{Capability, Listeners, Registry};
use crate::settings::Settings;
use crate::tier::{self, Rank, Ranked, Tier};
use crate::utils;

/// The name the [`Guard`] is installed under.
pub const GUARD: &str = "bootstage.guard";

/// The name the [`Detector`] is installed under.
pub const DETECTOR: &str = "bootstage.detector";

/// Notices components created before the interceptor chain was complete.
///
/// Such components may have missed some of the interceptors. This is expected for components the
/// interceptors themselves need, so it is only logged (and recorded), not an error. Components
/// with the [`Infrastructure`][crate::component::Role::Infrastructure] role and interceptors
/// themselves are exempt.
#[derive(Debug)]
pub struct Guard {
    target: usize,
    level: Level,
    flagged: Mutex<Vec<String>>,
}

impl Guard {
    /// Creates a guard expecting the chain to be `target` long once complete.
    pub fn new(target: usize, level: Level) -> Self {
        Self {
            target,
            level,
            flagged: Mutex::new(Vec::new()),
        }
    }

    /// The expected length of the complete chain.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Names of the components created before the chain was complete.
    pub fn flagged(&self) -> Vec<String> {
        self.flagged.lock().clone()
    }
}

impl Interceptor for Guard {
    fn after_construct(
        &self,
        registry: &Registry,
        component: Component,
        name: &str,
    ) -> Result<Component, AnyError> {
        if !component.is_interceptor()
            && !registry.is_infrastructure(name)
            && registry.interceptor_count() < self.target
        {
            log!(
                self.level,
                "Component '{}' ({}) is not eligible for getting processed by all interceptors",
                name,
                component.kind(),
            );
            self.flagged.lock().push(name.to_owned());
        }
        Ok(component)
    }
}

/// Adds every constructed listener into the active listener set.
///
/// Goes last in the chain, so it sees the final (possibly wrapped) listener.
#[derive(Debug)]
pub struct Detector {
    listeners: Listeners,
}

impl Detector {
    /// Creates a detector feeding the given set.
    pub fn new(listeners: Listeners) -> Self {
        Self { listeners }
    }
}

impl Interceptor for Detector {
    fn after_construct(
        &self,
        _registry: &Registry,
        component: Component,
        name: &str,
    ) -> Result<Component, AnyError> {
        if let Component::Listener(listener) = &component {
            debug!("Detected listener {}", name);
            self.listeners.add(name, Arc::clone(listener));
        }
        Ok(component)
    }
}

/// What [`install_interceptors`] did.
#[derive(Debug, Default)]
pub struct Installation {
    /// The installed guard, if any.
    pub guard: Option<Arc<Guard>>,
    /// Names of the installed discovered interceptors, in the chain order.
    pub installed: Vec<String>,
}

struct Found {
    name: String,
    tier: Tier,
    interceptor: Arc<dyn Interceptor>,
}

impl Ranked for Found {
    fn rank(&self) -> Rank<'_> {
        Rank {
            name: &self.name,
            tier: self.tier,
        }
    }
}

fn create(registry: &mut Registry, names: Vec<String>) -> Result<Vec<Found>, AnyError> {
    names
        .into_iter()
        .map(|name| -> Result<Found, AnyError> {
            let interceptor = registry.interceptor(&name)?;
            let tier = registry
                .definition(&name)
                .map(|def| def.declared_tier())
                .unwrap_or_default();
            Ok(Found {
                name,
                tier,
                interceptor,
            })
        })
        .collect()
}

fn install(registry: &mut Registry, batch: Vec<Found>, installed: &mut Vec<String>) {
    installed.retain(|name| !batch.iter().any(|found| found.name == *name));
    installed.extend(batch.iter().map(|found| found.name.clone()));
    registry.add_interceptors(
        batch
            .into_iter()
            .map(|found| (found.name, found.interceptor)),
    );
}

/// Installs all the interceptors found in the registry.
///
/// The order of the chain is:
///
/// 1. The [`Guard`] (if enabled in the settings).
/// 2. The [`Eager`][Tier::Eager] interceptors (sorted).
/// 3. The [`Ordered`][Tier::Ordered] interceptors (sorted).
/// 4. The rest, in the order of registration.
/// 5. The internal interceptors (the ones with a merge hook), sorted. They are moved here from
///    their previous position.
/// 6. The [`Detector`] (if enabled in the settings).
///
/// The interceptors are created (and installed) tier by tier, so the ones from later tiers are
/// already processed by the earlier ones.
pub fn install_interceptors(
    registry: &mut Registry,
    settings: &Settings,
) -> Result<Installation, AnyError> {
    let names = registry.names_for(Capability::Intercept);
    let mut installation = Installation::default();

    if settings.guard.enabled {
        // Everything there is now, the guard itself and everything we are going to add.
        let target = registry.interceptor_count() + 1 + names.len();
        let guard = Arc::new(Guard::new(target, settings.guard.level));
        debug!("Installing interceptor guard expecting {} interceptors", target);
        registry.add_interceptor(GUARD, Arc::clone(&guard) as Arc<dyn Interceptor>);
        installation.guard = Some(guard);
    }

    let (eager, rest): (Vec<_>, Vec<_>) = names
        .into_iter()
        .partition(|name| registry.matches(name, Capability::Eager));
    let (ordered, unordered): (Vec<_>, Vec<_>) = rest
        .into_iter()
        .partition(|name| registry.matches(name, Capability::Ordered));
    debug!(
        "Installing interceptors: eager {:?}, ordered {:?}, unordered {:?}",
        eager, ordered, unordered
    );

    let mut internal = Vec::new();
    for (group, sorted) in vec![(eager, true), (ordered, true), (unordered, false)] {
        let mut batch = utils::timed(
            "interceptors",
            "interceptor installation",
            settings.slow_extension,
            || create(registry, group),
        )?;
        if sorted {
            tier::sort(&mut batch, registry.comparator());
        }
        internal.extend(
            batch
                .iter()
                .filter(|found| found.interceptor.merge_hook().is_some())
                .map(|found| Found {
                    name: found.name.clone(),
                    tier: found.tier,
                    interceptor: Arc::clone(&found.interceptor),
                }),
        );
        install(registry, batch, &mut installation.installed);
    }

    tier::sort(&mut internal, registry.comparator());
    install(registry, internal, &mut installation.installed);

    if settings.detector {
        registry.add_interceptor(
            DETECTOR,
            Arc::new(Detector::new(registry.listeners().clone())),
        );
    }
    debug!("Interceptor chain: {:?}", registry.interceptor_names());
    Ok(installation)
}
