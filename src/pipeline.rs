//! The startup extension phases.
//!
//! The [`invoke_extensions`] runs all the [`RegistryMutator`]s, both the ones handed to it
//! directly and the ones found in the [`Registry`], until no new ones appear. Then it runs the
//! [`configure`][crate::component::RegistryConfigurer::configure] callback of all of them and
//! finally of all the remaining configuring extensions ([`configure_remaining`]).
//!
//! Every discovered extension runs exactly once. The discovered ones run in the order of their
//! [`Tier`]s, the manual ones in the order they were passed in.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, trace};

use crate::component::{Extension, RegistryMutator};
use crate::error::{AnyError, ExtensionFailed, Phase};
use crate::registry::{Capability, Registry};
use crate::settings::Settings;
use crate::tier::{self, Rank, Ranked, Tier};
use crate::utils;

/// Names of the discovered extensions that were already run.
pub type Processed = HashSet<String>;

/// An extension handed to the startup directly, not discovered in the registry.
///
/// The name is used in logs and errors only; it doesn't need to match anything in the registry
/// and manual extensions are never matched against the discovered ones.
#[derive(Clone, Debug)]
pub struct ManualExtension {
    /// The label of the extension.
    pub name: String,
    /// The extension itself.
    pub extension: Extension,
}

impl ManualExtension {
    /// Creates a manual extension.
    pub fn new<N: Into<String>>(name: N, extension: Extension) -> Self {
        Self {
            name: name.into(),
            extension,
        }
    }
}

struct Found<T> {
    name: String,
    tier: Tier,
    item: T,
}

impl<T> Ranked for Found<T> {
    fn rank(&self) -> Rank<'_> {
        Rank {
            name: &self.name,
            tier: self.tier,
        }
    }
}

fn tier_of(registry: &Registry, name: &str) -> Tier {
    registry
        .definition(name)
        .map(|def| def.declared_tier())
        .unwrap_or_default()
}

/// Runs one batch of discovered mutators.
///
/// All of them are marked as processed and created first, then sorted and run.
fn run_mutators(
    registry: &mut Registry,
    names: Vec<String>,
    processed: &mut Processed,
    accumulated: &mut Vec<ManualExtension>,
    settings: &Settings,
) -> Result<(), AnyError> {
    let mut batch = Vec::with_capacity(names.len());
    for name in names {
        processed.insert(name.clone());
        let item = registry.mutator(&name)?;
        let tier = tier_of(registry, &name);
        batch.push(Found { name, tier, item });
    }
    tier::sort(&mut batch, registry.comparator());
    for Found { name, item, .. } in batch {
        mutate(registry, &name, &*item, settings)?;
        accumulated.push(ManualExtension::new(name, Extension::Mutating(item)));
    }
    Ok(())
}

fn mutate(
    registry: &mut Registry,
    name: &str,
    mutator: &dyn RegistryMutator,
    settings: &Settings,
) -> Result<(), AnyError> {
    trace!("Running mutate-registry of {}", name);
    utils::timed(name, Phase::MutateRegistry, settings.slow_extension, || {
        mutator.mutate_registry(registry)
    })
    .map_err(|e| ExtensionFailed::new(name, Phase::MutateRegistry, e).into())
}

fn configure(
    registry: &mut Registry,
    name: &str,
    extension: &Extension,
    settings: &Settings,
) -> Result<(), AnyError> {
    trace!("Running configure of {}", name);
    utils::timed(name, Phase::Configure, settings.slow_extension, || {
        extension.configure(registry, name)
    })
}

fn unprocessed(
    registry: &Registry,
    processed: &Processed,
    filter: Option<Capability>,
) -> Vec<String> {
    registry
        .names_for(Capability::Mutate)
        .into_iter()
        .filter(|name| !processed.contains(name))
        .filter(|name| filter.map(|cap| registry.matches(name, cap)).unwrap_or(true))
        .collect()
}

/// Runs all the startup extensions.
///
/// This goes through these steps:
///
/// 1. The `mutate_registry` of the manual mutating extensions, in the given order.
/// 2. The `mutate_registry` of the discovered [`Eager`][Tier::Eager] mutators.
/// 3. The same with the [`Ordered`][Tier::Ordered] mutators not yet run.
/// 4. Any mutators not yet run (newly registered ones included), batch by batch, until there are
///    no more.
/// 5. The `configure` of all the extensions run so far (in the order they were run), then the
///    `configure` of the manual configuring-only extensions.
/// 6. The remaining configuring extensions, see [`configure_remaining`].
/// 7. The cached merged definitions are dropped, since the extensions could have modified them.
///
/// The discovery is redone before every step, because extensions register more extensions.
/// Within a batch, the extensions are sorted by the comparator of the registry (or by the
/// [`default_order`][crate::tier::default_order]). The first error aborts the whole thing.
///
/// Returns the names of the discovered extensions that were run.
pub fn invoke_extensions(
    registry: &mut Registry,
    manual: &[ManualExtension],
    settings: &Settings,
) -> Result<Processed, AnyError> {
    let mut processed = Processed::new();
    let mut accumulated = Vec::new();

    let (mutating, configuring): (Vec<_>, Vec<_>) =
        manual.iter().partition(|m| m.extension.is_mutating());
    debug!(
        "Running {} manual mutating extensions, {} configuring ones wait",
        mutating.len(),
        configuring.len()
    );
    for m in mutating {
        if let Extension::Mutating(mutator) = &m.extension {
            mutate(registry, &m.name, &**mutator, settings)?;
        }
        accumulated.push(m.clone());
    }

    let eager = unprocessed(registry, &processed, Some(Capability::Eager));
    debug!("Eager mutators: {:?}", eager);
    run_mutators(registry, eager, &mut processed, &mut accumulated, settings)?;

    let ordered = unprocessed(registry, &processed, Some(Capability::Ordered));
    debug!("Ordered mutators: {:?}", ordered);
    run_mutators(registry, ordered, &mut processed, &mut accumulated, settings)?;

    let mut round = 0;
    loop {
        let rest = unprocessed(registry, &processed, None);
        if rest.is_empty() {
            break;
        }
        round += 1;
        debug!("Mutators round {}: {:?}", round, rest);
        run_mutators(registry, rest, &mut processed, &mut accumulated, settings)?;
    }

    debug!("Configuring {} mutating extensions", accumulated.len());
    for m in accumulated.iter().chain(configuring) {
        configure(registry, &m.name, &m.extension, settings)?;
    }

    configure_remaining(registry, &mut processed, settings)?;

    registry.invalidate_metadata_cache();
    Ok(processed)
}

/// Runs the configuring extensions not yet processed.
///
/// The candidates are split by their tier up front. Then the [`Eager`][Tier::Eager] ones run
/// (sorted), the [`Ordered`][Tier::Ordered] ones (sorted) and the rest in registration order.
/// Each one run is added to `processed`.
///
/// A candidate that disappears from the registry before its turn is skipped.
pub fn configure_remaining(
    registry: &mut Registry,
    processed: &mut Processed,
    settings: &Settings,
) -> Result<(), AnyError> {
    let mut eager = Vec::new();
    let mut ordered = Vec::new();
    let mut unordered = Vec::new();
    for name in registry.names_for(Capability::Configure) {
        if processed.contains(&name) {
            continue;
        }
        match tier_of(registry, &name) {
            Tier::Eager(_) => eager.push(name),
            Tier::Ordered(_) => ordered.push(name),
            Tier::Unordered => unordered.push(name),
        }
    }
    debug!(
        "Configuring extensions: eager {:?}, ordered {:?}, unordered {:?}",
        eager, ordered, unordered
    );

    for (group, sorted) in vec![(eager, true), (ordered, true), (unordered, false)] {
        let mut batch = Vec::with_capacity(group.len());
        for name in group {
            if !registry.contains(&name) {
                debug!("Configuring extension {} vanished, skipping", name);
                continue;
            }
            let item = registry.extension(&name)?;
            let tier = tier_of(registry, &name);
            batch.push(Found { name, tier, item });
        }
        if sorted {
            tier::sort(&mut batch, registry.comparator());
        }
        for Found { name, item, .. } in batch {
            processed.insert(name.clone());
            configure(registry, &name, &item, settings)?;
        }
    }
    Ok(())
}

/// Shorthand to wrap a mutator as a manual extension.
pub fn manual_mutator<N, M>(name: N, mutator: M) -> ManualExtension
where
    N: Into<String>,
    M: RegistryMutator + 'static,
{
    ManualExtension::new(name, Extension::Mutating(Arc::new(mutator)))
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::*;
    use crate::component::RegistryConfigurer;
    use crate::error::UnknownComponent;
    use crate::registry::Definition;
    use crate::testing::{Recorder, Trace};
    use crate::tier::Comparator;

    fn run(registry: &mut Registry, manual: &[ManualExtension]) -> Result<Processed, AnyError> {
        invoke_extensions(registry, manual, &Settings::default())
    }

    #[test]
    fn empty() {
        let mut registry = Registry::new();
        assert!(run(&mut registry, &[]).unwrap().is_empty());
    }

    /// The manual one registers another one, which gets picked up by the fixpoint.
    #[test]
    fn manual_registers_discoverable() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        registry.register("c", Recorder::new("c", &trace).configurer());
        let d = Recorder::new("d", &trace);
        let m = Recorder::new("m", &trace).with_action(move |registry| {
            registry.register("d", d.clone().mutator());
            Ok(())
        });
        let processed = run(&mut registry, &[manual_mutator("m", m)]).unwrap();
        assert_eq!(
            vec!["m.mutate", "d.mutate", "m.configure", "d.configure", "c.configure"],
            trace.take()
        );
        assert!(processed.contains("d"));
        assert!(processed.contains("c"));
        assert!(!processed.contains("m"));
    }

    #[test]
    fn tiers_in_order() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        registry.register("u", Recorder::new("u", &trace).mutator());
        registry.register(
            "o5",
            Recorder::new("o5", &trace).mutator().tier(Tier::Ordered(5)),
        );
        registry.register(
            "o1",
            Recorder::new("o1", &trace).mutator().tier(Tier::Ordered(1)),
        );
        registry.register(
            "e",
            Recorder::new("e", &trace).mutator().tier(Tier::Eager(0)),
        );
        let manual = Recorder::new("manual", &trace);
        run(&mut registry, &[manual_mutator("manual", manual)]).unwrap();
        assert_eq!(
            vec![
                "manual.mutate",
                "e.mutate",
                "o1.mutate",
                "o5.mutate",
                "u.mutate",
                "manual.configure",
                "e.configure",
                "o1.configure",
                "o5.configure",
                "u.configure",
            ],
            trace.take()
        );
    }

    /// Manual extensions keep their order, whatever it is.
    #[test]
    fn manual_not_sorted() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        let manual = vec![
            manual_mutator("z", Recorder::new("z", &trace)),
            ManualExtension::new("y", Extension::configuring(Recorder::new("y", &trace))),
            manual_mutator("a", Recorder::new("a", &trace)),
        ];
        run(&mut registry, &manual).unwrap();
        assert_eq!(
            vec!["z.mutate", "a.mutate", "z.configure", "a.configure", "y.configure"],
            trace.take()
        );
    }

    /// A chain of registrations, each found in its own round. Each runs exactly once.
    #[test]
    fn fixpoint_chain() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        let third = Recorder::new("third", &trace);
        let second = Recorder::new("second", &trace).with_action(move |registry| {
            registry.register("third", third.clone().mutator().tier(Tier::Eager(0)));
            Ok(())
        });
        let first = Recorder::new("first", &trace).with_action(move |registry| {
            registry.register("second", second.clone().mutator().tier(Tier::Ordered(0)));
            // Re-registering itself under the same name doesn't make it run again.
            registry.register("first", Recorder::new("ignored", &Trace::default()).mutator());
            Ok(())
        });
        registry.register("first", first.mutator().tier(Tier::Eager(0)));
        run(&mut registry, &[]).unwrap();
        let trace = trace.take();
        assert_eq!(
            vec![
                "first.mutate",
                "second.mutate",
                "third.mutate",
                "first.configure",
                "second.configure",
                "third.configure",
            ],
            trace
        );
    }

    #[test]
    fn exactly_once() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        for name in &["a", "b", "c"] {
            let spawned = Recorder::new(&format!("{}-child", name), &trace);
            let child = format!("{}-child", name);
            let parent = Recorder::new(name, &trace).with_action(move |registry| {
                // Everyone registers the same one, plus their own
                registry.register("shared", Recorder::new("shared", &spawned.trace).mutator());
                registry.register(child.clone(), spawned.clone().mutator());
                Ok(())
            });
            registry.register(*name, parent.mutator());
        }
        run(&mut registry, &[]).unwrap();
        for name in &["a", "b", "c", "a-child", "b-child", "c-child", "shared"] {
            assert_eq!(1, trace.count(&format!("{}.mutate", name)), "{}", name);
            assert_eq!(1, trace.count(&format!("{}.configure", name)), "{}", name);
        }
    }

    #[test]
    fn configuring_by_tier() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        registry.register("u2", Recorder::new("u2", &trace).configurer());
        registry.register(
            "o2",
            Recorder::new("o2", &trace).configurer().tier(Tier::Ordered(2)),
        );
        registry.register("u1", Recorder::new("u1", &trace).configurer());
        registry.register(
            "o1",
            Recorder::new("o1", &trace).configurer().tier(Tier::Ordered(1)),
        );
        registry.register(
            "e",
            Recorder::new("e", &trace).configurer().tier(Tier::Eager(9)),
        );
        run(&mut registry, &[]).unwrap();
        assert_eq!(
            vec!["e.configure", "o1.configure", "o2.configure", "u2.configure", "u1.configure"],
            trace.take()
        );
    }

    /// Moves others between tiers while configuring.
    struct Retiering(Trace);

    impl RegistryConfigurer for Retiering {
        fn configure(&self, registry: &mut Registry) -> Result<(), AnyError> {
            self.0.push("retiering.configure");
            if let Some(def) = registry.definition_mut("late") {
                def.set_tier(Tier::Eager(-100));
            }
            if let Some(def) = registry.definition_mut("mid") {
                def.set_tier(Tier::Unordered);
            }
            Ok(())
        }
    }

    /// The groups are decided before the first one runs; retiering only reorders within a group.
    #[test]
    fn configuring_groups_fixed_up_front() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        registry.register("late", Recorder::new("late", &trace).configurer());
        registry.register(
            "mid",
            Recorder::new("mid", &trace).configurer().tier(Tier::Ordered(1)),
        );
        registry.register(
            "o2",
            Recorder::new("o2", &trace).configurer().tier(Tier::Ordered(2)),
        );
        registry.register("u", Recorder::new("u", &trace).configurer());
        let retiering_trace = trace.clone();
        registry.register(
            "retiering",
            Definition::configurer(move |_| Retiering(retiering_trace.clone()))
                .tier(Tier::Eager(0)),
        );
        run(&mut registry, &[]).unwrap();
        assert_eq!(
            vec![
                "retiering.configure",
                "o2.configure",
                "mid.configure",
                "late.configure",
                "u.configure",
            ],
            trace.take()
        );
    }

    #[test]
    fn custom_comparator() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        for name in &["a", "c", "b"] {
            registry.register(*name, Recorder::new(name, &trace).mutator().tier(Tier::Ordered(0)));
        }
        let reverse: Comparator =
            Arc::new(|a: &Rank<'_>, b: &Rank<'_>| -> Ordering { b.name.cmp(a.name) });
        registry.set_comparator(Some(reverse));
        run(&mut registry, &[]).unwrap();
        let mutated = trace
            .take()
            .into_iter()
            .filter(|e| e.ends_with(".mutate"))
            .collect::<Vec<_>>();
        assert_eq!(vec!["c.mutate", "b.mutate", "a.mutate"], mutated);
    }

    #[test]
    fn error_aborts() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        registry.register(
            "broken",
            Recorder::new("broken", &trace)
                .with_action(|_| Err(UnknownComponent("db".to_owned()).into()))
                .mutator()
                .tier(Tier::Eager(0)),
        );
        registry.register(
            "later",
            Recorder::new("later", &trace).mutator().tier(Tier::Ordered(0)),
        );
        let err = run(&mut registry, &[]).unwrap_err();
        let failed = err.downcast_ref::<ExtensionFailed>().unwrap();
        assert_eq!("broken", failed.name);
        assert_eq!(Phase::MutateRegistry, failed.phase);
        assert_eq!(vec!["broken.mutate"], trace.take());
    }

    #[test]
    fn configure_error_carries_phase() {
        struct Failing;

        impl crate::component::RegistryConfigurer for Failing {
            fn configure(&self, _: &mut Registry) -> Result<(), AnyError> {
                Err(UnknownComponent("cfg".to_owned()).into())
            }
        }

        let mut registry = Registry::new();
        registry.register("failing", Definition::configurer(|_| Failing));
        let err = run(&mut registry, &[]).unwrap_err();
        let failed = err.downcast_ref::<ExtensionFailed>().unwrap();
        assert_eq!("failing", failed.name);
        assert_eq!(Phase::Configure, failed.phase);
    }

    /// Changes done by configuring extensions are visible to components created afterwards, even
    /// if the merged view was cached before.
    #[test]
    fn metadata_invalidated() {
        struct Retune;

        impl crate::component::RegistryConfigurer for Retune {
            fn configure(&self, registry: &mut Registry) -> Result<(), AnyError> {
                let def = registry
                    .definition_mut("port")
                    .ok_or_else(|| UnknownComponent("port".to_owned()))?;
                def.properties_mut()
                    .insert("value".to_owned(), "8080".to_owned());
                Ok(())
            }
        }

        let trace = Trace::default();
        let mut registry = Registry::new();
        registry.register(
            "port",
            Definition::plain(|merged| merged.property("value").unwrap_or("none").to_owned())
                .property("value", "80"),
        );
        registry.register(
            "peek",
            Recorder::new("peek", &trace)
                .with_action(|registry| {
                    registry.merged("port")?;
                    Ok(())
                })
                .mutator(),
        );
        registry.register("retune", Definition::configurer(|_| Retune));
        run(&mut registry, &[]).unwrap();
        assert_eq!("8080", *registry.get::<String>("port").unwrap());
    }

    /// An extension removing another one not yet run makes it skipped.
    #[test]
    fn removed_is_skipped() {
        let trace = Trace::default();
        let mut registry = Registry::new();
        registry.register(
            "remover",
            Definition::configurer(|_| Remover).tier(Tier::Eager(0)),
        );
        registry.register("victim", Recorder::new("victim", &trace).configurer());
        registry.register("survivor", Recorder::new("survivor", &trace).configurer());
        let processed = run(&mut registry, &[]).unwrap();
        assert_eq!(vec!["survivor.configure"], trace.take());
        assert!(!processed.contains("victim"));

        struct Remover;

        impl crate::component::RegistryConfigurer for Remover {
            fn configure(&self, registry: &mut Registry) -> Result<(), AnyError> {
                registry.remove("victim");
                Ok(())
            }
        }
    }
}
