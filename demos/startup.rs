//! A small application starting up through the registry.
//!
//! The application itself only defines a plugin loader. The loader registers a plugin (which
//! registers another one), an interceptor timing the construction of everything and a listener.
//! A configurer adjusts the greeting once all the plugins are in.
//!
//! Try it with some settings in the environment, eg:
//!
//! ```sh
//! DEMO_GUARD_LEVEL=warn DEMO_DETECTOR=false cargo run --example startup
//! ```
//!
//! (The default configuration logs everything to stderr.)

use std::sync::Arc;
use std::time::Instant;

use bootstage::cfg_loader::Builder as CfgBuilder;
use bootstage::error::log_errors;
use bootstage::logging;
use bootstage::prelude::*;
use log::{debug, info};

/// The base configuration.
const DEFAULT_CONFIG: &str = r#"
slow-extension = "10ms"

[[logging]]
type = "stderr"
level = "debug"
"#;

/// Loads the plugins. Discovered as a manual extension, so it runs first.
struct PluginLoader;

impl RegistryConfigurer for PluginLoader {
    fn configure(&self, _: &mut Registry) -> Result<(), AnyError> {
        debug!("All plugins are loaded");
        Ok(())
    }
}

impl RegistryMutator for PluginLoader {
    fn mutate_registry(&self, registry: &mut Registry) -> Result<(), AnyError> {
        registry.register(
            "plugin.web",
            Definition::mutator(|_| WebPlugin).tier(Tier::Ordered(10)),
        );
        registry.register(
            "timing",
            Definition::interceptor(|_| Timing).tier(Tier::Eager(0)),
        );
        registry.register("announcer", Definition::listener(|_| Announcer));
        Ok(())
    }
}

/// A plugin registering yet another plugin.
struct WebPlugin;

impl RegistryConfigurer for WebPlugin {
    fn configure(&self, _: &mut Registry) -> Result<(), AnyError> {
        Ok(())
    }
}

impl RegistryMutator for WebPlugin {
    fn mutate_registry(&self, registry: &mut Registry) -> Result<(), AnyError> {
        registry.register(
            "web.base",
            Definition::value(()).property("greeting", "Hello"),
        );
        registry.register(
            "web.greeting",
            Definition::plain(|merged| {
                format!(
                    "{} {}",
                    merged.property("greeting").unwrap_or("Hi"),
                    merged.property("who").unwrap_or("nobody"),
                )
            })
            .parent("web.base"),
        );
        registry.register("plugin.web-config", Definition::configurer(|_| Localize));
        Ok(())
    }
}

/// Adjusts the greeting once everything is registered.
struct Localize;

impl RegistryConfigurer for Localize {
    fn configure(&self, registry: &mut Registry) -> Result<(), AnyError> {
        if let Some(def) = registry.definition_mut("web.greeting") {
            def.properties_mut()
                .insert("who".to_owned(), "world".to_owned());
        }
        Ok(())
    }
}

struct Timing;

impl Interceptor for Timing {
    fn before_construct(
        &self,
        _: &Registry,
        component: Component,
        name: &str,
    ) -> Result<Component, AnyError> {
        debug!("Constructed {} at {:?}", name, Instant::now());
        Ok(component)
    }
}

struct Announcer;

impl Listener for Announcer {
    fn on_event(&self, event: &Event) -> Result<(), AnyError> {
        info!("Got {:?}", event);
        Ok(())
    }
}

fn run() -> Result<(), AnyError> {
    let settings: Settings = CfgBuilder::new()
        .defaults(DEFAULT_CONFIG)
        .env("DEMO")
        .build()
        .load()?;
    logging::install(&settings.logging)?;

    let mut context = Builder::new()
        .settings(settings)
        .extension("plugins", Extension::Mutating(Arc::new(PluginLoader)))
        .build()?;
    info!("{}", context.registry_mut().get::<String>("web.greeting")?);
    for skipped in context.skipped_components() {
        info!("{} skipped some interceptors", skipped);
    }
    context.publish(&Event::Custom("serving".to_owned()))?;
    context.close()
}

fn main() {
    if log_errors(module_path!(), run).is_err() {
        std::process::exit(1);
    }
}
