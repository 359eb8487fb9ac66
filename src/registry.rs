//! Plugin registry (C8): a process-wide mapping from a string identifier
//! (typically a binding URI) to a factory function, used to enumerate every
//! supported binding/decoder at process init. Read-mostly after init, writes
//! permitted but rare — `std::sync::RwLock<HashMap<...>>`, the usual shape
//! for synchronous (non-awaited) shared state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Opaque configuration handed to a factory at plugin construction time —
/// this crate has no DOM of its own, so a factory decides for itself how to
/// interpret whatever a host passes it.
pub type PluginConfig = serde_json::Value;

pub trait PluginFactory<T: ?Sized>: Send + Sync {
    fn build(&self, config: &PluginConfig) -> Result<Arc<T>, String>;
}

impl<T: ?Sized, F> PluginFactory<T> for F
where
    F: Fn(&PluginConfig) -> Result<Arc<T>, String> + Send + Sync,
{
    fn build(&self, config: &PluginConfig) -> Result<Arc<T>, String> {
        self(config)
    }
}

/// A registry over a single plugin kind `T` (e.g. `dyn MessageEncoder`).
/// Hosts typically keep one `PluginRegistry` per kind rather than a single
/// registry of `Any`, mirroring how the distilled spec describes bindings
/// and decoders as separately enumerable plugin sets.
pub struct PluginRegistry<T: ?Sized> {
    factories: RwLock<HashMap<String, Arc<dyn PluginFactory<T>>>>,
}

impl<T: ?Sized> Default for PluginRegistry<T> {
    fn default() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized> PluginRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or overwrites) the factory for `id`.
    pub fn register_factory(&self, id: impl Into<String>, factory: Arc<dyn PluginFactory<T>>) {
        self.factories.write().unwrap().insert(id.into(), factory);
    }

    /// Builds a new plugin instance via the factory registered for `id`.
    pub fn new_plugin(&self, id: &str, config: &PluginConfig) -> Result<Arc<T>, String> {
        let factories = self.factories.read().unwrap();
        let factory = factories.get(id).ok_or_else(|| format!("no factory registered for '{id}'"))?;
        factory.build(config)
    }

    pub fn registered_ids(&self) -> Vec<String> {
        self.factories.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct StaticGreeter(String);
    impl Greeter for StaticGreeter {
        fn greet(&self) -> String {
            self.0.clone()
        }
    }

    #[test]
    fn register_then_build_invokes_the_registered_factory() {
        let registry: PluginRegistry<dyn Greeter> = PluginRegistry::new();
        registry.register_factory(
            "static",
            Arc::new(|config: &PluginConfig| {
                let name = config.get("name").and_then(|v| v.as_str()).unwrap_or("world");
                Ok(Arc::new(StaticGreeter(format!("hello, {name}"))) as Arc<dyn Greeter>)
            }),
        );

        let plugin = registry.new_plugin("static", &serde_json::json!({"name": "saml"})).unwrap();
        assert_eq!(plugin.greet(), "hello, saml");
    }

    #[test]
    fn register_factory_overwrites_previous_registration() {
        let registry: PluginRegistry<dyn Greeter> = PluginRegistry::new();
        registry.register_factory("g", Arc::new(|_: &PluginConfig| Ok(Arc::new(StaticGreeter("first".to_string())) as Arc<dyn Greeter>)));
        registry.register_factory("g", Arc::new(|_: &PluginConfig| Ok(Arc::new(StaticGreeter("second".to_string())) as Arc<dyn Greeter>)));

        let plugin = registry.new_plugin("g", &serde_json::Value::Null).unwrap();
        assert_eq!(plugin.greet(), "second");
    }

    #[test]
    fn unregistered_id_fails() {
        let registry: PluginRegistry<dyn Greeter> = PluginRegistry::new();
        assert!(registry.new_plugin("missing", &serde_json::Value::Null).is_err());
    }
}
