//! The component contract and registry.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::context::Context;
use crate::error::{FlowError, FlowResult};

/// A user-supplied processing unit invoked by the executors.
///
/// Components are created once, initialized once, and reused across steps;
/// `setup` and `teardown` bracket every invocation. `process` is the
/// blocking-style entry point; components that are async-native override
/// `process_async` and declare it with `supports_async`. A component may
/// route graph edges with `Context::set_output_port`, check in on the
/// deadline with `Context::check_deadline`, and pause the flow with
/// `Context::suspend`.
#[async_trait]
pub trait Component: Send + Sync + Debug {
    /// One-time initialization with the component's own configuration
    async fn init(&mut self, _config: &Value) -> FlowResult<()> {
        Ok(())
    }

    /// Per-invocation setup, before `process`
    async fn setup(&self, _ctx: &mut Context) -> FlowResult<()> {
        Ok(())
    }

    /// Process the context. Runs on the calling thread in cooperative mode
    /// and behind a worker boundary in the hard timeout modes.
    fn process(&self, ctx: &mut Context) -> FlowResult<()>;

    /// Cooperative-async variant; invoked instead of `process` when
    /// `supports_async` is true and the executor is in an async-capable mode.
    async fn process_async(&self, ctx: &mut Context) -> FlowResult<()> {
        self.process(ctx)
    }

    /// Per-invocation cleanup; always runs after a successful `setup`,
    /// whether `process` succeeded, failed, or timed out.
    async fn teardown(&self, _ctx: &mut Context) -> FlowResult<()> {
        Ok(())
    }

    /// Configuration issues, empty when the component is ready to run
    fn validate_config(&self) -> Vec<String> {
        Vec::new()
    }

    /// Liveness probe
    async fn health_check(&self) -> bool {
        true
    }

    /// Whether the executor should prefer `process_async`
    fn supports_async(&self) -> bool {
        false
    }

    /// Type identifier for diagnostics
    fn component_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A shared, dynamically dispatched component
pub type SharedComponent = Arc<dyn Component>;

/// Registry of named component instances.
///
/// Iteration order is registration order.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: IndexMap<String, SharedComponent>,
}

impl ComponentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            components: IndexMap::new(),
        }
    }

    /// Register a component under a name
    pub fn register<N, C>(&mut self, name: N, component: C) -> FlowResult<()>
    where
        N: Into<String>,
        C: Component + 'static,
    {
        let name = name.into();
        if self.components.contains_key(&name) {
            return Err(FlowError::configuration(format!(
                "component '{name}' is already registered"
            )));
        }
        self.components.insert(name, Arc::new(component));
        Ok(())
    }

    /// Initialize a component with its configuration, then register it
    pub async fn register_with_config<N, C>(
        &mut self,
        name: N,
        mut component: C,
        config: &Value,
    ) -> FlowResult<()>
    where
        N: Into<String>,
        C: Component + 'static,
    {
        component.init(config).await?;
        self.register(name, component)
    }

    /// Look up a component by name
    pub fn get(&self, name: &str) -> Option<SharedComponent> {
        self.components.get(name).cloned()
    }

    /// Whether a component is registered
    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.components.keys().map(String::as_str).collect()
    }

    /// Number of registered components
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct SetFlag {
        key: String,
    }

    impl Component for SetFlag {
        fn process(&self, ctx: &mut Context) -> FlowResult<()> {
            ctx.set(self.key.clone(), json!(true));
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Configured {
        greeting: parking_lot::Mutex<String>,
    }

    #[async_trait]
    impl Component for Configured {
        async fn init(&mut self, config: &Value) -> FlowResult<()> {
            let greeting = config
                .get("greeting")
                .and_then(Value::as_str)
                .unwrap_or("hello");
            *self.greeting.lock() = greeting.to_string();
            Ok(())
        }

        fn process(&self, ctx: &mut Context) -> FlowResult<()> {
            ctx.set("greeting", json!(self.greeting.lock().clone()));
            Ok(())
        }

        fn validate_config(&self) -> Vec<String> {
            if self.greeting.lock().is_empty() {
                vec!["greeting must not be empty".to_string()]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register("flag", SetFlag { key: "a".into() }).unwrap();
        let err = registry
            .register("flag", SetFlag { key: "b".into() })
            .unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[tokio::test]
    async fn test_register_with_config_runs_init() {
        let mut registry = ComponentRegistry::new();
        registry
            .register_with_config("greet", Configured::default(), &json!({"greeting": "hi"}))
            .await
            .unwrap();

        let component = registry.get("greet").unwrap();
        let mut ctx = Context::new();
        component.process(&mut ctx).unwrap();
        assert_eq!(ctx.get("greeting"), Some(&json!("hi")));
    }

    #[test]
    fn test_names_preserve_registration_order() {
        let mut registry = ComponentRegistry::new();
        registry.register("c", SetFlag { key: "1".into() }).unwrap();
        registry.register("a", SetFlag { key: "2".into() }).unwrap();
        registry.register("b", SetFlag { key: "3".into() }).unwrap();
        assert_eq!(registry.names(), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_default_process_async_delegates() {
        let component = SetFlag { key: "done".into() };
        let mut ctx = Context::new();
        component.process_async(&mut ctx).await.unwrap();
        assert_eq!(ctx.get("done"), Some(&json!(true)));
        assert!(!component.supports_async());
    }
}
