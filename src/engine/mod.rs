//! The flow engine: dispatch, deadlines, suspension, and resume.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
use crate::component::ComponentRegistry;
use crate::config::{FlowConfig, FlowType};
use crate::context::{Context, Metadata, RESUME_DATA_KEY};
use crate::deadline::DeadlineGuard;
use crate::error::{FlowError, FlowResult};
use crate::executor::{conditional, evaluate_gate, graph, sequential, Gate};
use crate::hooks::{FlowHook, HookDispatcher};

/// Orchestrates one configured flow over a registry of components.
///
/// The engine owns the deadline, fans hook events out, catches suspension
/// signals to issue checkpoints, and implements resume. Executions are
/// single-threaded within a flow; run several engines for concurrent flows.
pub struct FlowEngine {
    config: FlowConfig,
    registry: ComponentRegistry,
    hooks: HookDispatcher,
    store: Arc<dyn CheckpointStore>,
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("config", &self.config.reference())
            .field("components", &self.registry.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl FlowEngine {
    /// Create an engine from a parsed configuration and component instances.
    /// Checkpoints go to an in-process store until one is supplied with
    /// [`FlowEngine::with_checkpoint_store`].
    pub fn new(config: FlowConfig, registry: ComponentRegistry) -> Self {
        Self {
            config,
            registry,
            hooks: HookDispatcher::new(),
            store: Arc::new(MemoryCheckpointStore::new()),
        }
    }

    /// Install a lifecycle hook
    pub fn with_hook(mut self, hook: Arc<dyn FlowHook>) -> Self {
        self.hooks.add(hook);
        self
    }

    /// Replace the checkpoint store
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    /// The configuration this engine runs
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// The component registry
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// The checkpoint store
    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        self.store.clone()
    }

    fn deadline_guard(&self) -> Option<DeadlineGuard> {
        let settings = &self.config.settings;
        if settings.timeout_seconds.is_some() || settings.require_deadline_check {
            Some(DeadlineGuard::new(
                settings.timeout_seconds,
                settings.require_deadline_check,
            ))
        } else {
            None
        }
    }

    /// Component names referenced by the configuration, in declaration order
    fn referenced_components(&self) -> Vec<&str> {
        match self.config.flow_type {
            FlowType::Sequential | FlowType::Conditional => self
                .config
                .steps
                .iter()
                .map(|step| step.component_name.as_str())
                .collect(),
            FlowType::Graph => self
                .config
                .nodes
                .iter()
                .map(|node| node.component_name.as_str())
                .collect(),
        }
    }

    async fn dispatch(&self, ctx: &mut Context) -> FlowResult<()> {
        match self.config.flow_type {
            FlowType::Sequential => {
                sequential::execute(&self.config, &self.registry, &self.hooks, ctx).await
            }
            FlowType::Conditional => {
                conditional::execute(&self.config, &self.registry, &self.hooks, ctx).await
            }
            FlowType::Graph => graph::execute(&self.config, &self.registry, &self.hooks, ctx).await,
        }
    }

    /// Shared tail of `execute` and `resume`: checkpoint on suspension,
    /// finalize telemetry otherwise.
    async fn finish(&self, mut ctx: Context, result: FlowResult<()>) -> FlowResult<Context> {
        match result {
            Ok(()) => {
                if ctx.is_suspended() {
                    let checkpoint_id = self.write_checkpoint(&mut ctx).await?;
                    tracing::info!(
                        flow = %self.config.reference(),
                        flow_id = %ctx.metadata.flow_id,
                        checkpoint_id = %checkpoint_id,
                        node = ctx.metadata.suspended_at_node.as_deref().unwrap_or(""),
                        "flow suspended"
                    );
                    return Ok(ctx);
                }
                ctx.metadata.finalize();
                ctx.set_deadline(None);
                tracing::info!(
                    flow = %self.config.reference(),
                    flow_id = %ctx.metadata.flow_id,
                    steps = ctx.metadata.step_timings.len(),
                    errors = ctx.metadata.errors.len(),
                    "flow completed"
                );
                Ok(ctx)
            }
            Err(error) => {
                ctx.metadata.finalize();
                tracing::error!(
                    flow = %self.config.reference(),
                    flow_id = %ctx.metadata.flow_id,
                    %error,
                    "flow failed"
                );
                Err(error)
            }
        }
    }

    async fn write_checkpoint(&self, ctx: &mut Context) -> FlowResult<String> {
        let node = ctx
            .metadata
            .suspended_at_node
            .clone()
            .unwrap_or_default();
        let snapshot = ctx.to_snapshot()?;
        let checkpoint = Checkpoint::new(self.config.reference(), snapshot);
        self.store.save(&checkpoint).await?;
        ctx.metadata.checkpoint_id = Some(checkpoint.checkpoint_id.clone());
        self.hooks
            .flow_suspended(&node, ctx, &checkpoint.checkpoint_id)
            .await;
        Ok(checkpoint.checkpoint_id)
    }

    /// Execute the flow, optionally seeding it with an initial context.
    ///
    /// Returns the final context, or a context whose metadata indicates
    /// suspension and carries the checkpoint id. `data` and `input` from the
    /// initial context are kept; its metadata is replaced by a fresh record.
    pub async fn execute(&self, initial: Option<Context>) -> FlowResult<Context> {
        self.config.validate()?;

        let mut ctx = initial.unwrap_or_default();
        ctx.metadata = Metadata::new();
        ctx.clear_active_port();
        ctx.set_deadline(self.deadline_guard());

        tracing::info!(
            flow = %self.config.reference(),
            flow_id = %ctx.metadata.flow_id,
            flow_type = ?self.config.flow_type,
            "starting flow"
        );

        let result = self.dispatch(&mut ctx).await;
        self.finish(ctx, result).await
    }

    /// Resume a suspended flow from a checkpoint.
    ///
    /// The checkpoint is consumed. `resume_data`, when given, is attached to
    /// the context under the `resume_data` key. Nodes recorded as completed
    /// are not re-executed; the previously suspended node runs again.
    pub async fn resume(
        &self,
        checkpoint_id: &str,
        resume_data: Option<Value>,
    ) -> FlowResult<Context> {
        self.config.validate()?;

        let checkpoint = self
            .store
            .load(checkpoint_id)
            .await?
            .ok_or_else(|| FlowError::CheckpointNotFound {
                checkpoint_id: checkpoint_id.to_string(),
            })?;
        self.store.delete(checkpoint_id).await?;

        let mut ctx = Context::from_snapshot(&checkpoint.context)?;
        ctx.metadata.clear_suspension();
        if let Some(data) = resume_data {
            ctx.set(RESUME_DATA_KEY, data);
        }
        ctx.set_deadline(self.deadline_guard());

        tracing::info!(
            flow = %self.config.reference(),
            flow_id = %ctx.metadata.flow_id,
            checkpoint_id = %checkpoint_id,
            "resuming flow"
        );

        let result = self.dispatch(&mut ctx).await;
        self.finish(ctx, result).await
    }

    /// Structural configuration issues plus each referenced component's own
    /// `validate_config` findings; empty when the flow is ready to run.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = self.config.issues();

        for name in self.referenced_components() {
            match self.registry.get(name) {
                None => issues.push(format!("component '{name}' is not registered")),
                Some(component) => issues.extend(
                    component
                        .validate_config()
                        .into_iter()
                        .map(|issue| format!("{name}: {issue}")),
                ),
            }
        }

        issues
    }

    /// The component names the executor would run against the given context,
    /// without invoking any component.
    ///
    /// Sequential flows evaluate each step's condition; conditional flows
    /// report the first match. Graph flows return every referenced component
    /// in declaration order, since cyclic flows have no topological listing.
    pub fn dry_run(&self, initial: Option<Context>) -> FlowResult<Vec<String>> {
        self.config.validate()?;
        let mut ctx = initial.unwrap_or_default();
        let condition_policy = self.config.condition_error_policy();

        match self.config.flow_type {
            FlowType::Sequential => {
                let mut names = Vec::new();
                for step in &self.config.steps {
                    match evaluate_gate(
                        &step.component_name,
                        step.condition.as_deref(),
                        condition_policy,
                        &mut ctx,
                    )? {
                        Gate::Run => names.push(step.component_name.clone()),
                        Gate::Skip(_) => {}
                    }
                }
                Ok(names)
            }
            FlowType::Conditional => {
                for step in &self.config.steps {
                    if let Gate::Run = evaluate_gate(
                        &step.component_name,
                        step.condition.as_deref(),
                        condition_policy,
                        &mut ctx,
                    )? {
                        return Ok(vec![step.component_name.clone()]);
                    }
                }
                Ok(Vec::new())
            }
            FlowType::Graph => Ok(graph::referenced_components(&self.config)),
        }
    }

    /// Probe every referenced component, by name
    pub async fn health_check(&self) -> IndexMap<String, bool> {
        let mut results = IndexMap::new();
        for name in self.referenced_components() {
            let healthy = match self.registry.get(name) {
                Some(component) => component.health_check().await,
                None => false,
            };
            results.insert(name.to_string(), healthy);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::config::{EdgeConfig, NodeConfig, StepConfig};
    use serde_json::json;

    #[derive(Debug)]
    struct Mark {
        key: &'static str,
    }

    impl Component for Mark {
        fn process(&self, ctx: &mut Context) -> FlowResult<()> {
            ctx.set(self.key, json!(true));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Unhealthy;

    #[async_trait::async_trait]
    impl Component for Unhealthy {
        fn process(&self, _ctx: &mut Context) -> FlowResult<()> {
            Ok(())
        }

        async fn health_check(&self) -> bool {
            false
        }

        fn validate_config(&self) -> Vec<String> {
            vec!["missing endpoint".to_string()]
        }
    }

    fn engine() -> FlowEngine {
        let mut registry = ComponentRegistry::new();
        registry.register("first", Mark { key: "first" }).unwrap();
        registry.register("second", Mark { key: "second" }).unwrap();
        let config = FlowConfig::new(FlowType::Sequential)
            .with_name("two-steps")
            .with_step(StepConfig::new("first"))
            .with_step(StepConfig::new("second"));
        FlowEngine::new(config, registry)
    }

    #[tokio::test]
    async fn test_execute_returns_finalized_context() {
        let ctx = engine().execute(None).await.unwrap();
        assert_eq!(ctx.get("first"), Some(&json!(true)));
        assert_eq!(ctx.get("second"), Some(&json!(true)));
        assert!(ctx.metadata.completed_at.is_some());
        assert!(!ctx.metadata.suspended);
    }

    #[tokio::test]
    async fn test_execute_keeps_initial_data_and_input() {
        let mut initial = Context::with_input(json!({"batch": 7}));
        initial.set("seed", json!("x"));
        let ctx = engine().execute(Some(initial)).await.unwrap();
        assert_eq!(ctx.input, json!({"batch": 7}));
        assert_eq!(ctx.get("seed"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn test_validate_reports_unknown_and_component_issues() {
        let mut registry = ComponentRegistry::new();
        registry.register("present", Unhealthy).unwrap();
        let config = FlowConfig::new(FlowType::Sequential)
            .with_step(StepConfig::new("present"))
            .with_step(StepConfig::new("absent"));
        let engine = FlowEngine::new(config, registry);

        let issues = engine.validate();
        assert!(issues.iter().any(|i| i.contains("absent")));
        assert!(issues.iter().any(|i| i.contains("missing endpoint")));
    }

    #[tokio::test]
    async fn test_dry_run_sequential_respects_conditions() {
        let mut registry = ComponentRegistry::new();
        registry.register("always", Mark { key: "a" }).unwrap();
        registry.register("gated", Mark { key: "b" }).unwrap();
        let config = FlowConfig::new(FlowType::Sequential)
            .with_step(StepConfig::new("always"))
            .with_step(StepConfig::new("gated").with_condition("context.data.go == True"));
        let engine = FlowEngine::new(config, registry);

        let names = engine.dry_run(None).unwrap();
        assert_eq!(names, vec!["always".to_string()]);

        let mut ctx = Context::new();
        ctx.set("go", json!(true));
        let names = engine.dry_run(Some(ctx)).unwrap();
        assert_eq!(names, vec!["always".to_string(), "gated".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_graph_lists_all_components() {
        let mut registry = ComponentRegistry::new();
        registry.register("x", Mark { key: "x" }).unwrap();
        registry.register("y", Mark { key: "y" }).unwrap();
        let config = FlowConfig::new(FlowType::Graph)
            .with_node(NodeConfig::new("n1", "x"))
            .with_node(NodeConfig::new("n2", "y"))
            .with_edge(EdgeConfig::new("n1", "n2"));
        let engine = FlowEngine::new(config, registry);

        assert_eq!(
            engine.dry_run(None).unwrap(),
            vec!["x".to_string(), "y".to_string()]
        );
    }

    #[tokio::test]
    async fn test_resume_unknown_checkpoint() {
        let error = engine().resume("no-such-id", None).await.unwrap_err();
        assert_eq!(error.category(), "checkpoint_not_found");
    }

    #[tokio::test]
    async fn test_health_check_reports_per_component() {
        let mut registry = ComponentRegistry::new();
        registry.register("good", Mark { key: "g" }).unwrap();
        registry.register("bad", Unhealthy).unwrap();
        let config = FlowConfig::new(FlowType::Sequential)
            .with_step(StepConfig::new("good"))
            .with_step(StepConfig::new("bad"));
        let engine = FlowEngine::new(config, registry);

        let health = engine.health_check().await;
        assert_eq!(health.get("good"), Some(&true));
        assert_eq!(health.get("bad"), Some(&false));
    }
}
