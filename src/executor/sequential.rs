//! Sequential executor: every configured step, in declared order.

use crate::component::ComponentRegistry;
use crate::config::{ErrorPolicy, FlowConfig};
use crate::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::hooks::HookDispatcher;

use super::{
    check_deadline_between_steps, evaluate_gate, run_step, Gate, StepInvocation,
    REASON_ERROR_POLICY,
};

/// Run every step in declared order. Each step's condition gates that step
/// only; a false condition records a skip and moves on. On a resumed
/// execution, steps already in `completed_nodes` are passed over silently.
pub(crate) async fn execute(
    config: &FlowConfig,
    registry: &ComponentRegistry,
    hooks: &HookDispatcher,
    ctx: &mut Context,
) -> FlowResult<()> {
    let condition_policy = config.condition_error_policy();
    let completed_before = ctx.metadata.completed_nodes.clone();

    for (index, step) in config.steps.iter().enumerate() {
        let name = step.component_name.as_str();

        check_deadline_between_steps(ctx, name)?;

        if completed_before.contains(name) {
            continue;
        }

        match evaluate_gate(name, step.condition.as_deref(), condition_policy, ctx)? {
            Gate::Skip(reason) => {
                ctx.metadata.record_skip(name);
                hooks.node_skipped(name, ctx, reason).await;
                continue;
            }
            Gate::Run => {}
        }

        let component = registry.get(name).ok_or_else(|| {
            FlowError::configuration(format!("component '{name}' is not registered"))
        })?;

        let result = run_step(
            StepInvocation {
                step_index: index,
                label: name,
                component_name: name,
                component,
                timeout_mode: config.settings.timeout_mode,
            },
            ctx,
            hooks,
        )
        .await;

        match result {
            Ok(()) => {
                if ctx.is_suspended() {
                    return Ok(());
                }
                ctx.metadata.completed_nodes.insert(name.to_string());
            }
            Err(error) => {
                if error.is_fatal() {
                    return Err(error);
                }
                ctx.metadata
                    .record_error(name, &error.to_string(), error.category());
                match config.error_policy(step.on_error) {
                    ErrorPolicy::Fail => return Err(error),
                    ErrorPolicy::Skip => {
                        ctx.metadata.record_skip(name);
                        hooks.node_skipped(name, ctx, REASON_ERROR_POLICY).await;
                    }
                    ErrorPolicy::Continue => {
                        // Treated as run: downstream conditions observe
                        // whatever data the component wrote before failing.
                        ctx.metadata.completed_nodes.insert(name.to_string());
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::config::{FlowType, StepConfig};
    use serde_json::json;

    #[derive(Debug)]
    struct Append {
        tag: &'static str,
    }

    impl Component for Append {
        fn process(&self, ctx: &mut Context) -> FlowResult<()> {
            let mut log: Vec<String> = ctx.get_as("log").unwrap_or_default();
            log.push(self.tag.to_string());
            ctx.set("log", json!(log));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Fails;

    impl Component for Fails {
        fn process(&self, _ctx: &mut Context) -> FlowResult<()> {
            Err(FlowError::Internal("always fails".to_string()))
        }
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register("a", Append { tag: "a" }).unwrap();
        registry.register("b", Append { tag: "b" }).unwrap();
        registry.register("c", Append { tag: "c" }).unwrap();
        registry.register("broken", Fails).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_steps_run_in_declared_order() {
        let config = FlowConfig::new(FlowType::Sequential)
            .with_step(StepConfig::new("a"))
            .with_step(StepConfig::new("b"))
            .with_step(StepConfig::new("c"));
        let mut ctx = Context::new();

        execute(&config, &registry(), &HookDispatcher::new(), &mut ctx)
            .await
            .unwrap();

        assert_eq!(ctx.get("log"), Some(&json!(["a", "b", "c"])));
        assert_eq!(ctx.metadata.step_timings.len(), 3);
    }

    #[tokio::test]
    async fn test_false_condition_skips_only_that_step() {
        let config = FlowConfig::new(FlowType::Sequential)
            .with_step(StepConfig::new("a"))
            .with_step(StepConfig::new("b").with_condition("context.data.missing == True"))
            .with_step(StepConfig::new("c"));
        let mut ctx = Context::new();

        execute(&config, &registry(), &HookDispatcher::new(), &mut ctx)
            .await
            .unwrap();

        assert_eq!(ctx.get("log"), Some(&json!(["a", "c"])));
        assert_eq!(ctx.metadata.skipped_components, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_on_first_error() {
        let config = FlowConfig::new(FlowType::Sequential)
            .with_step(StepConfig::new("broken"))
            .with_step(StepConfig::new("c"));
        let mut ctx = Context::new();

        let error = execute(&config, &registry(), &HookDispatcher::new(), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(error.category(), "component");
        assert!(ctx.get("log").is_none());
        assert_eq!(ctx.metadata.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_error_policy_skip_continues() {
        let config = FlowConfig::new(FlowType::Sequential)
            .with_step(StepConfig::new("broken").with_on_error(ErrorPolicy::Skip))
            .with_step(StepConfig::new("c"));
        let mut ctx = Context::new();

        execute(&config, &registry(), &HookDispatcher::new(), &mut ctx)
            .await
            .unwrap();

        assert_eq!(ctx.get("log"), Some(&json!(["c"])));
        assert_eq!(ctx.metadata.skipped_components, vec!["broken".to_string()]);
        assert_eq!(ctx.metadata.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_passes_over_completed_steps() {
        let config = FlowConfig::new(FlowType::Sequential)
            .with_step(StepConfig::new("a"))
            .with_step(StepConfig::new("b"));
        let mut ctx = Context::new();
        ctx.metadata.completed_nodes.insert("a".to_string());

        execute(&config, &registry(), &HookDispatcher::new(), &mut ctx)
            .await
            .unwrap();

        // Only b ran; a kept its earlier completion.
        assert_eq!(ctx.get("log"), Some(&json!(["b"])));
        assert!(ctx.metadata.completed_nodes.contains("a"));
        assert!(ctx.metadata.completed_nodes.contains("b"));
    }
}
