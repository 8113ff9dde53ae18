//! Conditional executor: first-match dispatch.

use crate::component::ComponentRegistry;
use crate::config::{ErrorPolicy, FlowConfig};
use crate::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::hooks::HookDispatcher;

use super::{
    check_deadline_between_steps, evaluate_gate, run_step, Gate, StepInvocation,
    REASON_ERROR_POLICY,
};

/// Skip reason recorded for steps after the first match
const REASON_NOT_SELECTED: &str = "not_selected";

/// Scan the step sequence and run the first step whose condition evaluates
/// true; a step with no condition is the default case. Everything after the
/// match is recorded as skipped. A failing condition skips its own step, so
/// it never causes the default case to fire by accident.
pub(crate) async fn execute(
    config: &FlowConfig,
    registry: &ComponentRegistry,
    hooks: &HookDispatcher,
    ctx: &mut Context,
) -> FlowResult<()> {
    let condition_policy = config.condition_error_policy();
    let completed_before = ctx.metadata.completed_nodes.clone();
    let mut selected = false;

    for (index, step) in config.steps.iter().enumerate() {
        let name = step.component_name.as_str();

        if selected {
            ctx.metadata.record_skip(name);
            hooks.node_skipped(name, ctx, REASON_NOT_SELECTED).await;
            continue;
        }

        check_deadline_between_steps(ctx, name)?;

        match evaluate_gate(name, step.condition.as_deref(), condition_policy, ctx)? {
            Gate::Skip(reason) => {
                ctx.metadata.record_skip(name);
                hooks.node_skipped(name, ctx, reason).await;
                continue;
            }
            Gate::Run => {}
        }

        selected = true;

        if completed_before.contains(name) {
            continue;
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
    struct Handler {
        tag: &'static str,
    }

    impl Component for Handler {
        fn process(&self, ctx: &mut Context) -> FlowResult<()> {
            ctx.set("handled_by", json!(self.tag));
            Ok(())
        }
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register("user_handler", Handler { tag: "user" }).unwrap();
        registry.register("order_handler", Handler { tag: "order" }).unwrap();
        registry.register("default_handler", Handler { tag: "default" }).unwrap();
        registry
    }

    fn first_match_config() -> FlowConfig {
        FlowConfig::new(FlowType::Conditional)
            .with_step(
                StepConfig::new("user_handler").with_condition("context.data.kind == \"user\""),
            )
            .with_step(
                StepConfig::new("order_handler").with_condition("context.data.kind == \"order\""),
            )
            .with_step(StepConfig::new("default_handler"))
    }

    #[tokio::test]
    async fn test_first_matching_step_runs() {
        let mut ctx = Context::new();
        ctx.set("kind", json!("order"));

        execute(
            &first_match_config(),
            &registry(),
            &HookDispatcher::new(),
            &mut ctx,
        )
        .await
        .unwrap();

        assert_eq!(ctx.get("handled_by"), Some(&json!("order")));
        assert_eq!(
            ctx.metadata.skipped_components,
            vec!["user_handler".to_string(), "default_handler".to_string()]
        );
        assert_eq!(ctx.metadata.step_timings.len(), 1);
    }

    #[tokio::test]
    async fn test_default_case_fires_when_nothing_matches() {
        let mut ctx = Context::new();
        ctx.set("kind", json!("invoice"));

        execute(
            &first_match_config(),
            &registry(),
            &HookDispatcher::new(),
            &mut ctx,
        )
        .await
        .unwrap();

        assert_eq!(ctx.get("handled_by"), Some(&json!("default")));
    }

    #[tokio::test]
    async fn test_condition_error_defaults_to_skip() {
        // A broken condition must not make the default case unreachable, and
        // must not fail the flow under the conditional executor's default.
        let config = FlowConfig::new(FlowType::Conditional)
            .with_step(StepConfig::new("user_handler").with_condition("len(context.data.x)"))
            .with_step(StepConfig::new("default_handler"));
        let mut ctx = Context::new();

        execute(&config, &registry(), &HookDispatcher::new(), &mut ctx)
            .await
            .unwrap();

        assert_eq!(ctx.get("handled_by"), Some(&json!("default")));
        assert_eq!(ctx.metadata.condition_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_no_match_runs_nothing() {
        let config = FlowConfig::new(FlowType::Conditional).with_step(
            StepConfig::new("user_handler").with_condition("context.data.kind == \"user\""),
        );
        let mut ctx = Context::new();

        execute(&config, &registry(), &HookDispatcher::new(), &mut ctx)
            .await
            .unwrap();

        assert!(ctx.get("handled_by").is_none());
        assert_eq!(
            ctx.metadata.skipped_components,
            vec!["user_handler".to_string()]
        );
    }
}
