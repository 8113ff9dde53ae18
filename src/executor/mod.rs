//! Executors: shared step machinery plus the three dispatch strategies.
//!
//! Every executor funnels component invocations through [`run_step`], which
//! owns the lifecycle contract: `setup`, then `process` under the configured
//! timeout mode, then `teardown` whenever `setup` succeeded, with timing
//! capture and hook fan-out on the way.

pub mod conditional;
pub mod graph;
pub mod sequential;

use std::time::Instant;

use chrono::Utc;
use serde_json::Value;

use crate::component::SharedComponent;
use crate::config::{ConditionErrorPolicy, TimeoutMode};
use crate::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::expr;
use crate::hooks::HookDispatcher;

/// Skip reason recorded when a condition evaluated false
pub(crate) const REASON_CONDITION_FALSE: &str = "condition_false";
/// Skip reason recorded when a condition failed to evaluate
pub(crate) const REASON_CONDITION_ERROR: &str = "condition_error";
/// Skip reason recorded when no incoming graph edge fired
pub(crate) const REASON_UNREACHABLE: &str = "unreachable";
/// Skip reason recorded when an error policy skipped the step
pub(crate) const REASON_ERROR_POLICY: &str = "error_policy";

/// Outcome of evaluating a step's gate
#[derive(Debug)]
pub(crate) enum Gate {
    /// The step runs
    Run,
    /// The step is skipped for the given reason
    Skip(&'static str),
}

/// Evaluate a step condition, routing evaluation failures by policy.
pub(crate) fn evaluate_gate(
    component: &str,
    condition: Option<&str>,
    policy: ConditionErrorPolicy,
    ctx: &mut Context,
) -> FlowResult<Gate> {
    let Some(expression) = condition else {
        return Ok(Gate::Run);
    };

    match expr::evaluate_condition(expression, ctx) {
        Ok(true) => Ok(Gate::Run),
        Ok(false) => Ok(Gate::Skip(REASON_CONDITION_FALSE)),
        Err(error) => {
            ctx.metadata
                .record_condition_error(component, expression, &error.to_string());
            match policy {
                ConditionErrorPolicy::Fail => {
                    Err(FlowError::condition_eval(expression, error.to_string()))
                }
                ConditionErrorPolicy::Skip => Ok(Gate::Skip(REASON_CONDITION_ERROR)),
                ConditionErrorPolicy::Warn => {
                    tracing::warn!(
                        component = %component,
                        condition = %expression,
                        %error,
                        "condition failed to evaluate, skipping step"
                    );
                    Ok(Gate::Skip(REASON_CONDITION_ERROR))
                }
            }
        }
    }
}

/// One component invocation as the executors see it.
pub(crate) struct StepInvocation<'a> {
    /// Index of the step or node in its flow structure
    pub step_index: usize,
    /// Label used for hooks and skip records: node id in graphs, component
    /// name otherwise
    pub label: &'a str,
    /// Registry name of the component
    pub component_name: &'a str,
    /// The component instance
    pub component: SharedComponent,
    /// Deadline enforcement strategy
    pub timeout_mode: TimeoutMode,
}

/// Flow-control errors pass through untouched; anything else a component
/// returns is wrapped as a `Component` error carrying its name.
fn into_component_error(component: &str, error: FlowError) -> FlowError {
    match error {
        passthrough @ (FlowError::Timeout { .. }
        | FlowError::DeadlineCheck { .. }
        | FlowError::Component { .. }) => passthrough,
        other => FlowError::component(component, other),
    }
}

/// Drive one component invocation through its lifecycle.
///
/// Teardown runs whenever setup succeeded, including on the failure and
/// timeout paths; a strict-mode `DeadlineCheck` violation surfaces here, at
/// teardown time. A timing record is appended for every invocation that got
/// past its gate.
pub(crate) async fn run_step(
    invocation: StepInvocation<'_>,
    ctx: &mut Context,
    hooks: &HookDispatcher,
) -> FlowResult<()> {
    let StepInvocation {
        step_index,
        label,
        component_name,
        component,
        timeout_mode,
    } = invocation;

    hooks.node_start(label, ctx).await;

    let started_at = Utc::now();
    let clock = Instant::now();
    if let Some(guard) = ctx.deadline() {
        guard.begin_invocation(label);
    }

    tracing::debug!(
        node = %label,
        component = %component_name,
        flow_id = %ctx.metadata.flow_id,
        "executing component"
    );

    if let Err(error) = component.setup(ctx).await {
        let error = into_component_error(component_name, error);
        ctx.metadata.record_timing(
            step_index,
            component_name,
            started_at,
            clock.elapsed().as_millis() as u64,
        );
        hooks.node_error(label, ctx, &error).await;
        return Err(error);
    }

    let process_result = match timeout_mode {
        TimeoutMode::Cooperative => process_cooperative(&component, ctx).await,
        TimeoutMode::HardAsync => process_hard_async(&component, label, ctx).await,
        TimeoutMode::HardProcess => process_hard_process(&component, label, ctx).await,
    }
    .map_err(|error| into_component_error(component_name, error));

    // Setup succeeded, so teardown runs no matter how process ended.
    let teardown_result = component.teardown(ctx).await;

    let strict_result = match ctx.deadline() {
        Some(guard) => guard.finish_invocation(label),
        None => Ok(()),
    };

    let duration_ms = clock.elapsed().as_millis() as u64;
    ctx.metadata
        .record_timing(step_index, component_name, started_at, duration_ms);

    let result = match (process_result, strict_result) {
        (Err(error), _) if error.is_fatal() => Err(error),
        (_, Err(strict)) => Err(strict),
        (Err(error), Ok(())) => Err(error),
        (Ok(()), Ok(())) => teardown_result.map_err(|e| into_component_error(component_name, e)),
    };

    match &result {
        Ok(()) => {
            hooks.node_complete(label, ctx, duration_ms).await;
            tracing::debug!(node = %label, duration_ms, "component completed");
        }
        Err(error) => {
            hooks.node_error(label, ctx, error).await;
            tracing::error!(node = %label, %error, "component failed");
        }
    }

    result
}

/// Cooperative mode: run inline on the calling task.
async fn process_cooperative(component: &SharedComponent, ctx: &mut Context) -> FlowResult<()> {
    if component.supports_async() {
        component.process_async(ctx).await
    } else {
        component.process(ctx)
    }
}

/// Hard-async mode: run on a background worker with a fresh context copy,
/// merged back only on success. An expired worker is aborted; the caller's
/// context is never touched by an abandoned worker.
async fn process_hard_async(
    component: &SharedComponent,
    label: &str,
    ctx: &mut Context,
) -> FlowResult<()> {
    let worker_component = component.clone();
    let mut worker_ctx = ctx.clone();
    let mut handle = tokio::spawn(async move {
        let result = if worker_component.supports_async() {
            worker_component.process_async(&mut worker_ctx).await
        } else {
            worker_component.process(&mut worker_ctx)
        };
        (result, worker_ctx)
    });

    let remaining = ctx.deadline().and_then(|guard| guard.remaining());
    let joined = match remaining {
        Some(remaining) => match tokio::time::timeout(remaining, &mut handle).await {
            Ok(joined) => joined,
            Err(_elapsed) => {
                handle.abort();
                let elapsed = ctx.deadline().map(|g| g.elapsed()).unwrap_or_default();
                return Err(FlowError::timeout(elapsed, label));
            }
        },
        None => (&mut handle).await,
    };

    match joined {
        Ok((Ok(()), worker_ctx)) => {
            *ctx = worker_ctx;
            Ok(())
        }
        Ok((Err(error), _discarded)) => Err(error),
        Err(join_error) => Err(FlowError::Internal(format!(
            "worker task for '{label}' failed: {join_error}"
        ))),
    }
}

/// Hard-process mode: run the blocking `process` on a detached worker behind
/// a full serialization boundary. The worker sees a deserialized copy of the
/// context and no deadline handle; an expired worker is abandoned.
async fn process_hard_process(
    component: &SharedComponent,
    label: &str,
    ctx: &mut Context,
) -> FlowResult<()> {
    let snapshot = ctx.to_snapshot()?;
    let worker_component = component.clone();
    let (tx, rx) = std::sync::mpsc::channel::<FlowResult<(Value, Option<String>)>>();

    std::thread::spawn(move || {
        let outcome = (|| {
            let mut worker_ctx = Context::from_snapshot(&snapshot)?;
            worker_component.process(&mut worker_ctx)?;
            let port = worker_ctx.active_port().map(str::to_string);
            let snapshot = worker_ctx.to_snapshot()?;
            Ok((snapshot, port))
        })();
        let _ = tx.send(outcome);
    });

    let wait = ctx.deadline().and_then(|guard| guard.remaining());
    let received = tokio::task::spawn_blocking(move || match wait {
        Some(remaining) => rx.recv_timeout(remaining),
        None => rx
            .recv()
            .map_err(|_| std::sync::mpsc::RecvTimeoutError::Disconnected),
    })
    .await
    .map_err(|join_error| {
        FlowError::Internal(format!("worker wait for '{label}' failed: {join_error}"))
    })?;

    match received {
        Ok(Ok((snapshot, port))) => {
            let mut restored = Context::from_snapshot(&snapshot)?;
            restored.set_deadline(ctx.deadline().cloned());
            if let Some(port) = port {
                restored.set_output_port(port);
            }
            *ctx = restored;
            Ok(())
        }
        Ok(Err(error)) => Err(error),
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
            let elapsed = ctx.deadline().map(|g| g.elapsed()).unwrap_or_default();
            Err(FlowError::timeout(elapsed, label))
        }
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Err(FlowError::Internal(format!(
            "worker for '{label}' exited without a result"
        ))),
    }
}

/// Deadline check between steps; a no-op when the flow is unbounded.
pub(crate) fn check_deadline_between_steps(ctx: &Context, at_step: &str) -> FlowResult<()> {
    match ctx.deadline() {
        Some(guard) => guard.check(at_step),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Marker;

    impl Component for Marker {
        fn process(&self, ctx: &mut Context) -> FlowResult<()> {
            ctx.set("ran", json!(true));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl Component for Failing {
        fn process(&self, _ctx: &mut Context) -> FlowResult<()> {
            Err(FlowError::Internal("boom".to_string()))
        }
    }

    fn invocation<'a>(
        label: &'a str,
        component: SharedComponent,
        mode: TimeoutMode,
    ) -> StepInvocation<'a> {
        StepInvocation {
            step_index: 0,
            label,
            component_name: label,
            component,
            timeout_mode: mode,
        }
    }

    #[tokio::test]
    async fn test_run_step_records_timing() {
        let mut ctx = Context::new();
        let hooks = HookDispatcher::new();
        run_step(
            invocation("marker", Arc::new(Marker), TimeoutMode::Cooperative),
            &mut ctx,
            &hooks,
        )
        .await
        .unwrap();

        assert_eq!(ctx.get("ran"), Some(&json!(true)));
        assert_eq!(ctx.metadata.step_timings.len(), 1);
        assert_eq!(ctx.metadata.step_timings[0].component, "marker");
    }

    #[tokio::test]
    async fn test_component_errors_are_wrapped() {
        let mut ctx = Context::new();
        let hooks = HookDispatcher::new();
        let error = run_step(
            invocation("failing", Arc::new(Failing), TimeoutMode::Cooperative),
            &mut ctx,
            &hooks,
        )
        .await
        .unwrap_err();

        assert_eq!(error.category(), "component");
        // The failed invocation still gets a timing entry.
        assert_eq!(ctx.metadata.step_timings.len(), 1);
    }

    #[tokio::test]
    async fn test_hard_async_merges_worker_context() {
        let mut ctx = Context::new();
        let hooks = HookDispatcher::new();
        run_step(
            invocation("marker", Arc::new(Marker), TimeoutMode::HardAsync),
            &mut ctx,
            &hooks,
        )
        .await
        .unwrap();

        assert_eq!(ctx.get("ran"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_hard_process_round_trips_context() {
        let mut ctx = Context::new();
        ctx.set("seed", json!(7));
        let hooks = HookDispatcher::new();
        run_step(
            invocation("marker", Arc::new(Marker), TimeoutMode::HardProcess),
            &mut ctx,
            &hooks,
        )
        .await
        .unwrap();

        assert_eq!(ctx.get("seed"), Some(&json!(7)));
        assert_eq!(ctx.get("ran"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_gate_condition_false_skips() {
        let mut ctx = Context::new();
        ctx.set("ok", json!(false));
        let gate = evaluate_gate(
            "step",
            Some("context.data.ok == True"),
            ConditionErrorPolicy::Fail,
            &mut ctx,
        )
        .unwrap();
        assert!(matches!(gate, Gate::Skip(REASON_CONDITION_FALSE)));
    }

    #[tokio::test]
    async fn test_gate_error_routing() {
        let mut ctx = Context::new();

        let err = evaluate_gate(
            "step",
            Some("len(context.data.x)"),
            ConditionErrorPolicy::Fail,
            &mut ctx,
        )
        .unwrap_err();
        assert_eq!(err.category(), "condition_eval");

        let gate = evaluate_gate(
            "step",
            Some("len(context.data.x)"),
            ConditionErrorPolicy::Skip,
            &mut ctx,
        )
        .unwrap();
        assert!(matches!(gate, Gate::Skip(REASON_CONDITION_ERROR)));
        assert_eq!(ctx.metadata.condition_errors.len(), 2);
    }
}
