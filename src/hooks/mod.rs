//! Lifecycle observers.
//!
//! Hooks watch execution; they never steer it. Every callback runs inside an
//! isolation boundary: an `Err` is logged and swallowed, and a panicking hook
//! is contained, so a broken observer cannot change which steps run or how
//! they end.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::context::Context;
use crate::error::{FlowError, FlowResult};

/// Observer interface receiving lifecycle events.
///
/// All callbacks default to no-ops; implement the ones of interest.
#[async_trait]
pub trait FlowHook: Send + Sync {
    /// A step or node is about to execute
    async fn on_node_start(&self, _node: &str, _ctx: &Context) -> FlowResult<()> {
        Ok(())
    }

    /// A step or node finished normally
    async fn on_node_complete(
        &self,
        _node: &str,
        _ctx: &Context,
        _duration_ms: u64,
    ) -> FlowResult<()> {
        Ok(())
    }

    /// A step or node failed
    async fn on_node_error(
        &self,
        _node: &str,
        _ctx: &Context,
        _error: &FlowError,
    ) -> FlowResult<()> {
        Ok(())
    }

    /// A step or node was skipped
    async fn on_node_skipped(&self, _node: &str, _ctx: &Context, _reason: &str) -> FlowResult<()> {
        Ok(())
    }

    /// The flow suspended and a checkpoint was written
    async fn on_flow_suspended(
        &self,
        _node: &str,
        _ctx: &Context,
        _checkpoint_id: &str,
    ) -> FlowResult<()> {
        Ok(())
    }
}

/// Fans lifecycle events out to every installed hook, isolating faults.
#[derive(Clone, Default)]
pub struct HookDispatcher {
    hooks: Vec<Arc<dyn FlowHook>>,
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

macro_rules! fan_out {
    ($self:expr, $event:literal, $node:expr, $method:ident($($arg:expr),*)) => {
        for hook in &$self.hooks {
            let outcome = AssertUnwindSafe(hook.$method($($arg),*)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(event = $event, node = %$node, %error, "hook failed");
                }
                Err(_) => {
                    tracing::warn!(event = $event, node = %$node, "hook panicked");
                }
            }
        }
    };
}

impl HookDispatcher {
    /// Create a dispatcher with no hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a hook
    pub fn add(&mut self, hook: Arc<dyn FlowHook>) {
        self.hooks.push(hook);
    }

    /// Number of installed hooks
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are installed
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Notify `on_node_start`
    pub async fn node_start(&self, node: &str, ctx: &Context) {
        fan_out!(self, "node_start", node, on_node_start(node, ctx));
    }

    /// Notify `on_node_complete`
    pub async fn node_complete(&self, node: &str, ctx: &Context, duration_ms: u64) {
        fan_out!(
            self,
            "node_complete",
            node,
            on_node_complete(node, ctx, duration_ms)
        );
    }

    /// Notify `on_node_error`
    pub async fn node_error(&self, node: &str, ctx: &Context, error: &FlowError) {
        fan_out!(self, "node_error", node, on_node_error(node, ctx, error));
    }

    /// Notify `on_node_skipped`
    pub async fn node_skipped(&self, node: &str, ctx: &Context, reason: &str) {
        fan_out!(
            self,
            "node_skipped",
            node,
            on_node_skipped(node, ctx, reason)
        );
    }

    /// Notify `on_flow_suspended`
    pub async fn flow_suspended(&self, node: &str, ctx: &Context, checkpoint_id: &str) {
        fan_out!(
            self,
            "flow_suspended",
            node,
            on_flow_suspended(node, ctx, checkpoint_id)
        );
    }
}
