//! # Flowgraph
//!
//! A declarative flow execution engine: hand it a parsed flow configuration
//! and a registry of components, and it orchestrates them through sequential,
//! first-match conditional, or directed-graph control structures while
//! enforcing timeouts, error policies, safe runtime conditions, and
//! suspension/resume through checkpoints.
//!
//! ## Features
//!
//! - **Three dispatch strategies**: sequential steps, first-match branching,
//!   and graphs with port-based routing and bounded cycles
//! - **Safe conditions**: step gating through a restricted expression
//!   language evaluated over the context, never host code
//! - **Deadline enforcement**: cooperative checks, worker-task cancellation,
//!   or a serialization-isolated worker, per flow
//! - **Suspension and resume**: components can pause a flow into a
//!   checkpoint; resume picks up with completed work skipped
//! - **Telemetry**: per-step timings, skips, errors, and visit counts on
//!   every execution
//! - **Observability**: lifecycle hooks with fault isolation, and `tracing`
//!   throughout
//!
//! ## Quick Start
//!
//! ```rust
//! use flowgraph::{
//!     Component, ComponentRegistry, Context, FlowConfig, FlowEngine, FlowResult, FlowType,
//!     StepConfig,
//! };
//! use serde_json::json;
//!
//! #[derive(Debug)]
//! struct Greet;
//!
//! impl Component for Greet {
//!     fn process(&self, ctx: &mut Context) -> FlowResult<()> {
//!         ctx.set("greeting", json!("hello"));
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> FlowResult<()> {
//!     let mut registry = ComponentRegistry::new();
//!     registry.register("greet", Greet)?;
//!
//!     let config = FlowConfig::new(FlowType::Sequential).with_step(StepConfig::new("greet"));
//!
//!     let engine = FlowEngine::new(config, registry);
//!     let ctx = engine.execute(None).await?;
//!     assert_eq!(ctx.get("greeting"), Some(&json!("hello")));
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod component;
pub mod config;
pub mod context;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod expr;
pub mod hooks;

mod executor;

// Re-export core types for convenience
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use component::{Component, ComponentRegistry, SharedComponent};
pub use config::{
    ConditionErrorPolicy, EdgeConfig, ErrorPolicy, FlowConfig, FlowSettings, FlowType,
    MaxIterationsPolicy, NodeConfig, StepConfig, TimeoutMode,
};
pub use context::{Context, Metadata, RESUME_DATA_KEY};
pub use deadline::DeadlineGuard;
pub use engine::FlowEngine;
pub use error::{FlowError, FlowResult};
pub use hooks::{FlowHook, HookDispatcher};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for the engine
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
