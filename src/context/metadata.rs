//! Per-execution telemetry carried by the context.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Timing record for one executed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTiming {
    /// Index of the step in its flow structure
    pub step_index: usize,
    /// Component name invoked
    pub component: String,
    /// When the invocation started
    pub started_at: DateTime<Utc>,
    /// Invocation duration in milliseconds
    pub duration_ms: u64,
    /// Position in the overall execution order
    pub execution_order: u32,
}

/// A recorded component failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Component that failed
    pub component: String,
    /// Rendered error message
    pub message: String,
    /// Error category (see `FlowError::category`)
    pub error_type: String,
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

/// A recorded condition-evaluation failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionErrorRecord {
    /// Component whose step condition failed to evaluate
    pub component: String,
    /// The expression text
    pub condition: String,
    /// Why evaluation failed
    pub message: String,
}

/// Execution telemetry: timings, skips, errors, graph bookkeeping, and
/// suspension state.
///
/// `completed_nodes` holds nodes that terminated normally and is the source
/// of truth for resume in acyclic execution. Cycle participants never enter
/// it; their progress lives in `node_visit_counts` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique id for this execution, generated at start
    pub flow_id: Uuid,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time, set when an executor returns a terminal result
    pub completed_at: Option<DateTime<Utc>>,
    /// Ordered timing records, one per executed step
    pub step_timings: Vec<StepTiming>,
    /// Names whose condition was false or whose error policy caused a skip
    pub skipped_components: Vec<String>,
    /// Recorded component failures
    pub errors: Vec<ErrorRecord>,
    /// Recorded condition-evaluation failures
    pub condition_errors: Vec<ConditionErrorRecord>,
    /// Graph node ids that terminated normally
    pub completed_nodes: BTreeSet<String>,
    /// Per-node execution counts; source of truth for cyclic flows
    pub node_visit_counts: BTreeMap<String, u32>,
    /// Total back-edge iterations across cycles
    pub iteration_count: u32,
    /// Whether the iteration budget was reached
    pub max_iterations_reached: bool,
    /// Whether the flow is suspended awaiting a resume
    pub suspended: bool,
    /// Node id at which the flow suspended
    pub suspended_at_node: Option<String>,
    /// Reason supplied to `Context::suspend`
    pub suspension_reason: Option<String>,
    /// Id of the checkpoint written at suspension
    pub checkpoint_id: Option<String>,
}

impl Metadata {
    /// Create fresh telemetry for a new execution
    pub fn new() -> Self {
        Self {
            flow_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            step_timings: Vec::new(),
            skipped_components: Vec::new(),
            errors: Vec::new(),
            condition_errors: Vec::new(),
            completed_nodes: BTreeSet::new(),
            node_visit_counts: BTreeMap::new(),
            iteration_count: 0,
            max_iterations_reached: false,
            suspended: false,
            suspended_at_node: None,
            suspension_reason: None,
            checkpoint_id: None,
        }
    }

    /// Append a timing record for an executed step
    pub fn record_timing(
        &mut self,
        step_index: usize,
        component: &str,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) {
        let execution_order = self.step_timings.len() as u32;
        self.step_timings.push(StepTiming {
            step_index,
            component: component.to_string(),
            started_at,
            duration_ms,
            execution_order,
        });
    }

    /// Record a skipped step or node
    pub fn record_skip(&mut self, component: &str) {
        self.skipped_components.push(component.to_string());
    }

    /// Record a component failure
    pub fn record_error(&mut self, component: &str, message: &str, error_type: &str) {
        self.errors.push(ErrorRecord {
            component: component.to_string(),
            message: message.to_string(),
            error_type: error_type.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Record a condition-evaluation failure
    pub fn record_condition_error(&mut self, component: &str, condition: &str, message: &str) {
        self.condition_errors.push(ConditionErrorRecord {
            component: component.to_string(),
            condition: condition.to_string(),
            message: message.to_string(),
        });
    }

    /// Bump the visit counter for a graph node
    pub fn record_visit(&mut self, node_id: &str) -> u32 {
        let count = self.node_visit_counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Visits recorded for a node so far
    pub fn visit_count(&self, node_id: &str) -> u32 {
        self.node_visit_counts.get(node_id).copied().unwrap_or(0)
    }

    /// Whether any component failure has been recorded
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Stamp `completed_at`
    pub fn finalize(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Mark the execution suspended at a node
    pub fn mark_suspended(&mut self, node_id: &str, reason: &str) {
        self.suspended = true;
        self.suspended_at_node = Some(node_id.to_string());
        self.suspension_reason = Some(reason.to_string());
    }

    /// Clear the suspension markers ahead of a resumed run
    pub fn clear_suspension(&mut self) {
        self.suspended = false;
        self.suspended_at_node = None;
        self.suspension_reason = None;
        self.checkpoint_id = None;
    }

    /// The JSON object visible to condition expressions as `context.metadata`
    pub fn condition_view(&self) -> Value {
        json!({
            "flow_id": self.flow_id.to_string(),
            "has_errors": self.has_errors(),
            "error_count": self.errors.len(),
            "skipped_components": self.skipped_components,
            "completed_nodes": self.completed_nodes,
            "iteration_count": self.iteration_count,
            "max_iterations_reached": self.max_iterations_reached,
            "suspended": self.suspended,
        })
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_order_is_monotonic() {
        let mut metadata = Metadata::new();
        metadata.record_timing(0, "a", Utc::now(), 5);
        metadata.record_timing(1, "b", Utc::now(), 7);
        metadata.record_timing(0, "a", Utc::now(), 3);

        let orders: Vec<u32> = metadata.step_timings.iter().map(|t| t.execution_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_visit_counts() {
        let mut metadata = Metadata::new();
        assert_eq!(metadata.visit_count("plan"), 0);
        assert_eq!(metadata.record_visit("plan"), 1);
        assert_eq!(metadata.record_visit("plan"), 2);
        assert_eq!(metadata.visit_count("plan"), 2);
    }

    #[test]
    fn test_suspension_round_trip() {
        let mut metadata = Metadata::new();
        metadata.mark_suspended("approval", "awaiting sign-off");
        assert!(metadata.suspended);
        assert_eq!(metadata.suspended_at_node.as_deref(), Some("approval"));

        metadata.clear_suspension();
        assert!(!metadata.suspended);
        assert!(metadata.suspension_reason.is_none());
    }

    #[test]
    fn test_condition_view_reports_errors() {
        let mut metadata = Metadata::new();
        assert_eq!(metadata.condition_view()["has_errors"], json!(false));

        metadata.record_error("fetch", "boom", "component");
        let view = metadata.condition_view();
        assert_eq!(view["has_errors"], json!(true));
        assert_eq!(view["error_count"], json!(1));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut metadata = Metadata::new();
        metadata.record_timing(0, "a", Utc::now(), 12);
        metadata.record_skip("b");
        metadata.completed_nodes.insert("a".to_string());
        metadata.record_visit("loop");
        metadata.finalize();

        let serialized = serde_json::to_value(&metadata).unwrap();
        let restored: Metadata = serde_json::from_value(serialized).unwrap();
        assert_eq!(restored.flow_id, metadata.flow_id);
        assert_eq!(restored.step_timings.len(), 1);
        assert_eq!(restored.skipped_components, vec!["b".to_string()]);
        assert!(restored.completed_nodes.contains("a"));
        assert_eq!(restored.visit_count("loop"), 1);
        assert!(restored.completed_at.is_some());
    }
}
