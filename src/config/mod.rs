//! Flow configuration types.
//!
//! The engine consumes an already-parsed configuration: YAML or JSON loading
//! and schema validation live in the host. Every type here derives serde so a
//! host loader can produce it directly from a document.

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

/// Control structure of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    /// Run every step in declared order
    Sequential,
    /// Run the first step whose condition matches
    Conditional,
    /// Run a node-and-edge structure
    Graph,
}

/// How the deadline is enforced around a component invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutMode {
    /// Run inline; the component is expected to call `check_deadline`
    #[default]
    Cooperative,
    /// Run on a background worker task and abort it on expiry
    HardAsync,
    /// Run behind a serialization boundary on a detached worker
    HardProcess,
}

/// Per-step error policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the flow
    #[default]
    Fail,
    /// Mark the step skipped and move on
    Skip,
    /// Record the error and proceed as if the step ran
    Continue,
}

/// Routing for condition-evaluation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionErrorPolicy {
    /// Abort the flow
    Fail,
    /// Mark the step skipped
    Skip,
    /// Mark the step skipped and record a warning
    Warn,
}

/// Policy when the cyclic executor reaches its iteration budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxIterationsPolicy {
    /// Raise `MaxIterations`
    #[default]
    Fail,
    /// Stop silently, flagging `max_iterations_reached`
    Exit,
    /// Log a warning and stop with the same flag
    Warn,
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    10
}

/// Flow-level execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Whether the first component error aborts the flow
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    /// Wall-clock budget for the whole execution; absent means unbounded
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    /// Deadline enforcement strategy per component invocation
    #[serde(default)]
    pub timeout_mode: TimeoutMode,
    /// Strict mode: components must call `check_deadline` at least once per second
    #[serde(default)]
    pub require_deadline_check: bool,
    /// Routing for condition-evaluation failures. Absent falls back to the
    /// executor default: `fail` for sequential and graph flows, `skip` for
    /// conditional (first-match) flows.
    #[serde(default)]
    pub on_condition_error: Option<ConditionErrorPolicy>,
    /// Iteration budget for cyclic graphs
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Policy when the iteration budget is reached
    #[serde(default)]
    pub on_max_iterations: MaxIterationsPolicy,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            fail_fast: true,
            timeout_seconds: None,
            timeout_mode: TimeoutMode::default(),
            require_deadline_check: false,
            on_condition_error: None,
            max_iterations: default_max_iterations(),
            on_max_iterations: MaxIterationsPolicy::default(),
        }
    }
}

/// One step of a sequential or conditional flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Registry name of the component to invoke
    pub component_name: String,
    /// Boolean expression gating this step
    #[serde(default)]
    pub condition: Option<String>,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Error policy for this step. Absent falls back to the flow default:
    /// `fail` under `fail_fast`, `continue` otherwise.
    #[serde(default)]
    pub on_error: Option<ErrorPolicy>,
}

impl StepConfig {
    /// Create a step invoking the named component unconditionally
    pub fn new<S: Into<String>>(component_name: S) -> Self {
        Self {
            component_name: component_name.into(),
            condition: None,
            description: None,
            on_error: None,
        }
    }

    /// Gate the step behind a condition expression
    pub fn with_condition<S: Into<String>>(mut self, condition: S) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Set the error policy
    pub fn with_on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }
}

/// One node of a graph flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node id within the graph
    pub id: String,
    /// Registry name of the component to invoke
    pub component_name: String,
    /// Cap on how many times this node may execute in a cyclic flow
    #[serde(default)]
    pub max_visits: Option<u32>,
    /// Per-node override of the flow-level error policy
    #[serde(default)]
    pub on_error: Option<ErrorPolicy>,
}

impl NodeConfig {
    /// Create a node with id and component name
    pub fn new<I: Into<String>, C: Into<String>>(id: I, component_name: C) -> Self {
        Self {
            id: id.into(),
            component_name: component_name.into(),
            max_visits: None,
            on_error: None,
        }
    }

    /// Cap per-node visits for cyclic flows
    pub fn with_max_visits(mut self, max_visits: u32) -> Self {
        self.max_visits = Some(max_visits);
        self
    }

    /// Override the flow-level error policy for this node
    pub fn with_on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }
}

/// A directed edge of a graph flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Port label gating activation by the source's active port
    #[serde(default)]
    pub port: Option<String>,
}

impl EdgeConfig {
    /// Create an ungated edge
    pub fn new<S: Into<String>, T: Into<String>>(source: S, target: T) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            port: None,
        }
    }

    /// Gate the edge on the source's active port
    pub fn with_port<P: Into<String>>(mut self, port: P) -> Self {
        self.port = Some(port.into());
        self
    }
}

/// A fully parsed flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Flow name; also used as the checkpoint `config_reference`
    #[serde(default)]
    pub name: Option<String>,
    /// Control structure
    #[serde(rename = "type")]
    pub flow_type: FlowType,
    /// Flow-level settings
    #[serde(default)]
    pub settings: FlowSettings,
    /// Steps of a sequential or conditional flow
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    /// Nodes of a graph flow
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    /// Edges of a graph flow
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

impl FlowConfig {
    /// Create an empty configuration of the given type
    pub fn new(flow_type: FlowType) -> Self {
        Self {
            name: None,
            flow_type,
            settings: FlowSettings::default(),
            steps: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Set the flow name
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the settings block
    pub fn with_settings(mut self, settings: FlowSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Append a step (sequential/conditional flows)
    pub fn with_step(mut self, step: StepConfig) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a node (graph flows)
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append an edge (graph flows)
    pub fn with_edge(mut self, edge: EdgeConfig) -> Self {
        self.edges.push(edge);
        self
    }

    /// The identifier stored in checkpoints for this configuration
    pub fn reference(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed-flow")
    }

    /// Effective error policy for a step or node, applying the flow default:
    /// `fail` under `fail_fast`, `continue` otherwise.
    pub fn error_policy(&self, override_policy: Option<ErrorPolicy>) -> ErrorPolicy {
        override_policy.unwrap_or(if self.settings.fail_fast {
            ErrorPolicy::Fail
        } else {
            ErrorPolicy::Continue
        })
    }

    /// Condition-error routing, applying the per-executor default
    pub fn condition_error_policy(&self) -> ConditionErrorPolicy {
        self.settings.on_condition_error.unwrap_or(match self.flow_type {
            FlowType::Conditional => ConditionErrorPolicy::Skip,
            _ => ConditionErrorPolicy::Fail,
        })
    }

    /// Structural issues in this configuration, empty when well-formed
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        match self.flow_type {
            FlowType::Sequential | FlowType::Conditional => {
                if self.steps.is_empty() {
                    issues.push("flow declares no steps".to_string());
                }
                if !self.nodes.is_empty() || !self.edges.is_empty() {
                    issues.push(format!(
                        "{:?} flow must not declare nodes or edges",
                        self.flow_type
                    ));
                }
                for (index, step) in self.steps.iter().enumerate() {
                    if step.component_name.is_empty() {
                        issues.push(format!("step {} has an empty component_name", index));
                    }
                }
            }
            FlowType::Graph => {
                if self.nodes.is_empty() {
                    issues.push("graph flow declares no nodes".to_string());
                }
                if !self.steps.is_empty() {
                    issues.push("graph flow must not declare steps".to_string());
                }

                let mut seen = std::collections::HashSet::new();
                for node in &self.nodes {
                    if node.id.is_empty() {
                        issues.push("graph node has an empty id".to_string());
                    }
                    if !seen.insert(node.id.as_str()) {
                        issues.push(format!("duplicate node id '{}'", node.id));
                    }
                    if node.component_name.is_empty() {
                        issues.push(format!("node '{}' has an empty component_name", node.id));
                    }
                    if node.max_visits == Some(0) {
                        issues.push(format!("node '{}' has max_visits of zero", node.id));
                    }
                }
                for edge in &self.edges {
                    if !seen.contains(edge.source.as_str()) {
                        issues.push(format!("edge references unknown source '{}'", edge.source));
                    }
                    if !seen.contains(edge.target.as_str()) {
                        issues.push(format!("edge references unknown target '{}'", edge.target));
                    }
                }
            }
        }

        if let Some(timeout) = self.settings.timeout_seconds {
            if !timeout.is_finite() || timeout <= 0.0 {
                issues.push(format!("timeout_seconds must be positive, got {}", timeout));
            }
        }
        if self.settings.max_iterations == 0 {
            issues.push("max_iterations must be at least 1".to_string());
        }

        issues
    }

    /// Fail with `Configuration` when the structure is invalid
    pub fn validate(&self) -> FlowResult<()> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(FlowError::configuration(issues.join("; ")))
        }
    }
}
