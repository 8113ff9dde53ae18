//! The execution context passed through a flow.

pub mod metadata;
pub mod path;

pub use metadata::{ConditionErrorRecord, ErrorRecord, Metadata, StepTiming};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::deadline::DeadlineGuard;
use crate::error::{FlowError, FlowResult};

/// Key under which `resume` attaches its payload to `data`
pub const RESUME_DATA_KEY: &str = "resume_data";

/// In-memory state passed through a flow: a key/value data bag, the initial
/// input payload, execution telemetry, and the transient active output port.
///
/// The context is owned by exactly one executor at a time; no locking is
/// needed within a single execution.
#[derive(Debug, Clone)]
pub struct Context {
    /// Mutable key/value state shared across steps
    pub data: Map<String, Value>,
    /// Initial payload, immutable by convention
    pub input: Value,
    /// Execution telemetry
    pub metadata: Metadata,
    /// Transient output port set by the current node's component
    active_port: Option<String>,
    /// Deadline handle, installed by the engine; not serialized
    deadline: Option<DeadlineGuard>,
}

impl Context {
    /// Create an empty context with fresh metadata
    pub fn new() -> Self {
        Self {
            data: Map::new(),
            input: Value::Null,
            metadata: Metadata::new(),
            active_port: None,
            deadline: None,
        }
    }

    /// Create a context seeded with an initial input payload
    pub fn with_input(input: Value) -> Self {
        Self {
            input,
            ..Self::new()
        }
    }

    /// Get a value from the data bag
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Resolve a dotted path against the data bag; missing segments yield
    /// `Null`, never an error.
    pub fn get_path(&self, dotted: &str) -> &Value {
        static NULL: Value = Value::Null;
        let mut segments = dotted.splitn(2, '.');
        let head = segments.next().unwrap_or_default();
        let root = match self.data.get(head) {
            Some(value) => value,
            None => return &NULL,
        };
        match segments.next() {
            Some(rest) => path::lookup(root, rest),
            None => root,
        }
    }

    /// Set a value in the data bag
    pub fn set<K: Into<String>>(&mut self, key: K, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Set any serializable value in the data bag
    pub fn set_serialized<K, V>(&mut self, key: K, value: V) -> FlowResult<()>
    where
        K: Into<String>,
        V: Serialize,
    {
        let json_value = serde_json::to_value(value)?;
        self.data.insert(key.into(), json_value);
        Ok(())
    }

    /// Get a typed value from the data bag
    pub fn get_as<T>(&self, key: &str) -> Option<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The payload attached by `resume`, when this execution is a resume
    pub fn resume_data(&self) -> Option<&Value> {
        self.data.get(RESUME_DATA_KEY)
    }

    /// Declare which outgoing graph edges should fire for the current node
    pub fn set_output_port<P: Into<String>>(&mut self, port: P) {
        self.active_port = Some(port.into());
    }

    /// The port declared by the current node's component, if any
    pub fn active_port(&self) -> Option<&str> {
        self.active_port.as_deref()
    }

    /// Clear the active port ahead of the next node
    pub fn clear_active_port(&mut self) {
        self.active_port = None;
    }

    /// Install the execution deadline handle
    pub fn set_deadline(&mut self, guard: Option<DeadlineGuard>) {
        self.deadline = guard;
    }

    /// The execution deadline handle, when one is installed
    pub fn deadline(&self) -> Option<&DeadlineGuard> {
        self.deadline.as_ref()
    }

    /// Cooperative deadline check for components; a no-op when the flow has
    /// no deadline installed.
    pub fn check_deadline(&self) -> FlowResult<()> {
        match &self.deadline {
            Some(guard) => guard.check_current(),
            None => Ok(()),
        }
    }

    /// Signal suspension from inside `process`. The executor finishes
    /// teardown, then the engine writes a checkpoint instead of continuing.
    pub fn suspend<N: Into<String>, R: Into<String>>(&mut self, node_id: N, reason: R) {
        let node_id = node_id.into();
        let reason = reason.into();
        self.metadata.mark_suspended(&node_id, &reason);
    }

    /// Whether a component has signalled suspension
    pub fn is_suspended(&self) -> bool {
        self.metadata.suspended
    }

    /// Serialize `data`, `input`, and `metadata` into the snapshot form used
    /// by checkpoints. The active port is deliberately excluded: it has no
    /// meaning outside the current node boundary.
    pub fn to_snapshot(&self) -> FlowResult<Value> {
        Ok(json!({
            "data": Value::Object(self.data.clone()),
            "input": self.input,
            "metadata": serde_json::to_value(&self.metadata)?,
        }))
    }

    /// Rebuild a context from its snapshot form
    pub fn from_snapshot(snapshot: &Value) -> FlowResult<Self> {
        let object = snapshot
            .as_object()
            .ok_or_else(|| FlowError::checkpoint("context snapshot is not an object"))?;
        let data = match object.get("data") {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(FlowError::checkpoint(format!(
                    "context snapshot 'data' is not a mapping: {other}"
                )))
            }
            None => Map::new(),
        };
        let input = object.get("input").cloned().unwrap_or(Value::Null);
        let metadata = match object.get("metadata") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Metadata::new(),
        };
        Ok(Self {
            data,
            input,
            metadata,
            active_port: None,
            deadline: None,
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
