//! Dotted-path access over JSON values.
//!
//! Missing segments resolve to `Null`, never an error. This is what lets
//! condition expressions probe optional fields (`context.data.user.age`)
//! without blowing up mid-flow.

use serde_json::Value;

static NULL: Value = Value::Null;

/// Resolve a dotted path against a JSON value.
///
/// Each segment is a mapping lookup; any non-mapping intermediate or missing
/// key yields `Null`.
pub fn lookup<'a>(root: &'a Value, path: &str) -> &'a Value {
    let mut current = root;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(segment).unwrap_or(&NULL);
            }
            _ => return &NULL,
        }
    }
    current
}
