//! Parameter-level permission gate.
//!
//! Before each built-in-tool invocation the CLI consults a callback with the
//! proposed tool name and arguments. This is a parameter-shape filter, not a
//! sandbox: it denies specific argument shapes (e.g. "no background shell
//! execution") while letting everything else through.

use crate::types::RestrictionTable;
use serde_json::Value;

/// The gate's verdict on one proposed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Check a proposed `(tool_name, arguments)` pair against the restriction
/// table. An entry denies any invocation where a listed argument is present
/// with a value other than the one required; an absent table entry, or an
/// argument matching its required value, allows.
pub fn check(restrictions: &RestrictionTable, tool_name: &str, arguments: &Value) -> Decision {
    let Some(row) = restrictions.get(tool_name) else {
        return Decision::Allow;
    };

    for (arg_name, required_value) in row {
        if let Some(proposed_value) = arguments.get(arg_name) {
            if proposed_value != required_value {
                return Decision::Deny {
                    reason: format!(
                        "tool '{tool_name}' denied: argument '{arg_name}' must be {required_value}, got {proposed_value}"
                    ),
                };
            }
        }
    }

    Decision::Allow
}

/// Build a permission-gate callback closure suitable for installing into CLI
/// options. Captures the restriction table by value.
pub fn build_gate(
    restrictions: RestrictionTable,
) -> impl Fn(&str, &Value) -> Decision + Send + Sync + 'static {
    move |tool_name, arguments| check(&restrictions, tool_name, arguments)
}
