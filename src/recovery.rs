//! Structured-output recovery: a three-stage cascade that rescues a
//! schema-conformant result when the CLI reports it exhausted its internal
//! structured-output retry budget.

use crate::error::Error;
use crate::types::TerminalEvent;
use serde_json::Value;
use tracing::{error, info};

const WRAPPER_KEYS: [&str; 3] = ["parameters", "parameter", "output"];

/// Attempt the single-wrapper-key unwrap used by both stage 1 and the
/// benign non-error unwrap path: if `value` is an object with exactly one
/// key from [`WRAPPER_KEYS`] and that key's value is itself an object,
/// return the inner object and the wrapper key name.
fn unwrap_single_wrapper_key(value: &Value) -> Option<(Value, &'static str)> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    let (key, inner) = obj.iter().next()?;
    let wrapper_key = WRAPPER_KEYS.iter().find(|k| *k == key)?;
    if !inner.is_object() {
        return None;
    }
    Some((inner.clone(), wrapper_key))
}

/// Stage 1: parse the terminal event's result string as JSON and apply the
/// single-wrapper-key unwrap. Any deviation (non-string result, empty
/// result, parse failure, wrong shape) fails this stage.
fn stage_one(event: &TerminalEvent) -> Option<Value> {
    let result = event.result.as_deref()?;
    if result.is_empty() {
        return None;
    }
    let parsed: Value = serde_json::from_str(result).ok()?;
    let (inner, wrapper_key) = unwrap_single_wrapper_key(&parsed)?;
    info!(
        session_id = %event.session_id,
        num_turns = event.num_turns,
        wrapper_key,
        "recovered structured output via stage 1 (result-string envelope unwrap)"
    );
    Some(inner)
}

/// Stage 2: the orchestrator hands us the last captured input of a
/// `StructuredOutput` tool-use block seen mid-stream, if any. Apply the same
/// unwrap; if it doesn't apply, use the candidate verbatim as long as it is
/// an object.
fn stage_two(event: &TerminalEvent, captured_tool_input: Option<&Value>) -> Option<Value> {
    let candidate = captured_tool_input?;
    let recovered = match unwrap_single_wrapper_key(candidate) {
        Some((inner, wrapper_key)) => {
            info!(
                session_id = %event.session_id,
                num_turns = event.num_turns,
                wrapper_key,
                "recovered structured output via stage 2 (captured StructuredOutput tool input)"
            );
            inner
        }
        None => {
            if !candidate.is_object() {
                return None;
            }
            info!(
                session_id = %event.session_id,
                num_turns = event.num_turns,
                "recovered structured output via stage 2 (captured tool input, no wrapper)"
            );
            candidate.clone()
        }
    };
    Some(recovered)
}

/// Run the three-stage cascade. On success, returns the recovered object.
/// On stage-3 failure, returns the diagnostic error the caller should raise.
pub fn recover(event: &TerminalEvent, captured_tool_input: Option<&Value>) -> Result<Value, Error> {
    if let Some(recovered) = stage_one(event) {
        return Ok(recovered);
    }
    if let Some(recovered) = stage_two(event, captured_tool_input) {
        return Ok(recovered);
    }
    error!(
        session_id = %event.session_id,
        num_turns = event.num_turns,
        "structured-output recovery exhausted all three stages"
    );
    Err(Error::structured_output(
        event.session_id.clone(),
        event.num_turns,
        event.duration_ms,
    ))
}

/// The separate, benign unwrap path applied on non-error terminal events:
/// if the success result happens to be wrapped and no structured output is
/// already set, unwrap it silently (well, at INFO).
pub fn unwrap_benign_envelope(event: &TerminalEvent) -> Option<Value> {
    if event.structured_output.is_some() {
        return None;
    }
    let result = event.result.as_deref()?;
    let parsed: Value = serde_json::from_str(result).ok()?;
    let (inner, wrapper_key) = unwrap_single_wrapper_key(&parsed)?;
    info!(
        session_id = %event.session_id,
        wrapper_key,
        "unwrapped envelope on non-error terminal event"
    );
    Some(inner)
}
