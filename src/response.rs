//! Response assembler: converts a terminal CLI event into the framework's
//! response shape, applying the benign envelope unwrap and the
//! non-empty-result invariant along the way.

use crate::error::Error;
use crate::recovery;
use crate::types::{Response, ResponsePart, TerminalEvent, Usage};

/// Assemble a [`Response`] from a terminal event.
///
/// If structured output is present (either genuinely returned by the CLI or
/// recovered by [`crate::recovery`]), it is serialized to a JSON string as
/// the single text part. Otherwise the event's result string is used,
/// applying the benign wrapper unwrap first.
///
/// For any non-`error_*` subtype, the assembler requires a non-empty result
/// or a structured output — an empty success is an upstream contract
/// violation, not a legitimate empty response.
pub fn assemble(event: &TerminalEvent, model_name: &str) -> crate::Result<Response> {
    if !event.is_error_subtype() {
        let has_result = event.result.as_deref().is_some_and(|r| !r.is_empty());
        let has_structured_output = event.structured_output.is_some();
        if !has_result && !has_structured_output {
            return Err(Error::response_parse(
                format!(
                    "terminal event subtype '{}' reported success but carried neither result nor structured output ({}ms)",
                    event.subtype, event.duration_ms
                ),
                "",
            ));
        }
    }

    let text = if let Some(structured_output) = &event.structured_output {
        serde_json::to_string(structured_output)
            .map_err(|e| Error::response_parse(e.to_string(), structured_output.to_string()))?
    } else if let Some(unwrapped) = recovery::unwrap_benign_envelope(event) {
        serde_json::to_string(&unwrapped)
            .map_err(|e| Error::response_parse(e.to_string(), unwrapped.to_string()))?
    } else {
        event.result.clone().unwrap_or_default()
    };

    Ok(Response {
        parts: vec![ResponsePart { text }],
        usage: map_usage(&event.usage),
        model_name: model_name.to_string(),
    })
}

/// Passthrough: the terminal event's usage block already carries the
/// headline counters plus the additive detail fields (§3.1); nothing to
/// remap here beyond cloning.
fn map_usage(usage: &Usage) -> Usage {
    usage.clone()
}
