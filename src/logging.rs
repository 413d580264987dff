//! Structured logging initialization.
//!
//! A single environment variable, `CLAUDECODE_MODEL_LOG_LEVEL`, controls the
//! process-wide `tracing` subscriber. Nothing is attached automatically —
//! callers opt in by invoking [`init_from_env`] once at startup, mirroring
//! how this crate's configuration helpers are plain functions rather than
//! import-time side effects.

use tracing_subscriber::EnvFilter;

/// The environment variable name this crate reads for its log level.
pub const LOG_LEVEL_ENV_VAR: &str = "CLAUDECODE_MODEL_LOG_LEVEL";

/// Parse `CLAUDECODE_MODEL_LOG_LEVEL` (case-insensitive DEBUG/INFO/WARNING/
/// ERROR/CRITICAL) into a `tracing` filter directive. Invalid values fall
/// back to `WARNING`; `CRITICAL` has no direct tracing equivalent and maps
/// to `ERROR`.
fn resolve_level(raw: &str) -> &'static str {
    match raw.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" => "warn",
        "ERROR" => "error",
        "CRITICAL" => "error",
        other => {
            tracing::warn!("unrecognized {LOG_LEVEL_ENV_VAR} value '{other}', falling back to WARNING");
            "warn"
        }
    }
}

/// Initialize a global `tracing` subscriber from `CLAUDECODE_MODEL_LOG_LEVEL`.
///
/// If the variable is unset, no handler is attached and this is a no-op —
/// callers who want their own subscriber are free to install one instead.
/// Safe to call more than once; later calls are ignored.
pub fn init_from_env() {
    let Ok(raw) = std::env::var(LOG_LEVEL_ENV_VAR) else {
        return;
    };

    let level = resolve_level(&raw);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_level_is_case_insensitive() {
        assert_eq!(resolve_level("debug"), "debug");
        assert_eq!(resolve_level("Info"), "info");
        assert_eq!(resolve_level("WARNING"), "warn");
    }

    #[test]
    fn resolve_level_falls_back_to_warning_on_unknown_value() {
        assert_eq!(resolve_level("bogus"), "warn");
    }

    #[test]
    fn resolve_level_maps_critical_to_error() {
        assert_eq!(resolve_level("CRITICAL"), "error");
    }
}
