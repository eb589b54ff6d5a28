//! Structured logging setup for worker processes.

use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset: worker state transitions and
/// guardrail degradations, nothing from dependencies below `warn`.
pub const DEFAULT_LOG_FILTER: &str = "warn,prometheus_orchestrator=info";

/// Install a fmt subscriber filtered by `RUST_LOG` (or [`DEFAULT_LOG_FILTER`]).
///
/// Returns `false` when a global subscriber was already installed, in which
/// case the existing one is left alone.
pub fn init_tracing() -> bool {
    if tracing::dispatcher::has_been_set() {
        return false;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn second_init_is_a_no_op() {
        init_tracing();
        assert!(!init_tracing());
    }
}
