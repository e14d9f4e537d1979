//! Tracing setup for binaries and tests embedding the coordinator

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the filter directive
pub const LOG_ENV: &str = "JITSCOPE_LOG";

/// Install a fmt subscriber filtered by `JITSCOPE_LOG` (default `info`)
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        assert!(!init_tracing());
    }
}
