use crate::error::{Result, SettlementError};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `log_level`.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(log_level: &str) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level).map_err(|e| {
            SettlementError::Validation(format!("invalid log level '{log_level}': {e}"))
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| SettlementError::Internal(format!("telemetry already initialized: {e}")))
}
