//! Global setup utilities for CLI initialization

use std::io::Write;

use anyhow::Result;

/// Initialize tracing subscriber for logging
///
/// Configures the tracing subscriber with:
/// - Environment filter (defaults to INFO level)
/// - Stderr output (to avoid mixing with stdout)
///
/// # Errors
/// Returns an error if the subscriber initialization fails
pub fn init_tracing() -> Result<()> {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))
}

/// Output an error message, respecting JSON mode
pub fn output_error(json_mode: bool, error_code: &str, message: &str) {
    if json_mode {
        super::output::print_json(&super::output::error_envelope(error_code, message));
    } else {
        let _ = writeln!(std::io::stderr(), "Error: {message}");
    }
}
