use std::env;
use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

impl LogFormat {
    /// `MANAGED_STORE_LOG_FORMAT=json` selects JSON, anything else is text
    pub fn from_env() -> Self {
        match env::var("MANAGED_STORE_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,managed_store=trace
pub fn init() {
    init_with(LogFormat::from_env());
}

/// Like [`init`] with an explicit output format. Only the first call in a
/// process has any effect.
pub fn init_with(format: LogFormat) {
    INIT.call_once(|| {
        // Default to 'info' level if RUST_LOG is not set
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Text => tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true) // reconnects and drains run on other tasks
                        .with_line_number(true),
                )
                .init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(false))
                .init(),
        }

        tracing::info!(?format, "Logging initialized");
    });
}

/// Macro for logging store operations with timing
#[macro_export]
macro_rules! store_op {
    ($operation:expr, $path:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = %$operation,
            path = $path,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Store operation"
        )
    };
}

/// Macro for logging connection state transitions
#[macro_export]
macro_rules! state_change {
    ($from:expr, $to:expr) => {
        tracing::info!(from = %$from, to = %$to, "Connection state changed")
    };
}
