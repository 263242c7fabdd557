//! Structured logging with `tracing`.
//!
//! Log context (identity, connection ID, envelope ID) travels as structured
//! fields and spans rather than being formatted into messages.

pub mod test_utils;

pub use test_utils::{CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Line format of the global subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// `Json` when `json` is set.
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Compact }
    }
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `level` when set. Only the first call installs
/// anything; later calls are ignored.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Compact => builder.with_target(true).compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
