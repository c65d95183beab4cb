//! Bridge Common Library
//!
//! Shared plumbing for protocol bridges:
//!
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`args`] - Common CLI arguments
//! - [`shutdown`] - Signal-driven shutdown channel
//! - [`error`] - Error types

pub mod args;
pub mod config;
pub mod error;
pub mod shutdown;

pub use args::BridgeArgs;
pub use config::{LogFormat, LoggingConfig, load_config};
pub use error::{Error, Result};
pub use shutdown::{shutdown_channel, wait_for_signal};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two
/// output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Logging(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Logging(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
