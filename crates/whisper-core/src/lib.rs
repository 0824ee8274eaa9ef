pub mod config;
pub mod error;

pub use config::{ApiConfig, Config, LoggingConfig, StorageConfig, ValidationResult};
pub use error::{ClientError, FieldErrors, ReqwestErrorExt};

use anyhow::Result;

/// Result alias used across component boundaries.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Initialize tracing/logging.
///
/// `RUST_LOG` wins over `default_filter` when set.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::info!("Weather Whisper core initialized");
    Ok(())
}
