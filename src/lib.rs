//! Election lifecycle and ballot tabulation engine
//!
//! Runs elections through their STOPPED / RUNNING / PAUSED lifecycle, accepts
//! exactly one complete ballot per voter while the voting window is open and
//! tallies committed ballots into ranked per-position results.
//!
//! Start with [`ElectionService`], which wires the components of
//! [`engine`] together over a set of [`Journals`].

pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod service;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EngineConfig, LoggingConfig};
pub use errors::{Error, Result};
pub use service::{BallotView, ElectionService, Journals, ServiceStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging from `RUST_LOG`, defaulting to `ballotbox=info`
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ballotbox=info".into()),
        )
        .try_init()
        .map_err(|e| Error::internal(format!("logging already initialized: {e}")))?;

    tracing::info!("🗳️  Ballotbox v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging with an explicit level and format
///
/// `format` is one of `json`, `pretty` or `compact`; anything else falls back
/// to the default human-readable output.
pub fn init_with(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(format!("ballotbox={}", logging.level))
        .map_err(|e| Error::validation(format!("Invalid LOG_LEVEL: {e}")))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| Error::internal(format!("logging already initialized: {e}")))?;

    tracing::info!(
        "🗳️  Ballotbox v{} initialized (level={}, format={})",
        VERSION,
        logging.level,
        logging.format
    );
    Ok(())
}
