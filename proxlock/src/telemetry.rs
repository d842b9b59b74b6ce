//! Tracing initialization for the client.
//!
//! Logs go to stderr so command output on stdout stays clean. The filter is read from `RUST_LOG`
//! and falls back to `warn`, which keeps the terminal quiet unless something goes wrong:
//!
//! ```bash
//! RUST_LOG=proxlock=debug proxlock projects list
//! ```

use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "warn";

/// Initialize tracing with a fmt layer writing to stderr.
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;

    debug!("Telemetry initialized");
    Ok(())
}
