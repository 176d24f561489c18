use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use taskwire_core::config::TelemetryConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` picks debug over info.
/// Fails if a subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose)));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()?;
    }
    Ok(())
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}
