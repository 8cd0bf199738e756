// Path: crates/telemetry/src/init.rs
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Output format of the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event, for log collectors.
    #[default]
    Json,
    /// Human readable lines, for interactive use.
    Pretty,
}

/// Initializes the global `tracing` subscriber.
///
/// The filter is read from `RUST_LOG` and defaults to `info`. Events emitted
/// through the `log` facade are bridged into `tracing`.
pub fn init_tracing(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_log::LogTracer::init()?;
    match format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339());
            let subscriber = Registry::default().with(filter).with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_timer(fmt::time::UtcTime::rfc_3339());
            let subscriber = Registry::default().with(filter).with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
