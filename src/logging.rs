use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILTER_ENV: &str = "RAPORTD_LOG";
pub const LOG_JSON_ENV: &str = "RAPORTD_LOG_JSON";
const DEFAULT_FILTER: &str = "raportd=info";

/// Installs the global subscriber. Logs go to stderr: stdout carries the
/// IPC responses and must stay clean.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let log_json = std::env::var(LOG_JSON_ENV)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }
    Ok(())
}
