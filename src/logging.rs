use std::env;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    fn from_env() -> Self {
        match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Installs the global tracing subscriber. `RUST_LOG` controls filtering and
/// falls back to `info`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match LogFormat::from_env() {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}
