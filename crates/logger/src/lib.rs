use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{
    Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

/// Output layout selected through `RUST_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl Format {
    fn from_env() -> Self {
        let raw = var("RUST_LOG_FORMAT")
            .inspect_err(|error| {
                warn!("Failed to read RUST_LOG_FORMAT, falling back to compact: {error}")
            })
            .unwrap_or_default();

        match raw.to_ascii_lowercase().as_str() {
            "json" => Format::Json,
            "pretty" => Format::Pretty,
            _ => Format::Compact,
        }
    }
}

/// Install the global subscriber. `verbose` lowers the default level to DEBUG;
/// `RUST_LOG` still wins when set.
pub fn init(verbose: bool) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    if let Err(error) = try_init(level, Format::from_env()) {
        eprintln!("tracing subscriber already installed: {error}");
    }
}

/// Install the global subscriber, reporting instead of panicking when one is
/// already set (tests call this repeatedly).
pub fn try_init(level: LevelFilter, format: Format) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_layer = match format {
        Format::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(env_filter)
            .boxed(),
        Format::Pretty => tracing_subscriber::fmt::layer().pretty().with_filter(env_filter).boxed(),
        Format::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(log_layer).try_init()
}
