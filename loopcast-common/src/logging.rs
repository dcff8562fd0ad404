//! Tracing subscriber initialization

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the log filter: `RUST_LOG` wins, otherwise `default_level` applied
/// to the loopcast crates only
pub fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "loopcast={level},loopcast_common={level}",
            level = default_level
        ))
    })
}

/// Install the global tracing subscriber
///
/// Logs go to stderr so that stdout stays free for the run report.
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_tracing(default_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(default_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
