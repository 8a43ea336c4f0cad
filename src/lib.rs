//! ShockLog - continuous audio logging, made simple.
//!
//! This is the library crate behind the `shocklog` binary. It provides the
//! logging engine, audio capture, persisted settings and the presentation
//! shell that drives them.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod shell;
pub mod utils;

pub use config::Settings;
pub use recorder::{Logger, LoggerConfig, LoggerEvent, LoggerStatus};
pub use shell::Shell;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging. Output goes to stderr so it does not tear
/// the console status line.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shocklog=info,shocklog_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
