#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Arbor Log
//!
//! Logging setup for the Arbor plan engine, built on `tracing-subscriber`.
//!
//! ```rust,ignore
//! let _guard = arbor_log::LoggerBuilder::from_config(arbor_log::Config::from_env()).build()?;
//! tracing::info!(run_id = %id, "run started");
//! ```
//!
//! Tests call [`init_test`], which is safe to call from every test.

mod builder;
mod config;
mod error;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format, Writer};
pub use error::{LogError, LogResult};

/// Initialize logging from the environment.
///
/// Reads `ARBOR_LOG`, then `RUST_LOG`, then `ARBOR_LOG_FORMAT`.
pub fn init() -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(Config::from_env()).build()
}

/// Initialize test logging once per process.
///
/// Output goes through the test writer so it is captured per test. Later
/// calls, and calls after another subscriber was installed, do nothing.
pub fn init_test() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if let Err(err) = LoggerBuilder::from_config(Config::test()).build() {
            eprintln!("test logging not installed: {err}");
        }
    });
}
