//! This module provides primitives to work with `tracing` and
//! `tracing-subscriber` in Lambda functions.
//!
//! The `tracing` and `tracing-subscriber` crates are re-exported so you
//! don't have to include them as direct dependencies in your projects.

use std::{env, str::FromStr};

use subscriber::filter::{EnvFilter, LevelFilter};

/// Re-export the `tracing` crate to have access to tracing macros like
/// `info!`, `debug!`, `trace!` and so on.
pub use tracing::*;

/// Re-export the `tracing-subscriber` crate to build your own subscribers.
pub use tracing_subscriber as subscriber;

/// Initialize `tracing-subscriber` with default options.
///
/// The log level is taken from `AWS_LAMBDA_LOG_LEVEL`, falling back to
/// `LOG_LEVEL`, defaulting to `INFO`. When `AWS_LAMBDA_LOG_FORMAT` is set to
/// `json`, events are emitted as JSON objects. Timestamps and targets are
/// omitted; CloudWatch stamps every line on its own.
pub fn init_default_subscriber() {
    let log_format = env::var("AWS_LAMBDA_LOG_FORMAT").unwrap_or_default();
    let log_level = env::var("AWS_LAMBDA_LOG_LEVEL")
        .or_else(|_| env::var("LOG_LEVEL"))
        .unwrap_or_default();
    let log_level = Level::from_str(&log_level).unwrap_or(Level::INFO);

    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .without_time()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(log_level).into())
                .from_env_lossy(),
        );

    if log_format.eq_ignore_ascii_case("json") {
        collector.json().init()
    } else {
        collector.init()
    }
}
