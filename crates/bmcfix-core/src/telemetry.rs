//! Tracing initialisation for bmcfix binaries.
//!
//! Call [`init_tracing`] once at program start. Safe to call again; only
//! the first call installs the global subscriber.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Initialise the global tracing subscriber.
///
/// * `json` — emit newline-delimited JSON log lines.
/// * `verbosity` — 0 warn, 1 info, 2+ debug; overridden by `RUST_LOG`
///   when set.
pub fn init_tracing(json: bool, verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let format_layer = fmt::layer().with_target(false);
    let format_layer = if json {
        format_layer.json().boxed()
    } else {
        format_layer.boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(format_layer)
        .try_init()
        .ok();
}
