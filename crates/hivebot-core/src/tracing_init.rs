//! Logging initialisation for Hivebot binaries.
//!
//! `RUST_LOG` wins when set; otherwise the caller's default filter
//! applies. JSON output is meant for log aggregation pipelines, the
//! plain format for humans at a terminal.

/// Install the global tracing subscriber.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
