//! Structured logging initialization.
//!
//! JSON output when `LOG_FORMAT=json` (the deployment default), compact
//! human-readable output otherwise. Level filtering follows `RUST_LOG`.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init_structured_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
