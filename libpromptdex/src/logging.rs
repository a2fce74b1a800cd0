use tracing_subscriber::{fmt, EnvFilter};

/// Initialise global tracing subscriber.
///
/// Reads `RUST_LOG` for filtering, falls back to `info`. Output goes to
/// stderr so stdout stays clean for JSON results. Calling it twice is a
/// no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
