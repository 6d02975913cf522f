//! # Tracing helpers
//!
//! Logs go to stdout, filtered with `RUST_LOG` (defaults to `info`).
//! Set `RUST_LOG_FORMAT=json` to emit one json object per line.

use error_stack::{Result, ResultExt};
use tracing::Subscriber;
use tracing_subscriber::{prelude::*, registry::LookupSpan, EnvFilter, Layer};

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug)]
pub struct TracingInitError;
impl error_stack::Context for TracingInitError {}

impl std::fmt::Display for TracingInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to initialize tracing")
    }
}

/// Initialize the global tracing subscriber.
///
/// Should be called once during application startup.
///
/// ```rs
/// use strata_observability::init_tracing;
///
/// init_tracing().unwrap();
/// ```
pub fn init_tracing() -> Result<(), TracingInitError> {
    tracing_subscriber::registry()
        .with(vec![stdout()])
        .try_init()
        .change_context(TracingInitError)
        .attach_printable("a global subscriber is already installed")?;

    Ok(())
}

fn stdout<S>() -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let log_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO"));

    let json_fmt = std::env::var("RUST_LOG_FORMAT")
        .map(|val| val == "json")
        .unwrap_or(false);

    if json_fmt {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(log_env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .compact()
            .with_filter(log_env_filter)
            .boxed()
    }
}
