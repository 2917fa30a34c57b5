//! tracing-subscriber initialisation for binaries.

use tracing_subscriber::EnvFilter;

use crate::TelemetryError;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `debug` with `verbose`, else `info`.
/// `json` switches to one JSON object per event.
pub fn init_tracing(verbose: bool, json: bool) -> Result<(), TelemetryError> {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| TelemetryError::Subscriber(e.to_string()))
}
