//! Logging and debug-trace configuration.
//!
//! Verbose tracing is opt-in through the `HSM_DEBUG` environment variable,
//! which is read once per process and cached. `RUST_LOG` takes precedence
//! when set.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static DEBUG_FLAG: OnceLock<bool> = OnceLock::new();

/// True when `HSM_DEBUG` is set to `1` or `true`.
pub fn debug_enabled() -> bool {
    *DEBUG_FLAG.get_or_init(|| {
        std::env::var("HSM_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}

/// Initialize stderr logging.
///
/// With `HSM_DEBUG` enabled the default filter includes debug records for
/// this crate, which carry the raw backend codes next to the mapped error
/// kinds. Safe to call more than once; later calls are no-ops.
pub fn init() {
    let default_filter = if debug_enabled() {
        "info,pinseal_hsm=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init();
}
