use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "AUTHCHECK_LOG";

static INIT: Once = Once::new();

/// Install the global subscriber. Filter comes from `AUTHCHECK_LOG`
/// (e.g. `authcheck=debug`), falling back to `authcheck=info`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing(verbose: bool) {
    INIT.call_once(|| {
        let fallback = if verbose { "authcheck=debug" } else { "authcheck=info" };
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));

        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    });
}
