// consentry/src/logging.rs

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins; otherwise `info`, or
/// `debug` for this crate when `verbose` is set. Logs go to stderr so they
/// never interleave with prompts on stdout.
pub fn init(verbose: bool) {
    let fallback = if verbose { "info,consentry=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(verbose).try_init();
}
