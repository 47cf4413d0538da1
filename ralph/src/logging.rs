//! Diagnostic tracing for ralph itself.
//!
//! Tracing is for debugging the orchestrator: stderr only, never persisted.
//! The operator-facing record of a session lives in the audit and task logs
//! written by [`crate::io::audit_log`], which do not depend on `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the filter is `warn`, or `ralph=debug`
/// with `--verbose`.
///
/// ```bash
/// RUST_LOG=ralph::recovery=debug ralph implement shop 1-3
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,ralph=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .compact(),
        )
        .init();
}
