//! Diagnostic log setup.
//!
//! The runner emits one `tracing` event per match attempt. Test binaries and
//! harnesses call [`init`] once to see them; `RUST_LOG` overrides the default
//! directive.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "eventcheck=info";

/// Install a formatting subscriber. Safe to call repeatedly; only the first
/// call in a process has an effect.
pub fn init() {
    init_with(DEFAULT_DIRECTIVE);
}

/// Like [`init`] with an explicit fallback directive.
pub fn init_with(directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directive.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer().without_time())
        .try_init();
}
