//! Log output for the gatehouse binary.
//!
//! Tracing starts at `info` before configuration is read, then switches to
//! `logging.level` once it is known. An explicit `RUST_LOG` pins the filter
//! for the whole run.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Present only when `RUST_LOG` did not pin the filter.
static LEVEL_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

const BOOT_LEVEL: &str = "info";

/// Installs the global subscriber. Calling it again is a no-op.
pub fn init_tracing() {
    let pinned = std::env::var_os("RUST_LOG")
        .is_some()
        .then(EnvFilter::try_from_default_env)
        .and_then(Result::ok);

    let registry = tracing_subscriber::registry();
    let installed = match pinned {
        Some(filter) => registry.with(filter).with(fmt::layer()).try_init(),
        None => {
            let (filter, handle) = reload::Layer::new(EnvFilter::new(BOOT_LEVEL));
            let installed = registry.with(filter).with(fmt::layer()).try_init();
            if installed.is_ok() {
                let _ = LEVEL_HANDLE.set(handle);
            }
            installed
        }
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Switches to the configured `logging.level`.
pub fn apply_logging_level(level: &str) {
    let Some(handle) = LEVEL_HANDLE.get() else {
        return;
    };
    match handle.reload(EnvFilter::new(level)) {
        Ok(()) => tracing::debug!(level, "log level applied"),
        Err(e) => tracing::warn!(level, error = %e, "failed to apply log level"),
    }
}
