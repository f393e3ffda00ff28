//! Tracing/logging initialization.
//!
//! JSON lines on stdout, filtered by `RUST_LOG` or the configured level.

use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` first, then `default_filter`, then `info`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init("debug");
        init("warn");
    }

    #[test]
    fn garbage_level_falls_back_instead_of_panicking() {
        let _ = env_filter("not a [valid filter");
    }
}
