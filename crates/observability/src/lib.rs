//! Process-wide tracing setup shared by the orchestrator binary.

/// Initialize process-wide tracing with `default_filter` as the fallback level.
///
/// `RUST_LOG` wins when set. Safe to call multiple times; subsequent calls
/// become no-ops.
pub fn init(default_filter: &str) {
    tracing::init(default_filter);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
