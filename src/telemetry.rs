//! Tracing subscriber setup for binaries and demos.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the process embedding it.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "lightmill_core=info";

/// Install a global fmt subscriber honouring `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        let _ = init();
        // Second install must not panic
        assert!(!init());
    }
}
