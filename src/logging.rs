//! Logging setup for embedding hosts
//!
//! FleetMender emits structured events through `tracing` everywhere;
//! this helper wires a sensible subscriber for hosts that do not bring
//! their own. Library code never installs a subscriber implicitly.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a formatted subscriber honoring `RUST_LOG`, falling back to
/// `directives` when the variable is unset. Safe to call once per
/// process; later calls are ignored.
pub fn init(directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
