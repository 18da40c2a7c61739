//! Time utilities

use std::time::Instant;

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> f64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs_f64())
        .unwrap_or(0.0)
}
