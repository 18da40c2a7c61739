//! Application wiring

pub mod shutdown;
pub mod state;

pub use shutdown::{socket_tracker, SocketGuard};
pub use state::AppState;
