//! Socket drain tracking for graceful shutdown
//!
//! Upgraded WebSockets are detached from axum's graceful shutdown, so every
//! socket task holds a [`SocketGuard`] and `main` waits on the matching
//! [`SocketDrain`] before letting the runtime go.

use std::time::Duration;

use tokio::sync::mpsc;

/// Held by every live socket task
#[derive(Clone, Debug)]
pub struct SocketGuard(mpsc::Sender<()>);

/// Resolves once every [`SocketGuard`] has been dropped
#[derive(Debug)]
pub struct SocketDrain(mpsc::Receiver<()>);

pub fn socket_tracker() -> (SocketGuard, SocketDrain) {
    let (tx, rx) = mpsc::channel(1);
    (SocketGuard(tx), SocketDrain(rx))
}

impl SocketDrain {
    /// Returns false if sockets were still open when `limit` ran out
    pub async fn wait(mut self, limit: Duration) -> bool {
        // Nothing is ever sent; recv yields None when the last guard drops
        tokio::time::timeout(limit, self.0.recv()).await.is_ok()
    }
}
