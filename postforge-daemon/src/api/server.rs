//! Health server lifecycle.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::handlers::{ApiState, router};

/// Handle to a running health server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    join_handle: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.join_handle
            .await
            .context("Health server task panicked")?
            .context("Health server failed")?;
        info!("Health server stopped");
        Ok(())
    }
}

/// Start the health server on `addr`.
///
/// The server shuts down gracefully when `shutdown` is cancelled or
/// [`ServerHandle::stop`] is called.
pub async fn start_server(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<ServerHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health server to {}", addr))?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read health server address")?;

    info!("Health server listening on {}", local_addr);

    let signal = shutdown.clone();
    let join_handle = tokio::spawn(async move {
        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                signal.cancelled().await;
                debug!("Health server shutdown signal received");
            })
            .await
    });

    Ok(ServerHandle {
        local_addr,
        shutdown,
        join_handle,
    })
}
