//! Signal-triggered cooperative shutdown
//!
//! SIGINT (Ctrl+C) and SIGTERM cancel a shared token. The scheduler checks
//! the token between iterations only, so a write that is already in flight
//! always completes before the process stops.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on the first termination signal.
pub fn spawn_shutdown_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_signal() => {
                info!(signal = signal, "Received signal, shutting down gracefully...");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl+C will stop the streamer");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let handle = spawn_shutdown_listener(token.clone());

        token.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("listener should stop once the token is cancelled")
            .unwrap();
    }
}
