//! Process shutdown: OS signals and draining background tasks.
//!
//! ```rust,ignore
//! let (shutdown_tx, _) = broadcast::channel(1);
//! axum::serve(listener, app)
//!     .with_graceful_shutdown(shutdown::signal())
//!     .await?;
//! let _ = shutdown_tx.send(());
//! shutdown::drain(handles, config.server.shutdown_timeout).await;
//! ```

use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Resolves on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed, that signal is never awaited and the
/// failure is logged.
pub async fn signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}

/// Wait for background tasks to finish, giving up after `timeout`.
///
/// Returns `true` if every task finished in time.
pub async fn drain(handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
    let count = handles.len();
    match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
        Ok(results) => {
            let panicked = results.iter().filter(|r| r.is_err()).count();
            if panicked > 0 {
                warn!(panicked, "Background tasks ended abnormally");
            }
            info!(count, "Background tasks stopped");
            true
        },
        Err(_) => {
            warn!(count, timeout_secs = timeout.as_secs(), "Background tasks did not stop in time");
            false
        },
    }
}
