//! Signal-driven cancellation.
//!
//! The first SIGINT/SIGTERM cancels a [`CancellationToken`] so the sync
//! cycle can stop at the next page or download boundary without corrupting
//! the checkpoint; a second signal force-exits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Install signal handlers and return the token observed by the sync engine.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let signals_seen = Arc::new(AtomicU32::new(0));

    let handler_token = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler")
        };

        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to listen for Ctrl+C");
            }

            let prev = signals_seen.fetch_add(1, Ordering::SeqCst);
            if prev == 0 {
                tracing::info!("Shutdown requested; stopping at the next safe boundary");
                tracing::info!("Press Ctrl+C again to force exit");
                handler_token.cancel();
            } else {
                tracing::warn!("Force exit requested");
                std::process::exit(130);
            }
        }
    });

    token
}
