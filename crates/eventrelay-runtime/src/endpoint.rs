//! Relay endpoint: runs a consumer until shutdown is requested.
//!
//! Shutdown stops the intake of notifications and then waits, up to a
//! bounded window, for the relay round in flight. A round that outlives the
//! window is cancelled; its unit of work is never committed, so the
//! checkpoint stays where it was.

use std::future::Future;
use std::time::Duration;

use eventrelay_core::aggregate::AggregateState;
use eventrelay_core::ports::NotificationSource;
use eventrelay_core::store::EventStore;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::consumer::{ConsumerReport, TransactionConsumer};
use crate::error::RuntimeError;

/// A consumer bound to its notification source.
pub struct Endpoint<A: AggregateState, S, N> {
    consumer: TransactionConsumer<A, S>,
    source: N,
}

impl<A, S, N> Endpoint<A, S, N>
where
    A: AggregateState,
    S: EventStore<A> + 'static,
    N: NotificationSource + 'static,
{
    /// Binds `consumer` to `source`.
    #[must_use]
    pub fn new(consumer: TransactionConsumer<A, S>, source: N) -> Self {
        Self { consumer, source }
    }

    /// Runs until `shutdown` resolves or the source closes.
    ///
    /// A zero `timeout` falls back to the default five-second window.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::ShutdownTimeout` if the in-flight round did
    /// not finish within the window, or `RuntimeError::Task` if the
    /// consumer task panicked.
    pub async fn serve<F>(self, shutdown: F, timeout: Duration) -> Result<ConsumerReport, RuntimeError>
    where
        F: Future<Output = ()> + Send,
    {
        let timeout = if timeout.is_zero() {
            DEFAULT_SHUTDOWN_TIMEOUT
        } else {
            timeout
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let Self {
            consumer,
            mut source,
        } = self;
        let mut worker = tokio::spawn(async move { consumer.run(&mut source, stop_rx).await });
        info!("relay endpoint started");

        tokio::select! {
            joined = &mut worker => return Ok(joined?),
            () = shutdown => {}
        }

        info!(timeout_ms = timeout.as_millis(), "shutdown requested, draining");
        // The worker may already be gone if the source closed concurrently.
        let _ = stop_tx.send(true);
        if let Ok(joined) = tokio::time::timeout(timeout, &mut worker).await {
            let report = joined?;
            info!("relay endpoint stopped");
            Ok(report)
        } else {
            worker.abort();
            warn!(timeout_ms = timeout.as_millis(), "in-flight relay cancelled");
            Err(RuntimeError::ShutdownTimeout(timeout))
        }
    }
}

/// Resolves when the process receives Ctrl+C or, on Unix, SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
