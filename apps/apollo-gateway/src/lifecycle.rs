use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::sessions::{SessionRegistry, SessionStream};

/// Runs teardown exactly once, however many times shutdown is requested.
pub struct ShutdownHook<S> {
    sessions: SessionRegistry<S>,
    fired: AtomicBool,
    done: watch::Sender<bool>,
}

impl<S: SessionStream> ShutdownHook<S> {
    pub fn new(sessions: SessionRegistry<S>) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            sessions,
            fired: AtomicBool::new(false),
            done,
        })
    }

    /// Close every session, then release anyone waiting in [`Self::wait`].
    ///
    /// Returns `false` when shutdown had already run.
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        if self.sessions.is_empty() {
            info!("shutting down");
        } else {
            info!(active_sessions = self.sessions.len(), "shutting down, closing sessions");
        }
        for (id, e) in self.sessions.close_all() {
            warn!(session_id = %id, error = %e, "failed to close session");
        }
        self.done.send_replace(true);
        true
    }

    /// Resolves once [`Self::trigger`] has finished.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// SIGINT, plus SIGTERM on unix. Handlers are registered on construction, so
/// a signal arriving before the first `recv` is not lost.
pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    pub fn new() -> anyhow::Result<Self> {
        use anyhow::Context as _;
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("install SIGINT handler")?,
            terminate: signal(SignalKind::terminate()).context("install SIGTERM handler")?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {},
            _ = self.terminate.recv() => {},
        }
        info!("shutdown signal received");
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    }
}

/// Trigger `hook` on every termination signal; only the first one has an effect.
pub fn install_signal_handlers<S: SessionStream>(hook: Arc<ShutdownHook<S>>) -> anyhow::Result<()> {
    let mut signals = ShutdownSignals::new()?;
    tokio::spawn(async move {
        loop {
            signals.recv().await;
            if !hook.trigger() {
                info!("shutdown already in progress");
            }
        }
    });
    Ok(())
}
