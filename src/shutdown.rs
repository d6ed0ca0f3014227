use tokio_util::sync::CancellationToken;

/// Why the tailer is exiting (logged on the way out).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    CtrlC,
    Sigterm,
    OutputClosed, // e.g. broken pipe / downstream closed
    StreamEnded,
    StreamFailed,
    EntityStopped,
}

pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C (SIGINT) and cancels the token.
/// Returns the reason so caller can log it.
pub async fn wait_ctrl_c(shutdown: &Shutdown) -> ShutdownReason {
    let _ = tokio::signal::ctrl_c().await;
    shutdown.cancel();
    ShutdownReason::CtrlC
}

/// Wait for SIGTERM on Unix (Linux/macOS). On non-Unix, this future never completes.
#[cfg(unix)]
pub async fn wait_sigterm(shutdown: &Shutdown) -> ShutdownReason {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
            shutdown.cancel();
            ShutdownReason::Sigterm
        }
        Err(_) => {
            // If we can't register, just never fire.
            shutdown.token().cancelled().await;
            ShutdownReason::Sigterm
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_sigterm(shutdown: &Shutdown) -> ShutdownReason {
    shutdown.token().cancelled().await;
    ShutdownReason::Sigterm
}

/// Calls `on_hangup` for every SIGHUP until `shutdown` fires. Non-Unix: waits
/// for shutdown only.
#[cfg(unix)]
pub async fn forward_sighup<F, Fut>(shutdown: CancellationToken, mut on_hangup: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    use tokio::signal::unix::{signal, SignalKind};

    let Ok(mut sig) = signal(SignalKind::hangup()) else {
        tracing::debug!("SIGHUP handler unavailable; refresh on hangup disabled");
        return;
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            got = sig.recv() => {
                if got.is_none() {
                    return;
                }
                on_hangup().await;
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn forward_sighup<F, Fut>(shutdown: CancellationToken, _on_hangup: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    shutdown.cancelled().await;
}
