pub mod backend;
pub mod cli;
pub mod config;
pub mod dev;
pub mod errors;
pub mod logging;
pub mod output;
pub mod session;
pub mod shutdown;
pub mod types;

use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::http::HttpBackend;
use crate::backend::{LogHistoryFetcher, LogStreamSource};
use crate::config::Config;
use crate::dev::DevBackend;
use crate::errors::{AppError, AppResult};
use crate::session::{BufferChange, LiveLogClient, Phase, SessionStatus};
use crate::shutdown::{Shutdown, ShutdownReason};

const UPDATE_BUFFER: usize = 1024;

pub async fn run(config: Config) -> AppResult<()> {
    run_with_output(config, std::io::stdout()).await
}

/// Like [`run`], with rendered lines written to `out` instead of stdout.
pub async fn run_with_output<W>(config: Config, out: W) -> AppResult<()>
where
    W: Write + Send + 'static,
{
    let shutdown = Shutdown::new();

    let (history, source): (Arc<dyn LogHistoryFetcher>, Arc<dyn LogStreamSource>) =
        match &config.dev {
            Some(dev) => {
                let backend = Arc::new(DevBackend::new(dev.clone()));
                (
                    backend.clone() as Arc<dyn LogHistoryFetcher>,
                    backend as Arc<dyn LogStreamSource>,
                )
            }
            None => {
                let backend = Arc::new(HttpBackend::new(&config.base_url)?);
                (
                    backend.clone() as Arc<dyn LogHistoryFetcher>,
                    backend as Arc<dyn LogStreamSource>,
                )
            }
        };

    let (tx, rx) = mpsc::channel::<BufferChange>(UPDATE_BUFFER);
    let client = LiveLogClient::spawn(history, source, config.session, Some(tx), shutdown.token());
    let mut renderer = tokio::spawn(crate::output::render::render_to(rx, config.output, out));

    client.start(config.target.clone()).await?;

    let mut rendered = None;
    let reason = tokio::select! {
        r = crate::shutdown::wait_ctrl_c(&shutdown) => r,
        r = crate::shutdown::wait_sigterm(&shutdown) => r,
        r = wait_session_done(&client) => r?,
        r = &mut renderer => {
            rendered = Some(r);
            ShutdownReason::OutputClosed
        }
        r = refresh_on_hangup(&client, &shutdown) => r,
    };

    let last = client.status();
    tracing::info!(reason = ?reason, phase = ?last.phase, "shutting down");

    // Stopping drops the update sender, so the renderer drains and exits.
    client.close().await;
    let rendered = match rendered {
        Some(r) => r,
        None => renderer.await,
    };
    match rendered {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(AppError::Io(e)),
        Err(e) => return Err(AppError::Other(format!("renderer task failed: {e}"))),
    }

    match reason {
        ShutdownReason::StreamFailed => Err(AppError::Stream(
            last.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
        ShutdownReason::EntityStopped => {
            eprintln!("{} is not running; start it to view logs", config.target);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Resolves once the session reaches a state it will not leave on its own.
async fn wait_session_done(client: &LiveLogClient) -> AppResult<ShutdownReason> {
    let status: SessionStatus = client.wait_for(|s| s.phase.is_terminal()).await?;
    Ok(match status.phase {
        Phase::EntityStopped => ShutdownReason::EntityStopped,
        Phase::Failed => ShutdownReason::StreamFailed,
        _ => ShutdownReason::StreamEnded,
    })
}

async fn refresh_on_hangup(client: &LiveLogClient, shutdown: &Shutdown) -> ShutdownReason {
    crate::shutdown::forward_sighup(shutdown.token(), move || async move {
        tracing::info!("SIGHUP: refreshing log session");
        if let Err(e) = client.refresh().await {
            tracing::warn!(error = %e, "refresh failed");
        }
    })
    .await;
    std::future::pending().await
}
