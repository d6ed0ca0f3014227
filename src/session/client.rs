use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::backend::{LogHistoryFetcher, LogStreamSource};
use crate::errors::{AppError, AppResult, HistoryError, StreamError};
use crate::session::machine::{
    BufferChange, Effect, Generation, Outcome, SessionEvent, SessionMachine, SessionSnapshot,
    SessionStatus,
};
use crate::session::message::StreamMessage;
use crate::session::SessionSettings;
use crate::types::Target;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

#[derive(Debug)]
enum Command {
    Start(Target),
    Stop,
    Clear,
    Refresh,
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Handle to a log session actor.
///
/// All state lives in the actor task; the handle only sends commands. Status
/// is published on a `watch` channel, buffer changes on the optional update
/// channel given to [`LiveLogClient::spawn`].
pub struct LiveLogClient {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    task: JoinHandle<()>,
}

impl LiveLogClient {
    pub fn spawn(
        history: Arc<dyn LogHistoryFetcher>,
        source: Arc<dyn LogStreamSource>,
        settings: SessionSettings,
        updates: Option<mpsc::Sender<BufferChange>>,
        shutdown: CancellationToken,
    ) -> Self {
        let machine = SessionMachine::new(&settings);
        let (status_tx, status_rx) = watch::channel(machine.status());
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let actor = SessionActor {
            machine,
            history,
            source,
            history_timeout: settings.history_timeout,
            tasks: HashMap::new(),
            events: event_tx,
            updates,
            status: status_tx,
            shutdown,
        };
        let task = tokio::spawn(actor.run(cmd_rx, event_rx));

        Self {
            commands: cmd_tx,
            status: status_rx,
            task,
        }
    }

    pub async fn start(&self, target: Target) -> AppResult<()> {
        self.send(Command::Start(target)).await
    }

    pub async fn stop(&self) -> AppResult<()> {
        self.send(Command::Stop).await
    }

    pub async fn clear(&self) -> AppResult<()> {
        self.send(Command::Clear).await
    }

    pub async fn refresh(&self) -> AppResult<()> {
        self.send(Command::Refresh).await
    }

    pub async fn snapshot(&self) -> AppResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| actor_gone())
    }

    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until the published status satisfies `f`.
    pub async fn wait_for(
        &self,
        mut f: impl FnMut(&SessionStatus) -> bool,
    ) -> AppResult<SessionStatus> {
        let mut rx = self.status.clone();
        let status = rx.wait_for(|s| f(s)).await.map_err(|_| actor_gone())?;
        Ok(status.clone())
    }

    /// Stop the session and wait for the actor to release everything.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Stop).await;
        drop(self.commands);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "log session task failed");
        }
    }

    async fn send(&self, cmd: Command) -> AppResult<()> {
        self.commands.send(cmd).await.map_err(|_| actor_gone())
    }
}

fn actor_gone() -> AppError {
    AppError::Other("log session task is gone".to_string())
}

struct SessionActor {
    machine: SessionMachine,
    history: Arc<dyn LogHistoryFetcher>,
    source: Arc<dyn LogStreamSource>,
    history_timeout: Duration,
    /// Cancellation handle per running history fetch, transport or timer.
    tasks: HashMap<Generation, CancellationToken>,
    events: mpsc::Sender<SessionEvent>,
    updates: Option<mpsc::Sender<BufferChange>>,
    status: watch::Sender<SessionStatus>,
    shutdown: CancellationToken,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        loop {
            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => break,

                cmd = commands.recv() => match cmd {
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.machine.snapshot());
                        continue;
                    }
                    Some(Command::Start(target)) => self.machine.start(target),
                    Some(Command::Stop) => self.machine.stop(),
                    Some(Command::Clear) => self.machine.clear(),
                    Some(Command::Refresh) => self.machine.refresh(),
                    None => break,
                },

                Some(ev) = events.recv() => {
                    if let Some(done) = ev.finished_task() {
                        self.tasks.remove(&done);
                    }
                    self.machine.handle(ev)
                }
            };

            self.apply(outcome).await;
        }

        let outcome = self.machine.stop();
        self.apply(outcome).await;
        for (_, token) in self.tasks.drain() {
            token.cancel();
        }
    }

    async fn apply(&mut self, outcome: Outcome) {
        for effect in outcome.effects {
            self.run_effect(effect);
        }

        if let (Some(change), Some(updates)) = (outcome.change, self.updates.as_ref()) {
            // Renderer gone: keep the session running without it.
            if updates.send(change).await.is_err() {
                self.updates = None;
            }
        }

        let next = self.machine.status();
        self.status.send_if_modified(|cur| {
            if *cur == next {
                false
            } else {
                *cur = next;
                true
            }
        });
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::FetchHistory {
                request,
                target,
                lines,
            } => {
                let token = self.track(request);
                tokio::spawn(fetch_history(
                    self.history.clone(),
                    target,
                    lines,
                    request,
                    self.history_timeout,
                    self.events.clone(),
                    token,
                ));
            }

            Effect::OpenTransport { conn, target } => {
                let token = self.track(conn);
                tokio::spawn(read_transport(
                    self.source.clone(),
                    target,
                    conn,
                    self.events.clone(),
                    token,
                ));
            }

            Effect::ScheduleReconnect { timer, delay } => {
                let token = self.track(timer);
                let events = self.events.clone();
                tokio::spawn(async move {
                    if sleep_or_cancel(delay, &token).await {
                        let _ = events.send(SessionEvent::ReconnectDue { timer }).await;
                    }
                });
            }

            Effect::CancelHistory { request: id }
            | Effect::CloseTransport { conn: id }
            | Effect::CancelReconnect { timer: id } => {
                if let Some(token) = self.tasks.remove(&id) {
                    token.cancel();
                }
            }
        }
    }

    fn track(&mut self, id: Generation) -> CancellationToken {
        let token = self.shutdown.child_token();
        self.tasks.insert(id, token.clone());
        token
    }
}

async fn fetch_history(
    fetcher: Arc<dyn LogHistoryFetcher>,
    target: Target,
    lines: usize,
    request: Generation,
    timeout: Duration,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let res = tokio::select! {
        _ = cancel.cancelled() => return,
        r = tokio::time::timeout(timeout, fetcher.fetch(&target, lines)) => r,
    };

    let ev = match res {
        Ok(Ok(lines)) => SessionEvent::HistoryLoaded { request, lines },
        Ok(Err(error)) => SessionEvent::HistoryFailed { request, error },
        Err(_) => SessionEvent::HistoryFailed {
            request,
            error: HistoryError::new(format!(
                "history request timed out after {}s",
                timeout.as_secs()
            )),
        },
    };
    let _ = events.send(ev).await;
}

/// Open one transport and forward what it delivers until it fails, ends or is
/// cancelled. A cancelled transport sends nothing more.
async fn read_transport(
    source: Arc<dyn LogStreamSource>,
    target: Target,
    conn: Generation,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        r = source.open(&target) => r,
    };

    let mut frames = match opened {
        Ok(frames) => frames,
        Err(error) => {
            let _ = events
                .send(SessionEvent::TransportError { conn, error })
                .await;
            return;
        }
    };

    if events.send(SessionEvent::Opened { conn }).await.is_err() {
        return;
    }

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            item = frames.next() => item,
        };

        let ev = match next {
            Some(Ok(payload)) => match StreamMessage::parse(&payload) {
                Some(message) => SessionEvent::Message { conn, message },
                None => {
                    tracing::trace!(conn, "ignoring keep-alive frame");
                    continue;
                }
            },
            Some(Err(error)) => SessionEvent::TransportError { conn, error },
            None => SessionEvent::TransportError {
                conn,
                error: StreamError("stream closed by server".to_string()),
            },
        };

        let last = matches!(ev, SessionEvent::TransportError { .. });
        if events.send(ev).await.is_err() || last {
            return;
        }
    }
}

/// Returns `true` if the full delay elapsed.
async fn sleep_or_cancel(d: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = sleep(d) => true,
        _ = cancel.cancelled() => false,
    }
}
