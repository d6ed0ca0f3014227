use std::time::Duration;

use serde::Serialize;

use crate::errors::{HistoryError, StreamError};
use crate::session::backoff::Backoff;
use crate::session::buffer::LogBuffer;
use crate::session::message::StreamMessage;
use crate::session::SessionSettings;
use crate::types::{ConnectionStatus, LogLine, Target};

pub const CONNECTION_LOST: &str = "Connection lost. Retrying...";

/// Id tagging one history request, transport or reconnect timer. Events
/// carrying an id that is no longer current are dropped.
pub type Generation = u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Idle,
    LoadingHistory,
    StreamConnecting,
    /// History failed for a reason other than a stopped entity; the stream is
    /// being opened anyway.
    Error,
    Live,
    ReconnectPending,
    EntityStopped,
    Ended,
    /// Server reported a fatal error, or the reconnect ceiling was hit.
    Failed,
    Stopped,
}

impl Phase {
    pub fn status(self) -> ConnectionStatus {
        match self {
            Phase::LoadingHistory
            | Phase::StreamConnecting
            | Phase::Error
            | Phase::ReconnectPending => ConnectionStatus::Connecting,
            Phase::Live => ConnectionStatus::Live,
            Phase::Idle | Phase::Ended | Phase::Failed => ConnectionStatus::Disconnected,
            Phase::EntityStopped | Phase::Stopped => ConnectionStatus::Stopped,
        }
    }

    /// No further transition happens without a new `start` or `refresh`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::EntityStopped | Phase::Ended | Phase::Failed | Phase::Stopped
        )
    }

    fn awaiting_open(self) -> bool {
        matches!(self, Phase::StreamConnecting | Phase::Error)
    }

    fn has_transport(self) -> bool {
        matches!(self, Phase::StreamConnecting | Phase::Error | Phase::Live)
    }
}

/// Inputs produced by the async side: history results, transport activity and
/// timers.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    HistoryLoaded {
        request: Generation,
        lines: Vec<LogLine>,
    },
    HistoryFailed {
        request: Generation,
        error: HistoryError,
    },
    Opened {
        conn: Generation,
    },
    Message {
        conn: Generation,
        message: StreamMessage,
    },
    TransportError {
        conn: Generation,
        error: StreamError,
    },
    ReconnectDue {
        timer: Generation,
    },
}

impl SessionEvent {
    /// The task that produced this event has finished.
    pub fn finished_task(&self) -> Option<Generation> {
        match self {
            SessionEvent::HistoryLoaded { request, .. }
            | SessionEvent::HistoryFailed { request, .. } => Some(*request),
            SessionEvent::TransportError { conn, .. } => Some(*conn),
            SessionEvent::ReconnectDue { timer } => Some(*timer),
            SessionEvent::Opened { .. } | SessionEvent::Message { .. } => None,
        }
    }
}

/// Side effects requested by a transition, in execution order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    FetchHistory {
        request: Generation,
        target: Target,
        lines: usize,
    },
    CancelHistory {
        request: Generation,
    },
    OpenTransport {
        conn: Generation,
        target: Target,
    },
    CloseTransport {
        conn: Generation,
    },
    ScheduleReconnect {
        timer: Generation,
        delay: Duration,
    },
    CancelReconnect {
        timer: Generation,
    },
}

/// Buffer mutation caused by a transition, for renderers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferChange {
    Replaced(Vec<LogLine>),
    Appended(LogLine),
    Cleared,
}

#[derive(Debug, Default)]
pub struct Outcome {
    pub effects: Vec<Effect>,
    pub change: Option<BufferChange>,
}

/// Observable state apart from the buffer contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub phase: Phase,
    pub status: ConnectionStatus,
    pub error: Option<String>,
    pub entity_stopped: bool,
    pub lines: usize,
    pub reconnect_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub lines: Vec<LogLine>,
}

/// Transition table of one log session. Pure: it never touches the network
/// or timers, it only returns the effects the caller must run.
#[derive(Debug)]
pub struct SessionMachine {
    history_lines: usize,
    phase: Phase,
    target: Option<Target>,
    buffer: LogBuffer,
    backoff: Backoff,
    last_error: Option<String>,
    entity_stopped: bool,
    next_id: Generation,
    history: Option<Generation>,
    conn: Option<Generation>,
    timer: Option<Generation>,
}

impl SessionMachine {
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            history_lines: settings.history_lines,
            phase: Phase::Idle,
            target: None,
            buffer: LogBuffer::new(settings.buffer_capacity),
            backoff: Backoff::new(settings.reconnect),
            last_error: None,
            entity_stopped: false,
            next_id: 0,
            history: None,
            conn: None,
            timer: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn entity_stopped(&self) -> bool {
        self.entity_stopped
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            status: self.phase.status(),
            error: self.last_error.clone(),
            entity_stopped: self.entity_stopped,
            lines: self.buffer.len(),
            reconnect_attempts: self.backoff.attempts(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            lines: self.buffer.to_vec(),
        }
    }

    /// Begin a session for `target`, tearing down any previous one.
    pub fn start(&mut self, target: Target) -> Outcome {
        let mut out = Outcome::default();
        self.teardown(&mut out.effects);

        if !self.buffer.is_empty() {
            self.buffer.clear();
            out.change = Some(BufferChange::Cleared);
        }

        tracing::info!(entity = %target, "starting log session");
        self.target = Some(target);
        self.entity_stopped = false;
        self.last_error = None;
        self.backoff.reset();
        self.begin_history(&mut out.effects);
        out
    }

    /// Idempotent; a no-op before `start` or after a previous `stop`.
    pub fn stop(&mut self) -> Outcome {
        let mut out = Outcome::default();
        if matches!(self.phase, Phase::Idle | Phase::Stopped) {
            return out;
        }

        self.teardown(&mut out.effects);
        self.phase = Phase::Stopped;
        tracing::info!("log session stopped");
        out
    }

    pub fn clear(&mut self) -> Outcome {
        self.buffer.clear();
        Outcome {
            effects: Vec::new(),
            change: Some(BufferChange::Cleared),
        }
    }

    /// Reload history and reopen the stream. The buffer stays as is until the
    /// new history arrives. Only `start` leaves `Stopped`.
    pub fn refresh(&mut self) -> Outcome {
        let mut out = Outcome::default();
        if self.target.is_none() {
            tracing::debug!("refresh ignored: no session started");
            return out;
        }
        if self.phase == Phase::Stopped {
            tracing::debug!("refresh ignored: session stopped");
            return out;
        }

        self.teardown(&mut out.effects);
        self.entity_stopped = false;
        self.last_error = None;
        self.backoff.reset();
        self.begin_history(&mut out.effects);
        out
    }

    pub fn handle(&mut self, event: SessionEvent) -> Outcome {
        let mut out = Outcome::default();

        match event {
            SessionEvent::HistoryLoaded { request, lines } => {
                if !self.take_history(request) {
                    return out;
                }
                tracing::debug!(lines = lines.len(), "history loaded");
                self.buffer.replace(lines);
                out.change = Some(BufferChange::Replaced(self.buffer.to_vec()));
                self.phase = Phase::StreamConnecting;
                self.open_transport(&mut out.effects);
            }

            SessionEvent::HistoryFailed { request, error } => {
                if !self.take_history(request) {
                    return out;
                }
                if error.is_entity_stopped() {
                    tracing::info!(reason = %error, "target is not running");
                    self.entity_stopped = true;
                    self.last_error = None;
                    self.phase = Phase::EntityStopped;
                    if !self.buffer.is_empty() {
                        self.buffer.clear();
                        out.change = Some(BufferChange::Cleared);
                    }
                } else {
                    tracing::warn!(error = %error, "history fetch failed; streaming anyway");
                    self.last_error = Some(error.message);
                    self.phase = Phase::Error;
                    self.open_transport(&mut out.effects);
                }
            }

            SessionEvent::Opened { conn } => {
                if self.conn != Some(conn) || !self.phase.awaiting_open() {
                    return out;
                }
                tracing::info!(conn, "log stream live");
                self.phase = Phase::Live;
                self.last_error = None;
                self.backoff.reset();
            }

            SessionEvent::Message { conn, message } => {
                if self.conn != Some(conn) || self.phase != Phase::Live {
                    return out;
                }
                match message {
                    StreamMessage::Line(line) => {
                        self.buffer.append(line.clone());
                        out.change = Some(BufferChange::Appended(line));
                    }
                    StreamMessage::End => {
                        tracing::info!(conn, "log stream ended by server");
                        self.close_transport(&mut out.effects);
                        self.last_error = None;
                        self.phase = Phase::Ended;
                    }
                    StreamMessage::Error(message) => {
                        tracing::error!(conn, error = %message, "log stream reported an error");
                        self.close_transport(&mut out.effects);
                        self.last_error = Some(message);
                        self.phase = Phase::Failed;
                    }
                }
            }

            SessionEvent::TransportError { conn, error } => {
                if self.conn != Some(conn) || !self.phase.has_transport() {
                    return out;
                }
                self.close_transport(&mut out.effects);

                match self.backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            conn,
                            error = %error,
                            delay_ms = delay.as_millis() as u64,
                            attempt = self.backoff.attempts(),
                            "log stream dropped; reconnect scheduled"
                        );
                        let timer = self.next_generation();
                        self.timer = Some(timer);
                        self.last_error = Some(CONNECTION_LOST.to_string());
                        self.phase = Phase::ReconnectPending;
                        out.effects.push(Effect::ScheduleReconnect { timer, delay });
                    }
                    None => {
                        let attempts = self.backoff.attempts();
                        tracing::error!(conn, error = %error, attempts, "giving up on log stream");
                        self.last_error = Some(format!(
                            "gave up after {attempts} reconnect attempts: {error}"
                        ));
                        self.phase = Phase::Failed;
                    }
                }
            }

            SessionEvent::ReconnectDue { timer } => {
                if self.timer != Some(timer) || self.phase != Phase::ReconnectPending {
                    return out;
                }
                self.timer = None;
                self.phase = Phase::StreamConnecting;
                self.open_transport(&mut out.effects);
            }
        }

        out
    }

    fn next_generation(&mut self) -> Generation {
        self.next_id += 1;
        self.next_id
    }

    fn take_history(&mut self, request: Generation) -> bool {
        if self.history != Some(request) || self.phase != Phase::LoadingHistory {
            return false;
        }
        self.history = None;
        true
    }

    fn begin_history(&mut self, effects: &mut Vec<Effect>) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let request = self.next_generation();
        self.history = Some(request);
        self.phase = Phase::LoadingHistory;
        effects.push(Effect::FetchHistory {
            request,
            target,
            lines: self.history_lines,
        });
    }

    fn open_transport(&mut self, effects: &mut Vec<Effect>) {
        let Some(target) = self.target.clone() else {
            return;
        };
        // One transport per session.
        self.close_transport(effects);
        let conn = self.next_generation();
        self.conn = Some(conn);
        effects.push(Effect::OpenTransport { conn, target });
    }

    fn close_transport(&mut self, effects: &mut Vec<Effect>) {
        if let Some(conn) = self.conn.take() {
            effects.push(Effect::CloseTransport { conn });
        }
    }

    fn teardown(&mut self, effects: &mut Vec<Effect>) {
        self.close_transport(effects);
        if let Some(timer) = self.timer.take() {
            effects.push(Effect::CancelReconnect { timer });
        }
        if let Some(request) = self.history.take() {
            effects.push(Effect::CancelHistory { request });
        }
    }
}
