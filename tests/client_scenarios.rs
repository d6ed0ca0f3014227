use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deck_logs::backend::{FrameStream, LogHistoryFetcher, LogStreamSource};
use deck_logs::errors::{HistoryError, StreamError};
use deck_logs::session::{BufferChange, LiveLogClient, Phase, SessionSettings};
use deck_logs::types::{ConnectionStatus, EntityKind, LogLine, Target};
use futures::StreamExt;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

fn line(text: &str) -> LogLine {
    LogLine {
        timestamp: OffsetDateTime::UNIX_EPOCH.into(),
        source_label: "web".to_string(),
        text: text.to_string(),
    }
}

fn frame(text: &str) -> String {
    serde_json::json!({
        "timestamp": "2024-03-01T10:00:00Z",
        "service": "web",
        "message": text,
    })
    .to_string()
}

enum History {
    Lines(Vec<LogLine>),
    Fail(&'static str),
    Hang,
}

#[derive(Default)]
struct FakeHistory {
    script: Mutex<VecDeque<History>>,
    calls: AtomicUsize,
}

impl FakeHistory {
    fn new(script: Vec<History>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LogHistoryFetcher for FakeHistory {
    async fn fetch(&self, _target: &Target, _lines: usize) -> Result<Vec<LogLine>, HistoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(History::Lines(lines)) => Ok(lines),
            Some(History::Fail(msg)) => Err(HistoryError::new(msg)),
            Some(History::Hang) => std::future::pending().await,
            None => Ok(Vec::new()),
        }
    }
}

enum Plan {
    Accept,
    Refuse(&'static str),
    Gated(Arc<Notify>),
}

type FrameSender = mpsc::UnboundedSender<Result<String, StreamError>>;

/// Decrements the live-stream count when the client drops a stream.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeSource {
    plans: Mutex<VecDeque<Plan>>,
    opened: AtomicUsize,
    live: Arc<AtomicUsize>,
    senders: Mutex<Vec<FrameSender>>,
}

impl FakeSource {
    fn new(plans: Vec<Plan>) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(plans.into()),
            ..Self::default()
        })
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn sender(&self, idx: usize) -> FrameSender {
        self.senders.lock().unwrap()[idx].clone()
    }

    /// Ends connection `idx` from the server side.
    fn hang_up(&self, idx: usize) {
        let mut senders = self.senders.lock().unwrap();
        let (tx, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut senders[idx], tx));
    }
}

#[async_trait]
impl LogStreamSource for FakeSource {
    async fn open(&self, _target: &Target) -> Result<FrameStream, StreamError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Accept);
        match plan {
            Plan::Refuse(msg) => return Err(StreamError(msg.to_string())),
            Plan::Gated(gate) => gate.notified().await,
            Plan::Accept => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(self.live.clone());

        let frames = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|item| (item, (rx, guard)))
        });
        Ok(frames.boxed())
    }
}

fn target(id: &str) -> Target {
    Target::new(EntityKind::Service, id)
}

fn spawn(history: Arc<FakeHistory>, source: Arc<FakeSource>) -> LiveLogClient {
    LiveLogClient::spawn(
        history,
        source,
        SessionSettings::default(),
        None,
        CancellationToken::new(),
    )
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn texts(client: &LiveLogClient) -> Vec<String> {
    client
        .snapshot()
        .await
        .unwrap()
        .lines
        .into_iter()
        .map(|l| l.text)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn cold_start_loads_history_and_goes_live() {
    let history = FakeHistory::new(vec![History::Lines(vec![line("a"), line("b"), line("c")])]);
    let source = FakeSource::new(vec![Plan::Accept]);
    let client = spawn(history.clone(), source.clone());

    client.start(target("svc-1")).await.unwrap();
    let status = client.wait_for(|s| s.phase == Phase::Live).await.unwrap();

    assert_eq!(status.status, ConnectionStatus::Live);
    assert_eq!(status.error, None);
    assert_eq!(texts(&client).await, vec!["a", "b", "c"]);
    assert_eq!(history.calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.opened(), 1);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn stopped_target_never_streams() {
    let history = FakeHistory::new(vec![History::Fail("Container is stopped")]);
    let source = FakeSource::new(Vec::new());
    let client = spawn(history, source.clone());

    client.start(target("svc-2")).await.unwrap();
    let status = client
        .wait_for(|s| s.phase == Phase::EntityStopped)
        .await
        .unwrap();

    assert!(status.entity_stopped);
    assert_eq!(status.error, None);
    assert_eq!(status.status, ConnectionStatus::Stopped);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.opened(), 0);
    assert!(texts(&client).await.is_empty());

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_history_reports_error_and_still_streams() {
    let history = FakeHistory::new(vec![History::Fail("internal server error")]);
    let gate = Arc::new(Notify::new());
    let source = FakeSource::new(vec![Plan::Gated(gate.clone())]);
    let client = spawn(history, source.clone());

    client.start(target("svc-3")).await.unwrap();
    let status = client.wait_for(|s| s.phase == Phase::Error).await.unwrap();
    assert_eq!(status.error.as_deref(), Some("internal server error"));
    assert!(!status.entity_stopped);

    gate.notify_one();
    let status = client.wait_for(|s| s.phase == Phase::Live).await.unwrap();
    assert_eq!(status.error, None);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn hung_history_times_out_then_streams() {
    let history = FakeHistory::new(vec![History::Hang]);
    let source = FakeSource::new(vec![Plan::Accept]);
    let client = spawn(history, source.clone());

    let started = tokio::time::Instant::now();
    client.start(target("svc-4")).await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(source.opened(), 1);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn flaky_stream_reconnects_and_keeps_buffer() {
    let history = FakeHistory::new(vec![History::Lines(vec![line("h1")])]);
    let gate = Arc::new(Notify::new());
    let source = FakeSource::new(vec![Plan::Accept, Plan::Gated(gate.clone())]);
    let client = spawn(history, source.clone());

    client.start(target("svc-5")).await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();

    source.sender(0).send(Ok(frame("l1"))).unwrap();
    client.wait_for(|s| s.lines == 2).await.unwrap();

    let dropped_at = tokio::time::Instant::now();
    source.hang_up(0);
    let status = client
        .wait_for(|s| s.phase == Phase::ReconnectPending)
        .await
        .unwrap();
    assert_eq!(status.error.as_deref(), Some("Connection lost. Retrying..."));
    assert_eq!(status.status, ConnectionStatus::Connecting);
    assert_eq!(texts(&client).await, vec!["h1", "l1"]);

    client
        .wait_for(|s| s.phase == Phase::StreamConnecting)
        .await
        .unwrap();
    assert!(dropped_at.elapsed() >= Duration::from_secs(3));
    eventually(|| source.opened() == 2).await;

    gate.notify_one();
    let status = client.wait_for(|s| s.phase == Phase::Live).await.unwrap();
    assert_eq!(status.error, None);
    assert_eq!(texts(&client).await, vec!["h1", "l1"]);

    source.sender(1).send(Ok(frame("l2"))).unwrap();
    client.wait_for(|s| s.lines == 3).await.unwrap();
    assert_eq!(texts(&client).await, vec!["h1", "l1", "l2"]);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn stop_while_reconnect_pending_opens_nothing() {
    let history = FakeHistory::new(Vec::new());
    let source = FakeSource::new(vec![Plan::Refuse("connection refused")]);
    let client = spawn(history, source.clone());

    client.start(target("svc-6")).await.unwrap();
    client
        .wait_for(|s| s.phase == Phase::ReconnectPending)
        .await
        .unwrap();

    client.stop().await.unwrap();
    client.wait_for(|s| s.phase == Phase::Stopped).await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.opened(), 1);

    // Stopping again is a no-op.
    client.stop().await.unwrap();
    assert_eq!(client.snapshot().await.unwrap().status.phase, Phase::Stopped);

    // So is a refresh: a stopped session stays released.
    client.refresh().await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(client.snapshot().await.unwrap().status.phase, Phase::Stopped);
    assert_eq!(source.opened(), 1);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_leaves_exactly_one_transport() {
    let history = FakeHistory::new(vec![
        History::Lines(vec![line("old")]),
        History::Lines(vec![line("new")]),
    ]);
    let source = FakeSource::new(vec![Plan::Accept, Plan::Accept]);
    let client = spawn(history, source.clone());

    client.start(target("svc-7")).await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();
    let first = source.sender(0);

    client.refresh().await.unwrap();
    let snap = client.snapshot().await.unwrap();
    assert_ne!(snap.status.phase, Phase::Live);

    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();
    eventually(|| first.is_closed()).await;
    assert_eq!(source.opened(), 2);
    assert_eq!(source.live(), 1);
    assert_eq!(texts(&client).await, vec!["new"]);

    // Nothing from the superseded connection reaches the buffer.
    let _ = first.send(Ok(frame("ghost")));
    source.sender(1).send(Ok(frame("fresh"))).unwrap();
    client.wait_for(|s| s.lines == 2).await.unwrap();
    assert_eq!(texts(&client).await, vec!["new", "fresh"]);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn clear_keeps_stream_live() {
    let history = FakeHistory::new(vec![History::Lines(vec![line("a"), line("b")])]);
    let source = FakeSource::new(vec![Plan::Accept]);
    let client = spawn(history, source.clone());

    client.start(target("svc-8")).await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();

    client.clear().await.unwrap();
    let snap = client.snapshot().await.unwrap();
    assert!(snap.lines.is_empty());
    assert_eq!(snap.status.phase, Phase::Live);

    source.sender(0).send(Ok(frame("c"))).unwrap();
    client.wait_for(|s| s.lines == 1).await.unwrap();
    assert_eq!(texts(&client).await, vec!["c"]);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn keepalive_noise_is_ignored() {
    let history = FakeHistory::new(Vec::new());
    let source = FakeSource::new(vec![Plan::Accept]);
    let client = spawn(history, source.clone());

    client.start(target("svc-9")).await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();

    let tx = source.sender(0);
    tx.send(Ok(r#"{"type":"ping"}"#.to_string())).unwrap();
    tx.send(Ok("not json".to_string())).unwrap();
    tx.send(Ok(frame("real"))).unwrap();
    client.wait_for(|s| s.lines == 1).await.unwrap();

    let status = client.status();
    assert_eq!(status.phase, Phase::Live);
    assert_eq!(status.error, None);
    assert_eq!(texts(&client).await, vec!["real"]);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn end_marker_disconnects_cleanly() {
    let history = FakeHistory::new(Vec::new());
    let source = FakeSource::new(vec![Plan::Accept]);
    let client = spawn(history, source.clone());

    client.start(target("svc-10")).await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();

    source.sender(0).send(Ok(r#"{"type":"end"}"#.to_string())).unwrap();
    let status = client.wait_for(|s| s.phase == Phase::Ended).await.unwrap();
    assert_eq!(status.status, ConnectionStatus::Disconnected);
    assert_eq!(status.error, None);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.opened(), 1);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn server_error_marker_does_not_reconnect() {
    let history = FakeHistory::new(Vec::new());
    let source = FakeSource::new(vec![Plan::Accept]);
    let client = spawn(history, source.clone());

    client.start(target("svc-11")).await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();

    source
        .sender(0)
        .send(Ok(r#"{"type":"error","message":"container removed"}"#.to_string()))
        .unwrap();
    let status = client.wait_for(|s| s.phase == Phase::Failed).await.unwrap();
    assert_eq!(status.error.as_deref(), Some("container removed"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.opened(), 1);

    // A manual refresh recovers.
    client.refresh().await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();
    assert_eq!(source.opened(), 2);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn updates_channel_mirrors_buffer_changes() {
    let history = FakeHistory::new(vec![History::Lines(vec![line("h")])]);
    let source = FakeSource::new(vec![Plan::Accept]);
    let (tx, mut rx) = mpsc::channel(16);
    let client = LiveLogClient::spawn(
        history,
        source.clone(),
        SessionSettings::default(),
        Some(tx),
        CancellationToken::new(),
    );

    client.start(target("svc-12")).await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();
    source.sender(0).send(Ok(frame("l"))).unwrap();
    client.wait_for(|s| s.lines == 2).await.unwrap();
    client.clear().await.unwrap();

    assert_eq!(rx.recv().await, Some(BufferChange::Replaced(vec![line("h")])));
    match rx.recv().await {
        Some(BufferChange::Appended(l)) => assert_eq!(l.text, "l"),
        other => panic!("expected appended line, got {other:?}"),
    }
    assert_eq!(rx.recv().await, Some(BufferChange::Cleared));

    client.close().await;
    assert_eq!(rx.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn shutdown_token_tears_session_down() {
    let history = FakeHistory::new(Vec::new());
    let source = FakeSource::new(vec![Plan::Accept]);
    let shutdown = CancellationToken::new();
    let client = LiveLogClient::spawn(
        history,
        source.clone(),
        SessionSettings::default(),
        None,
        shutdown.clone(),
    );

    client.start(target("svc-13")).await.unwrap();
    client.wait_for(|s| s.phase == Phase::Live).await.unwrap();

    shutdown.cancel();
    client.wait_for(|s| s.phase == Phase::Stopped).await.unwrap();
    eventually(|| source.live() == 0).await;

    client.close().await;
}
