//! Simulated backend for running without a console server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::time::{sleep, Duration};

use crate::backend::{FrameStream, LogHistoryFetcher, LogStreamSource};
use crate::errors::{HistoryError, StreamError};
use crate::types::{LogLine, Target, Timestamp};

const SOURCES: [&str; 2] = ["web", "worker"];
const KEEPALIVE_EVERY: u64 = 4;

#[derive(Clone, Debug)]
pub struct DevSettings {
    /// Milliseconds between live lines.
    pub rate_ms: u64,
    /// Live lines before the server sends its end marker.
    pub lines: u64,
    /// Report the target as not running.
    pub stopped: bool,
    /// Drop the first connection after this many lines.
    pub drop_after: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct DevBackend {
    settings: DevSettings,
    connections: Arc<AtomicU64>,
    emitted: Arc<AtomicU64>,
}

impl DevBackend {
    pub fn new(settings: DevSettings) -> Self {
        tracing::info!("using simulated dev backend");
        Self {
            settings,
            connections: Arc::new(AtomicU64::new(0)),
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}

fn dev_line(n: u64, ts: OffsetDateTime) -> LogLine {
    LogLine {
        timestamp: ts.into(),
        source_label: SOURCES[(n % SOURCES.len() as u64) as usize].to_string(),
        text: format!("log line {n}"),
    }
}

#[async_trait]
impl LogHistoryFetcher for DevBackend {
    async fn fetch(&self, target: &Target, lines: usize) -> Result<Vec<LogLine>, HistoryError> {
        if self.settings.stopped {
            return Err(HistoryError::new(format!("Container is stopped: {}", target.id)));
        }

        let now = OffsetDateTime::now_utc();
        let count = lines.min(20) as i64;
        Ok((0..count)
            .map(|i| {
                let age = TimeDuration::seconds(count - i);
                let mut line = dev_line(i as u64, now - age);
                line.text = format!("history line {i}");
                line
            })
            .collect())
    }
}

#[derive(Serialize)]
struct DevFrame<'a> {
    timestamp: &'a Timestamp,
    service: &'a str,
    message: &'a str,
}

#[derive(Default)]
struct DevStream {
    sent: u64,
    ping_due: bool,
    finished: bool,
}

#[async_trait]
impl LogStreamSource for DevBackend {
    async fn open(&self, target: &Target) -> Result<FrameStream, StreamError> {
        if self.settings.stopped {
            return Err(StreamError(format!("{} is not running", target.id)));
        }

        let conn = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        let drop_after = self.settings.drop_after.filter(|_| conn == 1);
        let limit = self.settings.lines;
        let rate = Duration::from_millis(self.settings.rate_ms);
        let emitted = self.emitted.clone();

        tracing::debug!(conn, "dev stream opened");

        let frames = stream::unfold(DevStream::default(), move |mut st| {
            let emitted = emitted.clone();
            async move {
                if st.finished {
                    return None;
                }
                if st.ping_due {
                    st.ping_due = false;
                    return Some((Ok(r#"{"type":"ping"}"#.to_string()), st));
                }
                if emitted.load(Ordering::SeqCst) >= limit {
                    st.finished = true;
                    return Some((Ok(r#"{"type":"end"}"#.to_string()), st));
                }
                if drop_after.is_some_and(|d| st.sent >= d) {
                    st.finished = true;
                    let err = StreamError("simulated connection drop".to_string());
                    return Some((Err(err), st));
                }

                sleep(rate).await;
                let n = emitted.fetch_add(1, Ordering::SeqCst);
                let line = dev_line(n, OffsetDateTime::now_utc());
                let frame = DevFrame {
                    timestamp: &line.timestamp,
                    service: &line.source_label,
                    message: &line.text,
                };
                let payload = serde_json::to_string(&frame)
                    .map_err(|e| StreamError(format!("dev frame encoding failed: {e}")));

                st.sent += 1;
                st.ping_due = st.sent % KEEPALIVE_EVERY == 0;
                Some((payload, st))
            }
        });

        Ok(frames.boxed())
    }
}
