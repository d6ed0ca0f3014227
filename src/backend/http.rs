use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::backend::sse::SseDecoder;
use crate::backend::{FrameStream, LogHistoryFetcher, LogStreamSource};
use crate::errors::{AppError, AppResult, HistoryError, StreamError};
use crate::types::{LogLine, Target};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Console REST + SSE backend.
///
/// History: `GET {base}/api/{apps|services}/{id}/logs?lines=N` with a bearer
/// header. Live: `GET {base}/api/{apps|services}/{id}/logs/stream?token=..`;
/// the token rides in the query because browser event sources cannot set
/// headers and the server expects it there.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> AppResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::Cli(format!("invalid base url {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(AppError::Cli(format!(
                "base url must be an http(s) url, got {base_url:?}"
            )));
        }
        Ok(Self { client, base })
    }

    pub fn history_url(&self, target: &Target, lines: usize) -> Url {
        let mut url = self.logs_url(target, &[]);
        url.query_pairs_mut().append_pair("lines", &lines.to_string());
        url
    }

    /// Deterministic in target id and token; nothing else is added.
    pub fn stream_url(&self, target: &Target) -> Url {
        let mut url = self.logs_url(target, &["stream"]);
        if let Some(token) = &target.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }

    fn logs_url(&self, target: &Target, tail: &[&str]) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.pop_if_empty()
                .extend(["api", target.kind.path_segment(), target.id.as_str(), "logs"])
                .extend(tail);
        }
        url
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    Lines(Vec<LogLine>),
    Wrapped { logs: Vec<LogLine> },
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl LogHistoryFetcher for HttpBackend {
    async fn fetch(&self, target: &Target, lines: usize) -> Result<Vec<LogLine>, HistoryError> {
        let mut req = self.client.get(self.history_url(target, lines));
        if let Some(token) = &target.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| HistoryError::new(format!("history request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HistoryError::new(error_message(status, &body)));
        }

        let body: HistoryBody = resp
            .json()
            .await
            .map_err(|e| HistoryError::new(format!("invalid history response: {e}")))?;
        let mut lines_out = match body {
            HistoryBody::Lines(l) | HistoryBody::Wrapped { logs: l } => l,
        };

        let excess = lines_out.len().saturating_sub(lines);
        lines_out.drain(..excess);
        Ok(lines_out)
    }
}

#[async_trait]
impl LogStreamSource for HttpBackend {
    async fn open(&self, target: &Target) -> Result<FrameStream, StreamError> {
        let resp = self
            .client
            .get(self.stream_url(target))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| StreamError(format!("failed to open log stream: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StreamError(format!(
                "log stream request failed with status {status}"
            )));
        }

        Ok(sse_frames(resp.bytes_stream().boxed()))
    }
}

/// Human readable failure text from a non-2xx response.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(msg) = parsed.error.or(parsed.message).filter(|m| !m.is_empty()) {
            return msg;
        }
    }
    let body = body.trim();
    if body.is_empty() {
        status.to_string()
    } else {
        body.to_string()
    }
}

struct FrameState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Turn a chunked SSE body into frame payloads. A read error is yielded once
/// and ends the stream.
fn sse_frames<S, B, E>(bytes: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = FrameState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(payload) = st.pending.pop_front() {
                return Some((Ok(payload), st));
            }
            if st.done {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => match st.decoder.push(chunk.as_ref()) {
                    Ok(frames) => st.pending.extend(frames),
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                },
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(StreamError(format!("log stream read failed: {e}"))), st));
                }
                None => {
                    st.done = true;
                    st.pending.extend(st.decoder.finish());
                }
            }
        }
    })
    .boxed()
}
