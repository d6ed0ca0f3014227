//! Capabilities a log session consumes from the console backend.

pub mod http;
pub mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::{HistoryError, StreamError};
use crate::types::{LogLine, Target};

/// Raw frame payloads of one live connection. The stream ending without an
/// end marker counts as a dropped connection.
pub type FrameStream = BoxStream<'static, Result<String, StreamError>>;

#[async_trait]
pub trait LogHistoryFetcher: Send + Sync {
    /// Up to `lines` most recent lines, oldest first.
    async fn fetch(&self, target: &Target, lines: usize) -> Result<Vec<LogLine>, HistoryError>;
}

#[async_trait]
pub trait LogStreamSource: Send + Sync {
    /// Resolves once the connection is open.
    async fn open(&self, target: &Target) -> Result<FrameStream, StreamError>;
}
