//! Incremental Server-Sent Events decoding.
//!
//! Only the `data` field matters here: multi-line data is joined with `\n`,
//! comments (`:` lines) and other fields (`event`, `id`, `retry`) are skipped.

use crate::errors::StreamError;

/// Longest line or event payload accepted before the stream is abandoned.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    // Bytes of `buf` already known to hold no newline.
    scanned: usize,
    data: Vec<String>,
    data_len: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the data payload of every event completed by
    /// this chunk. Fails once a line or event grows past [`MAX_FRAME_BYTES`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, StreamError> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        loop {
            let Some(rel) = self.buf[from..].iter().position(|b| *b == b'\n') else {
                break;
            };
            let end = from + rel;
            let line = String::from_utf8_lossy(&self.buf[start..end])
                .trim_end_matches('\r')
                .to_string();
            start = end + 1;
            from = start;
            self.feed_line(&line, &mut out)?;
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();
        if self.buf.len() > MAX_FRAME_BYTES {
            return Err(StreamError(format!(
                "log stream line exceeds {MAX_FRAME_BYTES} bytes"
            )));
        }
        Ok(out)
    }

    fn feed_line(&mut self, line: &str, out: &mut Vec<String>) -> Result<(), StreamError> {
        if line.is_empty() {
            out.extend(self.dispatch());
            return Ok(());
        }
        if line.starts_with(':') {
            return Ok(());
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_len += value.len() + 1;
            if self.data_len > MAX_FRAME_BYTES {
                return Err(StreamError(format!(
                    "log stream event exceeds {MAX_FRAME_BYTES} bytes"
                )));
            }
            self.data.push(value.to_string());
        }
        Ok(())
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.scanned = 0;
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r');
            if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        self.data_len = 0;
        Some(payload)
    }
}
