use serde_json::Value;

use crate::types::LogLine;

pub const DEFAULT_SERVER_ERROR: &str = "log stream reported an error";

/// A recognised message pushed on the live stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Line(LogLine),
    End,
    Error(String),
}

impl StreamMessage {
    /// Parse one frame payload. Anything that is not a log line, an end marker
    /// or an error marker returns `None` and is treated as keep-alive noise.
    pub fn parse(payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload).ok()?;
        let obj = value.as_object()?;

        match obj.get("type").and_then(Value::as_str) {
            Some("end") => Some(StreamMessage::End),
            Some("error") => {
                let msg = obj
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|m| !m.is_empty())
                    .unwrap_or(DEFAULT_SERVER_ERROR);
                Some(StreamMessage::Error(msg.to_string()))
            }
            None | Some("log") => serde_json::from_value::<LogLine>(value)
                .ok()
                .map(StreamMessage::Line),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object_is_a_line() {
        let msg = StreamMessage::parse(
            r#"{"timestamp":"2024-03-01T10:00:00Z","service":"api","message":"GET /health 200"}"#,
        );
        match msg {
            Some(StreamMessage::Line(line)) => {
                assert_eq!(line.source_label, "api");
                assert_eq!(line.text, "GET /health 200");
            }
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn end_and_error_markers() {
        assert_eq!(
            StreamMessage::parse(r#"{"type":"end"}"#),
            Some(StreamMessage::End)
        );
        assert_eq!(
            StreamMessage::parse(r#"{"type":"error","message":"container removed"}"#),
            Some(StreamMessage::Error("container removed".to_string()))
        );
        assert_eq!(
            StreamMessage::parse(r#"{"type":"error"}"#),
            Some(StreamMessage::Error(DEFAULT_SERVER_ERROR.to_string()))
        );
    }

    #[test]
    fn noise_is_ignored() {
        assert_eq!(StreamMessage::parse(""), None);
        assert_eq!(StreamMessage::parse("ping"), None);
        assert_eq!(StreamMessage::parse("42"), None);
        assert_eq!(StreamMessage::parse(r#"{"type":"heartbeat"}"#), None);
        assert_eq!(StreamMessage::parse(r#"{"service":"api"}"#), None);
    }

    #[test]
    fn loose_timestamps_still_yield_lines() {
        use crate::types::Timestamp;
        use time::macros::datetime;

        let line_of = |payload: &str| match StreamMessage::parse(payload) {
            Some(StreamMessage::Line(line)) => line,
            other => panic!("expected a line for {payload}, got {other:?}"),
        };

        let line = line_of(r#"{"timestamp":"2024-03-01T10:00:00.123","service":"a","message":"m"}"#);
        assert_eq!(
            line.timestamp,
            Timestamp::At(datetime!(2024-03-01 10:00:00.123 UTC))
        );

        let line = line_of(r#"{"timestamp":"2024-03-01T10:00:00+0000","service":"a","message":"m"}"#);
        assert_eq!(line.timestamp, Timestamp::At(datetime!(2024-03-01 10:00:00 UTC)));

        let line = line_of(r#"{"service":"a","message":"no ts"}"#);
        assert_eq!(line.timestamp, Timestamp::Missing);
        assert_eq!(line.text, "no ts");

        let line = line_of(r#"{"timestamp":"yesterday","service":"a","message":"b"}"#);
        assert_eq!(line.timestamp, Timestamp::Raw("yesterday".to_string()));
    }
}
