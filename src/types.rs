use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Which family of console entity a target belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EntityKind {
    App,
    Service,
}

impl EntityKind {
    /// Path segment used by the console API.
    pub fn path_segment(self) -> &'static str {
        match self {
            EntityKind::App => "apps",
            EntityKind::Service => "services",
        }
    }
}

/// The entity whose logs are tailed, plus the credential used to reach it.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Target {
    pub kind: EntityKind,
    pub id: String,
    pub token: Option<String>,
}

impl Target {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

// Keeps the bearer token out of logs.
impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.path_segment(), self.id)
    }
}

/// One line of output. The timestamp comes from the source, never the client.
///
/// History responses name the fields `source_label`/`text`, stream frames use
/// `service`/`message`; both shapes deserialize here.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(default)]
    pub timestamp: Timestamp,
    #[serde(alias = "service")]
    pub source_label: String,
    #[serde(alias = "message")]
    pub text: String,
}

// `+0000` style offsets, which RFC 3339 rejects.
const COMPACT_OFFSET: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]][offset_hour sign:mandatory][offset_minute]"
);
const NAIVE_T: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]");
const NAIVE_SPACE: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]");

/// Source timestamp of a line.
///
/// Servers are loose about ISO-8601, so parsing is lenient and a value that
/// still does not parse is kept verbatim instead of losing the line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Timestamp {
    At(OffsetDateTime),
    Raw(String),
    #[default]
    Missing,
}

impl Timestamp {
    pub fn parse(s: &str) -> Self {
        match parse_iso8601(s) {
            Some(at) => Timestamp::At(at),
            None => Timestamp::Raw(s.to_string()),
        }
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(at: OffsetDateTime) -> Self {
        Timestamp::At(at)
    }
}

/// RFC 3339 when parsed, the raw text otherwise, empty when absent.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::At(at) => match at.format(&Rfc3339) {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "{at}"),
            },
            Timestamp::Raw(raw) => f.write_str(raw),
            Timestamp::Missing => Ok(()),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Timestamp::Missing => serializer.serialize_none(),
            other => serializer.collect_str(other),
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Null => Timestamp::Missing,
            serde_json::Value::String(s) => Timestamp::parse(&s),
            other => Timestamp::Raw(other.to_string()),
        })
    }
}

/// Offset-less forms are taken as UTC.
pub fn parse_iso8601(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    OffsetDateTime::parse(s, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(s, &Iso8601::DEFAULT))
        .or_else(|_| OffsetDateTime::parse(s, COMPACT_OFFSET))
        .ok()
        .or_else(|| {
            PrimitiveDateTime::parse(s, NAIVE_T)
                .or_else(|_| PrimitiveDateTime::parse(s, NAIVE_SPACE))
                .ok()
                .map(PrimitiveDateTime::assume_utc)
        })
}

/// Coarse connection status shown next to the log view.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Connecting,
    Live,
    Disconnected,
    Stopped,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Live => "live",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(Clone, Copy, Debug)]
pub struct OutputConfig {
    pub mode: OutputMode,
    pub color: ColorMode,
    pub timestamps: bool,
}
