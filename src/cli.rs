use clap::{Parser, ValueEnum};

use crate::types::{ColorMode, EntityKind};

#[derive(Debug, Parser)]
#[command(
    name = "deck-logs",
    version,
    about = "Tail application and service logs from the deck console"
)]
pub struct Cli {
    /// Application or service id
    pub target: String,

    /// Console base URL
    #[arg(
        short = 'u',
        long = "url",
        env = "DECK_URL",
        default_value = "http://localhost:3000"
    )]
    pub url: String,

    /// Kind of entity the id refers to
    #[arg(short = 'k', long = "kind", value_enum, default_value_t = KindArg::App)]
    pub kind: KindArg,

    /// Bearer token
    #[arg(long = "token", env = "DECK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// History lines fetched before going live
    #[arg(short = 'n', long = "lines", default_value_t = 100)]
    pub lines: usize,

    /// Lines kept in memory
    #[arg(long = "buffer", default_value_t = 500)]
    pub buffer: usize,

    /// Delay before reconnecting a dropped stream
    #[arg(long = "reconnect-delay-ms", default_value_t = 3000)]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the reconnect delay when --backoff-factor > 1
    #[arg(long = "reconnect-max-delay-ms")]
    pub reconnect_max_delay_ms: Option<u64>,

    /// Multiply the reconnect delay by this after each failed attempt
    #[arg(long = "backoff-factor", default_value_t = 1)]
    pub backoff_factor: u32,

    /// Give up after this many consecutive reconnects (default: never)
    #[arg(long = "max-reconnects")]
    pub max_reconnects: Option<u32>,

    /// History request timeout in seconds
    #[arg(long = "history-timeout", default_value_t = 10)]
    pub history_timeout_secs: u64,

    /// Emit NDJSON log lines
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,

    /// Color mode: auto (tty only), always, never
    #[arg(long = "color", value_enum, default_value_t = ColorModeArg::Auto)]
    pub color: ColorModeArg,

    /// Disable colors (overrides --color)
    #[arg(long = "no-color", default_value_t = false)]
    pub no_color: bool,

    /// Omit timestamps in human output
    #[arg(long = "no-timestamps", default_value_t = false)]
    pub no_timestamps: bool,

    /// Dev mode: simulate the console backend
    #[arg(long = "dev", default_value_t = false)]
    pub dev: bool,

    /// Dev: milliseconds between lines
    #[arg(long = "dev-rate-ms", default_value_t = 500)]
    pub dev_rate_ms: u64,

    /// Dev: live lines before the server ends the stream
    #[arg(long = "dev-lines", default_value_t = 10)]
    pub dev_lines: u64,

    /// Dev: report the target as stopped
    #[arg(long = "dev-stopped", default_value_t = false)]
    pub dev_stopped: bool,

    /// Dev: drop the first connection after this many lines
    #[arg(long = "dev-drop-after")]
    pub dev_drop_after: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum KindArg {
    App,
    Service,
}

impl From<KindArg> for EntityKind {
    fn from(v: KindArg) -> Self {
        match v {
            KindArg::App => EntityKind::App,
            KindArg::Service => EntityKind::Service,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ColorModeArg {
    Auto,
    Always,
    Never,
}

impl From<ColorModeArg> for ColorMode {
    fn from(v: ColorModeArg) -> Self {
        match v {
            ColorModeArg::Auto => ColorMode::Auto,
            ColorModeArg::Always => ColorMode::Always,
            ColorModeArg::Never => ColorMode::Never,
        }
    }
}
