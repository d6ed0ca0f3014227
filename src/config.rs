use std::time::Duration;

use crate::cli::Cli;
use crate::dev::DevSettings;
use crate::errors::{AppError, AppResult};
use crate::session::backoff::ReconnectPolicy;
use crate::session::SessionSettings;
use crate::types::{ColorMode, EntityKind, OutputConfig, OutputMode, Target};

#[derive(Clone, Debug)]
pub struct Config {
    pub base_url: String,
    pub target: Target,
    pub session: SessionSettings,
    pub output: OutputConfig,

    /// `Some` runs against the simulated backend.
    pub dev: Option<DevSettings>,
}

impl TryFrom<Cli> for Config {
    type Error = AppError;

    fn try_from(cli: Cli) -> AppResult<Self> {
        let id = cli.target.trim().to_string();
        if id.is_empty() {
            return Err(AppError::Cli("target id must not be empty".to_string()));
        }
        if cli.lines == 0 {
            return Err(AppError::Cli("--lines must be at least 1".to_string()));
        }
        if cli.buffer == 0 {
            return Err(AppError::Cli("--buffer must be at least 1".to_string()));
        }
        if cli.backoff_factor == 0 {
            return Err(AppError::Cli("--backoff-factor must be at least 1".to_string()));
        }

        let delay = Duration::from_millis(cli.reconnect_delay_ms);
        let max_delay = cli
            .reconnect_max_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(delay);
        if max_delay < delay {
            return Err(AppError::Cli(
                "--reconnect-max-delay-ms must not be below --reconnect-delay-ms".to_string(),
            ));
        }

        let mut target = Target::new(EntityKind::from(cli.kind), id);
        if let Some(token) = cli.token.filter(|t| !t.is_empty()) {
            target = target.with_token(token);
        }

        let session = SessionSettings {
            history_lines: cli.lines,
            buffer_capacity: cli.buffer,
            reconnect: ReconnectPolicy {
                delay,
                max_delay,
                factor: cli.backoff_factor,
                max_attempts: cli.max_reconnects,
            },
            history_timeout: Duration::from_secs(cli.history_timeout_secs),
        };

        let mode = if cli.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };

        let color = if cli.no_color {
            ColorMode::Never
        } else {
            cli.color.into()
        };

        let output = OutputConfig {
            mode,
            color,
            timestamps: !cli.no_timestamps,
        };

        let dev = cli.dev.then(|| DevSettings {
            rate_ms: cli.dev_rate_ms,
            lines: cli.dev_lines,
            stopped: cli.dev_stopped,
            drop_after: cli.dev_drop_after,
        });

        Ok(Self {
            base_url: cli.url,
            target,
            session,
            output,
            dev,
        })
    }
}
