//! One live log session: bounded buffer, reconnect policy, the transition
//! table and the tokio actor that runs it.

pub mod backoff;
pub mod buffer;
pub mod client;
pub mod machine;
pub mod message;

use std::time::Duration;

use crate::session::backoff::ReconnectPolicy;
use crate::session::buffer::DEFAULT_CAPACITY;

pub use client::LiveLogClient;
pub use machine::{BufferChange, Phase, SessionSnapshot, SessionStatus};

pub const DEFAULT_HISTORY_LINES: usize = 100;
pub const DEFAULT_HISTORY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    pub history_lines: usize,
    pub buffer_capacity: usize,
    pub reconnect: ReconnectPolicy,
    pub history_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_lines: DEFAULT_HISTORY_LINES,
            buffer_capacity: DEFAULT_CAPACITY,
            reconnect: ReconnectPolicy::default(),
            history_timeout: DEFAULT_HISTORY_TIMEOUT,
        }
    }
}
