use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How a session retries after its transport drops.
///
/// The default is a fixed 3 second delay with no ceiling. A `factor` above 1
/// grows the delay up to `max_delay`; `max_attempts` gives up after that many
/// consecutive failed reconnects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_delay: DEFAULT_RECONNECT_DELAY,
            factor: 1,
            max_attempts: None,
        }
    }
}

/// Per-session retry state driven by a [`ReconnectPolicy`].
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    cur: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            cur: policy.delay,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.cur = self.policy.delay;
        self.attempts = 0;
    }

    /// Delay before the next attempt, or `None` once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        self.attempts += 1;

        let d = self.cur;
        let grown = self.cur.saturating_mul(self.policy.factor.max(1));
        self.cur = std::cmp::min(grown, self.policy.max_delay.max(self.policy.delay));
        Some(d)
    }
}
