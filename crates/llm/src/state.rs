//! Per-model rate-limit and health state.

use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The rolling window over which requests are counted.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);
/// Cooldown cap for rate-limit backoff.
const MAX_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(300);
/// Short cooldown after a generic provider error.
const ERROR_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ModelState {
    pub name: String,
    pub provider: String,
    pub rpm_limit: u32,
    /// USD per 1M input tokens
    pub cost_in: f64,
    /// USD per 1M output tokens
    pub cost_out: f64,
    request_times: Vec<Instant>,
    cooldown_until: Option<Instant>,
    consecutive_errors: u32,
}

impl ModelState {
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        rpm_limit: u32,
        cost_in: f64,
        cost_out: f64,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            rpm_limit,
            cost_in,
            cost_out,
            request_times: Vec::new(),
            cooldown_until: None,
            consecutive_errors: 0,
        }
    }

    pub fn is_cooled_down(&mut self) -> bool {
        match self.cooldown_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                if self.consecutive_errors > 0 {
                    info!(model = %self.name, "Cooldown expired, resetting for retry");
                    self.consecutive_errors = 0;
                }
                self.cooldown_until = None;
                true
            }
            None => true,
        }
    }

    /// Count a request against the rolling window. Called at dispatch time,
    /// so the window bounds issued requests rather than completed ones.
    pub fn mark_dispatched(&mut self) {
        self.prune();
        self.request_times.push(Instant::now());
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn record_rate_limit(&mut self) {
        self.consecutive_errors += 1;
        let backoff = Duration::from_secs(60u64.saturating_mul(1 << self.consecutive_errors.min(8)))
            .min(MAX_RATE_LIMIT_COOLDOWN);
        self.cooldown_until = Some(Instant::now() + backoff);
        warn!(model = %self.name, backoff_secs = backoff.as_secs(), "Model rate-limited, cooling down");
    }

    pub fn record_error(&mut self) {
        self.consecutive_errors += 1;
        self.cooldown_until = Some(Instant::now() + ERROR_COOLDOWN);
    }

    /// Used for auth and not-found failures that should keep a model out of
    /// rotation for much longer than a transient error.
    pub fn cooldown_for(&mut self, duration: Duration) {
        self.cooldown_until = Some(Instant::now() + duration);
    }

    pub fn requests_in_window(&mut self) -> usize {
        self.prune();
        self.request_times.len()
    }

    pub fn has_capacity(&mut self) -> bool {
        self.is_cooled_down() && self.requests_in_window() < self.rpm_limit as usize
    }

    /// How long until this model could accept a request: the remaining
    /// cooldown, or the time until the oldest windowed request expires.
    pub fn wait_time(&mut self) -> Duration {
        if let Some(until) = self.cooldown_until {
            let now = Instant::now();
            if now < until {
                return until - now;
            }
        }
        self.prune();
        if self.request_times.len() >= self.rpm_limit as usize {
            if let Some(oldest) = self.request_times.first() {
                return RATE_WINDOW.saturating_sub(oldest.elapsed()) + Duration::from_millis(100);
            }
        }
        Duration::ZERO
    }

    pub fn cooldown_remaining(&self) -> Duration {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    fn prune(&mut self) {
        self.request_times.retain(|t| t.elapsed() < RATE_WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(rpm: u32) -> ModelState {
        ModelState::new("test-model", "anthropic", rpm, 1.0, 5.0)
    }

    #[test]
    fn capacity_tracks_window() {
        let mut state = model(3);
        assert!(state.has_capacity());
        for _ in 0..3 {
            state.mark_dispatched();
        }
        assert!(!state.has_capacity());
        assert_eq!(state.requests_in_window(), 3);
    }

    #[test]
    fn rate_limit_backoff_doubles_and_caps() {
        let mut state = model(10);
        state.record_rate_limit();
        let first = state.cooldown_remaining();
        assert!(first >= Duration::from_secs(100));

        state.cooldown_until = None;
        state.record_rate_limit();
        let second = state.cooldown_remaining();
        assert!(second >= first);
        assert!(second <= Duration::from_secs(300));
    }

    #[test]
    fn cooldown_blocks_capacity() {
        let mut state = model(10);
        state.record_error();
        assert!(!state.has_capacity());
        assert!(state.wait_time() > Duration::ZERO);
    }

    #[test]
    fn success_resets_error_streak() {
        let mut state = model(10);
        state.record_error();
        state.record_error();
        assert_eq!(state.consecutive_errors, 2);
        state.record_success();
        assert_eq!(state.consecutive_errors, 0);
    }

    #[test]
    fn wait_time_zero_when_free() {
        let mut state = model(10);
        assert_eq!(state.wait_time(), Duration::ZERO);
    }

    #[test]
    fn extended_cooldown_for_auth_failures() {
        let mut state = model(10);
        state.cooldown_for(Duration::from_secs(600));
        assert!(!state.has_capacity());
        assert!(state.cooldown_remaining() > Duration::from_secs(500));
    }
}
