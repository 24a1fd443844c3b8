//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for the sync loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry and backoff configuration for unreachable remotes.
    pub retry: RetryConfig,
    /// Timeout applied to every remote call.
    pub timeout: Duration,
    /// Capacity of the command channel between handles and the loop.
    pub command_capacity: usize,
    /// Whether to run a sync cycle as soon as the loop starts.
    pub sync_on_start: bool,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            command_capacity: 32,
            sync_on_start: true,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the remote call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the command channel capacity.
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    /// Sets whether to sync when the loop starts.
    pub fn with_sync_on_start(mut self, enabled: bool) -> Self {
        self.sync_on_start = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
///
/// `max_attempts` is the number of consecutive unreachable cycles after which
/// the offline prompter is consulted. Between attempts the loop waits
/// [`RetryConfig::delay_for_attempt`], never longer than the configured sync
/// interval.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Consecutive failures before escalating to the offline prompter.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that escalates on the first failure and never
    /// schedules a retry of its own.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Values below 1.0, and NaN, become 1.0.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // NaN from a hand-set multiplier falls through `min` to the cap.
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

        let delay_secs = if self.add_jitter && delay_secs > 0.0 {
            // Add up to 25% jitter
            delay_secs + delay_secs * 0.25 * rand::thread_rng().gen::<f64>()
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }

    /// Calculates the retry delay, bounded above by the sync interval.
    pub fn bounded_delay(&self, attempt: u32, interval: Option<Duration>) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        match interval {
            Some(interval) => delay.min(interval),
            None => delay,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
