use crate::logs::OverflowPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Maximum number of buffered entries.
pub(crate) const OBSERV_BUFFER_CAPACITY: &str = "OBSERV_BUFFER_CAPACITY";
/// Default buffer capacity.
pub(crate) const OBSERV_BUFFER_CAPACITY_DEFAULT: usize = 1_000;
/// Delay between two timer driven flushes, in milliseconds.
pub(crate) const OBSERV_FLUSH_INTERVAL: &str = "OBSERV_FLUSH_INTERVAL";
/// Default flush interval.
pub(crate) const OBSERV_FLUSH_INTERVAL_DEFAULT: Duration = Duration::from_millis(100);
/// Shortest flush interval accepted.
pub(crate) const OBSERV_FLUSH_INTERVAL_FLOOR: Duration = Duration::from_millis(10);
/// Overflow policy name, `drop_newest` or `overwrite_oldest`.
pub(crate) const OBSERV_OVERFLOW_POLICY: &str = "OBSERV_OVERFLOW_POLICY";

/// Pipeline configuration.
/// Use [`ConfigBuilder`] to configure your own instance of [`Config`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The maximum number of entries held in the buffer between flushes.
    /// The default value is 1000.
    pub(crate) buffer_capacity: usize,

    /// The delay between two consecutive timer driven flushes. The default
    /// value is 100 milliseconds; values below 10 milliseconds are raised to 10.
    pub(crate) flush_interval: Duration,

    /// What to do with new entries when the buffer is full.
    pub(crate) overflow_policy: OverflowPolicy,

    /// Whether a buffer reaching capacity triggers an immediate flush.
    pub(crate) flush_on_capacity: bool,
}

impl Config {
    /// Maximum number of buffered entries.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Delay between timer driven flushes.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Overflow policy of the buffer.
    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Whether reaching capacity triggers an immediate flush.
    pub fn flush_on_capacity(&self) -> bool {
        self.flush_on_capacity
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

/// A builder for creating [`Config`] instances.
#[derive(Debug)]
pub struct ConfigBuilder {
    buffer_capacity: usize,
    flush_interval: Duration,
    overflow_policy: OverflowPolicy,
    flush_on_capacity: bool,
}

impl Default for ConfigBuilder {
    /// Create a new [`ConfigBuilder`] initialized with the default values.
    /// The values are overridden by environment variables if set:
    /// * `OBSERV_BUFFER_CAPACITY`
    /// * `OBSERV_FLUSH_INTERVAL`
    /// * `OBSERV_OVERFLOW_POLICY`
    ///
    /// Note: Programmatic configuration overrides any value set via the environment variable.
    fn default() -> Self {
        ConfigBuilder {
            buffer_capacity: OBSERV_BUFFER_CAPACITY_DEFAULT,
            flush_interval: OBSERV_FLUSH_INTERVAL_DEFAULT,
            overflow_policy: OverflowPolicy::default(),
            flush_on_capacity: true,
        }
        .init_from_env_vars()
    }
}

impl ConfigBuilder {
    /// Set the buffer capacity. A capacity of 0 falls back to the default of 1000.
    ///
    /// Corresponding environment variable: `OBSERV_BUFFER_CAPACITY`.
    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// Set the flush interval. Zero falls back to the default of 100
    /// milliseconds and anything below 10 milliseconds is raised to 10.
    ///
    /// Corresponding environment variable: `OBSERV_FLUSH_INTERVAL`, in milliseconds.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Set the overflow policy. The default is [`OverflowPolicy::DropNewest`].
    ///
    /// Corresponding environment variable: `OBSERV_OVERFLOW_POLICY`.
    pub fn with_overflow_policy(mut self, overflow_policy: OverflowPolicy) -> Self {
        self.overflow_policy = overflow_policy;
        self
    }

    /// Enable or disable the immediate flush when the buffer reaches
    /// capacity. Enabled by default. When disabled, a full buffer waits for
    /// the next timer tick or an explicit flush.
    pub fn with_flush_on_capacity(mut self, flush_on_capacity: bool) -> Self {
        self.flush_on_capacity = flush_on_capacity;
        self
    }

    /// Builds a `Config`, replacing invalid values with safe ones:
    /// * a zero capacity becomes the default capacity;
    /// * a zero interval becomes the default interval;
    /// * an interval under the floor becomes the floor.
    pub fn build(self) -> Config {
        let buffer_capacity = if self.buffer_capacity == 0 {
            OBSERV_BUFFER_CAPACITY_DEFAULT
        } else {
            self.buffer_capacity
        };

        let flush_interval = if self.flush_interval.is_zero() {
            OBSERV_FLUSH_INTERVAL_DEFAULT
        } else {
            self.flush_interval.max(OBSERV_FLUSH_INTERVAL_FLOOR)
        };

        Config {
            buffer_capacity,
            flush_interval,
            overflow_policy: self.overflow_policy,
            flush_on_capacity: self.flush_on_capacity,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(buffer_capacity) = env::var(OBSERV_BUFFER_CAPACITY)
            .ok()
            .and_then(|capacity| usize::from_str(capacity.trim()).ok())
        {
            self.buffer_capacity = buffer_capacity;
        }

        if let Some(flush_interval) = env::var(OBSERV_FLUSH_INTERVAL)
            .ok()
            .and_then(|interval| u64::from_str(interval.trim()).ok())
        {
            self.flush_interval = Duration::from_millis(flush_interval);
        }

        if let Some(overflow_policy) = env::var(OBSERV_OVERFLOW_POLICY)
            .ok()
            .and_then(|policy| OverflowPolicy::from_str(&policy).ok())
        {
            self.overflow_policy = overflow_policy;
        }

        self
    }
}
