//! Configuration for persistence and the store.

use std::time::Duration;

/// Configuration for the persistence orchestrators.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Per-request timeout. A timed out request fails like any other
    /// transport error.
    pub request_timeout: Option<Duration>,
    /// Retry policy for query requests.
    pub retry: RetryConfig,
    /// Yield once before answering a skipped request.
    pub skip_yield: bool,
}

impl PersistConfig {
    /// Creates the default configuration: 30 second timeout, no retries.
    pub fn new() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            retry: RetryConfig::no_retry(),
            skip_yield: true,
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Disables the request timeout.
    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets whether skipped requests yield before answering.
    pub fn with_skip_yield(mut self, skip_yield: bool) -> Self {
        self.skip_yield = skip_yield;
        self
    }
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
///
/// Only query requests are retried, and only after a retryable error.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
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

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Default optimism of the save operations issued by an `EntityDispatcher`.
///
/// Applies when the caller does not set `is_optimistic` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// `add` is optimistic.
    pub optimistic_add: bool,
    /// `delete` is optimistic.
    pub optimistic_delete: bool,
    /// `update` is optimistic.
    pub optimistic_update: bool,
    /// `upsert` is optimistic.
    pub optimistic_upsert: bool,
    /// Batch saves are optimistic.
    pub optimistic_save_entities: bool,
}

impl DispatcherOptions {
    /// Creates the defaults: only deletes are optimistic.
    pub fn new() -> Self {
        Self {
            optimistic_add: false,
            optimistic_delete: true,
            optimistic_update: false,
            optimistic_upsert: false,
            optimistic_save_entities: false,
        }
    }

    /// Sets the default optimism of `add`.
    pub fn with_optimistic_add(mut self, optimistic: bool) -> Self {
        self.optimistic_add = optimistic;
        self
    }

    /// Sets the default optimism of `delete`.
    pub fn with_optimistic_delete(mut self, optimistic: bool) -> Self {
        self.optimistic_delete = optimistic;
        self
    }

    /// Sets the default optimism of `update`.
    pub fn with_optimistic_update(mut self, optimistic: bool) -> Self {
        self.optimistic_update = optimistic;
        self
    }

    /// Sets the default optimism of `upsert`.
    pub fn with_optimistic_upsert(mut self, optimistic: bool) -> Self {
        self.optimistic_upsert = optimistic;
        self
    }

    /// Sets the default optimism of batch saves.
    pub fn with_optimistic_save_entities(mut self, optimistic: bool) -> Self {
        self.optimistic_save_entities = optimistic;
        self
    }
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for an `EntityStore`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Persistence configuration.
    pub persist: PersistConfig,
    /// Dispatcher defaults.
    pub dispatcher: DispatcherOptions,
    /// Capacity of the reduced-action broadcast channel.
    pub reduced_channel_capacity: usize,
    /// Endpoint passed to the batch data service.
    pub save_entities_url: String,
}

impl StoreConfig {
    /// Creates a store configuration with default settings.
    pub fn new() -> Self {
        Self {
            persist: PersistConfig::default(),
            dispatcher: DispatcherOptions::default(),
            reduced_channel_capacity: 256,
            save_entities_url: "api/save/entities".into(),
        }
    }

    /// Sets the persistence configuration.
    pub fn with_persist(mut self, persist: PersistConfig) -> Self {
        self.persist = persist;
        self
    }

    /// Sets the dispatcher defaults.
    pub fn with_dispatcher(mut self, dispatcher: DispatcherOptions) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Sets the reduced-action channel capacity (at least 1).
    pub fn with_reduced_channel_capacity(mut self, capacity: usize) -> Self {
        self.reduced_channel_capacity = capacity.max(1);
        self
    }

    /// Sets the batch save endpoint.
    pub fn with_save_entities_url(mut self, url: impl Into<String>) -> Self {
        self.save_entities_url = url.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
