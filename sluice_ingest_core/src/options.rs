//! Client configuration.
use std::time::Duration;

use bytesize::ByteSize;
use sluice_resources::Profile;

use crate::error::{ConfigurationSnafu, Result};

/// Tuning knobs of an [`IngestClient`](crate::IngestClient).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Maximum time a row stays buffered before its batch is uploaded.
    pub max_client_lag: Duration,
    /// Buffered size after which a batch is uploaded.
    pub flush_size: ByteSize,
    /// Buffered row count after which a batch is uploaded.
    pub max_batch_rows: usize,
    /// Capacity of the queue between channels and the background flusher.
    pub queue_capacity: usize,
    /// How long closing a channel waits for its rows to be committed.
    pub drain_timeout: Duration,
    /// Interval between commit status polls while draining or waiting.
    pub commit_poll_interval: Duration,
    pub retry: RetryPolicy,
}

/// Exponential backoff applied to retryable upload failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

/// Bounded poll loop used when waiting for an offset token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_client_lag: Duration::from_secs(1),
            flush_size: ByteSize::mib(16),
            max_batch_rows: 10_000,
            queue_capacity: 1024,
            drain_timeout: Duration::from_secs(60),
            commit_poll_interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientOptions {
    pub fn with_max_client_lag(mut self, lag: Duration) -> Self {
        self.max_client_lag = lag;
        self
    }

    pub fn with_flush_size(mut self, size: ByteSize) -> Self {
        self.flush_size = size;
        self
    }

    pub fn with_max_batch_rows(mut self, rows: usize) -> Self {
        self.max_batch_rows = rows;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_commit_poll_interval(mut self, interval: Duration) -> Self {
        self.commit_poll_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Applies the tuning values set in the profile.
    pub fn with_profile_overrides(mut self, profile: &Profile) -> Self {
        if let Some(lag_ms) = profile.max_client_lag_ms {
            self.max_client_lag = Duration::from_millis(lag_ms);
        }
        if let Some(bytes) = profile.flush_size_bytes {
            self.flush_size = ByteSize::b(bytes);
        }
        if let Some(rows) = profile.max_batch_rows {
            self.max_batch_rows = rows;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_rows == 0 {
            return ConfigurationSnafu {
                message: "max_batch_rows must be greater than zero",
            }
            .fail();
        }

        if self.flush_size.as_u64() == 0 {
            return ConfigurationSnafu {
                message: "flush_size must be greater than zero",
            }
            .fail();
        }

        if self.queue_capacity == 0 {
            return ConfigurationSnafu {
                message: "queue_capacity must be greater than zero",
            }
            .fail();
        }

        if self.retry.backoff_multiplier < 1.0 {
            return ConfigurationSnafu {
                message: "retry backoff multiplier must be at least 1.0",
            }
            .fail();
        }

        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn next_backoff(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier)
            .min(self.max_backoff)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

impl PollPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}
