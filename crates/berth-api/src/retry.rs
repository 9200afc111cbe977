// Berth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Retry with exponential backoff and equal jitter

use crate::error::{ApiError, ApiResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Backoff settings
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry, before jitter
    pub initial_delay: Duration,

    /// Upper bound of the exponential delay, before jitter
    pub max_delay: Duration,

    /// Total time after which no further attempt is started
    pub budget: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            budget: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Exponential delay for a 0-indexed attempt, capped at `max_delay`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay with equal jitter: half the base delay plus a random share of the other half
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let half = self.base_delay(attempt) / 2;
        let jitter = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error or the budget runs out
pub async fn with_backoff<T, F, Fut>(config: &RetryConfig, operation_name: &str, mut operation: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        let error = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => {
                debug!("{}: non-retryable error on attempt {}: {}", operation_name, attempt + 1, e);
                return Err(e);
            }
            Err(e) => e,
        };

        let delay = config.delay_for_attempt(attempt);
        if started.elapsed() + delay > config.budget {
            warn!("{}: retry budget of {:?} exhausted after {} attempts: {}", operation_name, config.budget, attempt + 1, error);
            return Err(error);
        }

        warn!("{}: attempt {} failed, retrying in {:?}: {}", operation_name, attempt + 1, delay, error);
        sleep(delay).await;
        attempt += 1;
    }
}

/// Whether an outbound HTTP failure is worth retrying
pub fn classify_status(status: hyper::StatusCode, message: impl Into<String>) -> ApiError {
    if status.is_server_error() || status == hyper::StatusCode::TOO_MANY_REQUESTS {
        ApiError::retryable(message)
    } else if status == hyper::StatusCode::NOT_FOUND {
        ApiError::not_found(message)
    } else if status == hyper::StatusCode::UNAUTHORIZED {
        ApiError::unauthorized(message)
    } else if status == hyper::StatusCode::FORBIDDEN {
        ApiError::forbidden(message)
    } else {
        ApiError::internal(message)
    }
}
