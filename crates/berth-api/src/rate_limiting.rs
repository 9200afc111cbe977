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

//! Token bucket limiting outbound registry requests

use crate::error::{ApiError, ApiResult};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::trace;

/// Longest wait reported for a denied take
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Reject refill rates a bucket cannot run with
pub fn check_rate(rate: f64) -> ApiResult<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ApiError::invalid_argument(format!("rate limit must be a positive number of requests per second, got {}", rate)));
    }
    Ok(())
}

/// Outcome of a non-blocking take
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitInfo {
    /// Bucket capacity
    pub limit: u32,

    /// Whole tokens left after this take
    pub remaining: u32,

    /// Time until the requested cost is available, zero when allowed
    pub retry_after: Duration,

    /// Whether the take succeeded
    pub allowed: bool,
}

/// Token bucket refilled continuously at a fixed rate
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum tokens in the bucket
    max_tokens: u32,

    /// Tokens added per second
    tokens_per_second: f64,

    /// Current tokens and the time they were computed at
    state: Mutex<(f64, Instant)>,
}

impl TokenBucket {
    /// Bucket holding `burst` tokens, refilled at `rate` tokens per second
    pub fn new(rate: f64, burst: u32) -> ApiResult<Self> {
        check_rate(rate)?;
        let max_tokens = burst.max(1);
        Ok(Self {
            max_tokens,
            tokens_per_second: rate,
            state: Mutex::new((max_tokens as f64, Instant::now())),
        })
    }

    /// Take `cost` tokens if available
    pub fn try_take(&self, cost: u32) -> RateLimitInfo {
        let now = Instant::now();
        let mut state = self.state.lock();
        let (tokens, last_refill) = *state;

        let refilled = (tokens + now.duration_since(last_refill).as_secs_f64() * self.tokens_per_second).min(self.max_tokens as f64);
        let allowed = refilled >= cost as f64;

        let remaining = if allowed { refilled - cost as f64 } else { refilled };
        *state = (remaining, now);

        let retry_after = if allowed {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64((cost as f64 - refilled) / self.tokens_per_second).map_or(MAX_RETRY_AFTER, |wait| wait.min(MAX_RETRY_AFTER))
        };

        RateLimitInfo {
            limit: self.max_tokens,
            remaining: remaining as u32,
            retry_after,
            allowed,
        }
    }

    /// Take one token, waiting until one is available
    pub async fn take(&self) {
        loop {
            let info = self.try_take(1);
            if info.allowed {
                return;
            }
            trace!("Rate limited, waiting {:?}", info.retry_after);
            sleep(info.retry_after).await;
        }
    }
}
