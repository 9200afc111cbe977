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

//! Resource pattern compilation and the shared compiled-pattern store

use crate::error::{ApiError, ApiResult};
use dashmap::DashMap;
use metrics::{counter, gauge};
use rand::Rng;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Translate a resource pattern into an anchored regular expression
///
/// `*` as a whole segment matches anything from that point on, `:name` matches exactly one
/// segment, every other character is literal.
pub fn pattern_to_regex(pattern: &str) -> String {
    let body = pattern
        .split('/')
        .map(|segment| {
            if segment == "*" {
                ".*".to_string()
            } else if segment.len() > 1 && segment.starts_with(':') {
                "[^/]+".to_string()
            } else {
                regex::escape(segment)
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("^{}$", body)
}

/// Process-wide cache of compiled resource patterns
#[derive(Debug, Default)]
pub struct PatternStore {
    patterns: DashMap<String, Arc<Regex>>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled form of `pattern`, compiling and caching it on first use
    pub fn get(&self, pattern: &str) -> ApiResult<Arc<Regex>> {
        if let Some(regex) = self.patterns.get(pattern) {
            return Ok(regex.clone());
        }

        let compiled = Regex::new(&pattern_to_regex(pattern)).map_err(|e| ApiError::invalid_argument(format!("invalid resource pattern {}: {}", pattern, e)))?;
        let regex = self.patterns.entry(pattern.to_string()).or_insert_with(|| Arc::new(compiled)).clone();
        counter!("berth_pattern_store_compiled_total", 1);
        Ok(regex)
    }

    /// Whether `resource` matches `pattern`
    pub fn matches(&self, pattern: &str, resource: &str) -> ApiResult<bool> {
        if !pattern.contains('*') && !pattern.contains(':') {
            return Ok(pattern == resource);
        }
        Ok(self.get(pattern)?.is_match(resource))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Drop every compiled pattern, returning how many were removed
    pub fn purge(&self) -> usize {
        let removed = self.patterns.len();
        self.patterns.retain(|_, _| false);
        gauge!("berth_pattern_store_entries", 0.0);
        removed
    }

    /// Purge the store every `interval`, starting after a random delay of at most `max_jitter`
    pub fn start_purge_task(store: Arc<Self>, interval: Duration, max_jitter: Duration) -> tokio::task::JoinHandle<()> {
        let jitter = if max_jitter.is_zero() { Duration::ZERO } else { Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter.as_millis() as u64)) };

        tokio::spawn(async move {
            info!("Pattern store purge scheduled every {:?} after {:?}", interval, jitter);
            tokio::time::sleep(jitter).await;

            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; consume it so purges are spaced by `interval`.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.purge();
                debug!(removed, "Purged compiled resource patterns");
            }
        })
    }
}
