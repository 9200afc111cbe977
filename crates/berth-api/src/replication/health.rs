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

//! Registry health probing

use crate::replication::adapter::{AdapterRegistry, HealthStatus};
use crate::replication::model::Registry;
use crate::retry::{RetryConfig, with_backoff};
use tracing::{debug, warn};

/// Check a registry through its adapter, retrying transient failures with backoff
///
/// Anything that is still failing once the retry budget is spent counts as unhealthy.
pub async fn check_registry(adapters: &AdapterRegistry, registry: &Registry, retry: &RetryConfig) -> HealthStatus {
    let adapter = match adapters.create(registry) {
        Ok(adapter) => adapter,
        Err(e) => {
            warn!(registry = %registry.name, "No adapter for registry: {}", e);
            return HealthStatus::Unhealthy;
        }
    };

    let operation = format!("health check of {}", registry.name);
    match with_backoff(retry, &operation, || adapter.health_check()).await {
        Ok(status) => {
            debug!(registry = %registry.name, status = ?status, "Registry health checked");
            status
        }
        Err(e) => {
            warn!(registry = %registry.name, "Registry health check failed: {}", e);
            HealthStatus::Unhealthy
        }
    }
}
