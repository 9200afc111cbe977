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

//! Replication policies and registry endpoints

use crate::error::{ApiError, ApiResult};
use crate::replication::model::{PolicyRecord, Registry, ReplicationPolicy};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[async_trait]
pub trait PolicyManager: Send + Sync {
    /// Store a validated policy; a second policy with the same name is a conflict
    async fn create(&self, policy: ReplicationPolicy) -> ApiResult<i64>;

    async fn get(&self, id: i64) -> ApiResult<ReplicationPolicy>;

    async fn list(&self) -> ApiResult<Vec<ReplicationPolicy>>;

    async fn update(&self, policy: ReplicationPolicy) -> ApiResult<()>;

    async fn remove(&self, id: i64) -> ApiResult<()>;
}

#[async_trait]
pub trait RegistryManager: Send + Sync {
    async fn add(&self, registry: Registry) -> ApiResult<i64>;

    async fn get(&self, id: i64) -> ApiResult<Registry>;

    async fn list(&self) -> ApiResult<Vec<Registry>>;
}

/// Policies held in their storage form
#[derive(Default)]
pub struct InMemoryPolicyManager {
    records: RwLock<BTreeMap<i64, PolicyRecord>>,
}

impl InMemoryPolicyManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyManager for InMemoryPolicyManager {
    async fn create(&self, mut policy: ReplicationPolicy) -> ApiResult<i64> {
        policy.validate()?;

        let mut records = self.records.write();
        if records.values().any(|r| r.name == policy.name) {
            return Err(ApiError::conflict(format!("policy {} already exists", policy.name)));
        }

        let now = Utc::now();
        policy.id = records.keys().next_back().copied().unwrap_or(0) + 1;
        policy.creation_time = now;
        policy.update_time = now;
        let record = PolicyRecord::try_from(&policy)?;
        records.insert(policy.id, record);
        Ok(policy.id)
    }

    async fn get(&self, id: i64) -> ApiResult<ReplicationPolicy> {
        let records = self.records.read();
        let record = records.get(&id).ok_or_else(|| ApiError::not_found(format!("policy {} not found", id)))?;
        ReplicationPolicy::try_from(record)
    }

    async fn list(&self) -> ApiResult<Vec<ReplicationPolicy>> {
        self.records.read().values().map(ReplicationPolicy::try_from).collect()
    }

    async fn update(&self, mut policy: ReplicationPolicy) -> ApiResult<()> {
        policy.validate()?;

        let mut records = self.records.write();
        if records.values().any(|r| r.name == policy.name && r.id != policy.id) {
            return Err(ApiError::conflict(format!("policy {} already exists", policy.name)));
        }
        let existing = records.get(&policy.id).ok_or_else(|| ApiError::not_found(format!("policy {} not found", policy.id)))?;

        policy.creation_time = existing.creation_time;
        policy.update_time = Utc::now();
        let record = PolicyRecord::try_from(&policy)?;
        records.insert(policy.id, record);
        Ok(())
    }

    async fn remove(&self, id: i64) -> ApiResult<()> {
        self.records.write().remove(&id).map(|_| ()).ok_or_else(|| ApiError::not_found(format!("policy {} not found", id)))
    }
}

#[derive(Default)]
pub struct InMemoryRegistryManager {
    registries: RwLock<BTreeMap<i64, Registry>>,
}

impl InMemoryRegistryManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryManager for InMemoryRegistryManager {
    async fn add(&self, mut registry: Registry) -> ApiResult<i64> {
        if registry.url.trim().is_empty() {
            return Err(ApiError::invalid_argument("registry url is required"));
        }

        let mut registries = self.registries.write();
        if registries.values().any(|r| r.name == registry.name) {
            return Err(ApiError::conflict(format!("registry {} already exists", registry.name)));
        }
        registry.id = registries.keys().next_back().copied().unwrap_or(0) + 1;
        let id = registry.id;
        registries.insert(id, registry);
        Ok(id)
    }

    async fn get(&self, id: i64) -> ApiResult<Registry> {
        self.registries.read().get(&id).cloned().ok_or_else(|| ApiError::not_found(format!("registry {} not found", id)))
    }

    async fn list(&self) -> ApiResult<Vec<Registry>> {
        Ok(self.registries.read().values().cloned().collect())
    }
}
