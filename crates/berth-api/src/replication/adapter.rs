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

//! Registry adapters and the factory table they are created from

use crate::error::{ApiError, ApiResult};
use crate::replication::model::{Filter, FilterType, Namespace, NamespaceQuery, Registry, Resource, ResourceType, TriggerType};
use async_trait::async_trait;
use hyper::body::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// User agent sent by replication clients
pub const USER_AGENT: &str = "harbor-replication-service";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStyle {
    Text,
    Radio,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCapability {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub style: FilterStyle,
}

/// What a registry type supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    #[serde(rename = "type")]
    pub registry_type: String,
    pub supported_resource_types: Vec<ResourceType>,
    pub supported_resource_filters: Vec<FilterCapability>,
    pub supported_triggers: Vec<TriggerType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// A manifest as pulled from a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub media_type: String,
    pub digest: String,
    pub payload: Bytes,
}

/// Access to one registry
#[async_trait]
pub trait Adapter: Send + Sync {
    fn info(&self) -> AdapterInfo;

    async fn list_namespaces(&self, query: &NamespaceQuery) -> ApiResult<Vec<Namespace>>;

    async fn get_namespace(&self, name: &str) -> ApiResult<Namespace>;

    /// Create a namespace; succeeds when it already exists
    async fn create_namespace(&self, namespace: &Namespace) -> ApiResult<()>;

    /// Discover resources in `namespaces` (all when empty) matching `filters`
    async fn fetch_resources(&self, namespaces: &[String], filters: &[Filter]) -> ApiResult<Vec<Resource>>;

    async fn health_check(&self) -> ApiResult<HealthStatus>;

    /// Image operations, for adapters that can move image content
    fn as_image_registry(&self) -> Option<&dyn ImageRegistry> {
        None
    }
}

/// Image content operations used by transfer workers
#[async_trait]
pub trait ImageRegistry: Adapter {
    /// Digest of the manifest if it exists
    async fn manifest_exist(&self, repository: &str, reference: &str) -> ApiResult<Option<String>>;

    async fn pull_manifest(&self, repository: &str, reference: &str, accepted_media_types: &[&str]) -> ApiResult<Manifest>;

    async fn push_manifest(&self, repository: &str, reference: &str, media_type: &str, payload: Bytes) -> ApiResult<()>;

    /// Delete by tag or digest; a missing manifest is not an error
    async fn delete_manifest(&self, repository: &str, reference: &str) -> ApiResult<()>;

    async fn blob_exist(&self, repository: &str, digest: &str) -> ApiResult<bool>;

    async fn pull_blob(&self, repository: &str, digest: &str) -> ApiResult<Bytes>;

    async fn push_blob(&self, repository: &str, digest: &str, blob: Bytes) -> ApiResult<()>;
}

pub type AdapterFactory = Arc<dyn Fn(&Registry) -> ApiResult<Arc<dyn Adapter>> + Send + Sync>;

/// Factory table keyed by registry type
///
/// Filled once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<String, (AdapterFactory, AdapterInfo)>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `info.registry_type`; a type may only be registered once
    pub fn register(&mut self, info: AdapterInfo, factory: AdapterFactory) -> ApiResult<()> {
        let registry_type = info.registry_type.clone();
        if registry_type.is_empty() {
            return Err(ApiError::invalid_argument("registry type must not be empty"));
        }
        if self.factories.contains_key(&registry_type) {
            return Err(ApiError::conflict(format!("adapter factory for {} already registered", registry_type)));
        }

        self.factories.insert(registry_type.clone(), (factory, info));
        info!(registry_type = %registry_type, "Registered replication adapter");
        Ok(())
    }

    /// Create an adapter for `registry`
    pub fn create(&self, registry: &Registry) -> ApiResult<Arc<dyn Adapter>> {
        let (factory, _) = self.factories.get(&registry.registry_type).ok_or_else(|| ApiError::not_found(format!("no adapter factory for registry type {}", registry.registry_type)))?;
        factory(registry)
    }

    pub fn info(&self, registry_type: &str) -> Option<&AdapterInfo> {
        self.factories.get(registry_type).map(|(_, info)| info)
    }

    /// Registered types, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[async_trait]
    impl Adapter for Dummy {
        fn info(&self) -> AdapterInfo {
            dummy_info()
        }

        async fn list_namespaces(&self, _query: &NamespaceQuery) -> ApiResult<Vec<Namespace>> {
            Ok(vec![])
        }

        async fn get_namespace(&self, name: &str) -> ApiResult<Namespace> {
            Ok(Namespace::new(name))
        }

        async fn create_namespace(&self, _namespace: &Namespace) -> ApiResult<()> {
            Ok(())
        }

        async fn fetch_resources(&self, _namespaces: &[String], _filters: &[Filter]) -> ApiResult<Vec<Resource>> {
            Ok(vec![])
        }

        async fn health_check(&self) -> ApiResult<HealthStatus> {
            Ok(HealthStatus::Healthy)
        }
    }

    fn dummy_info() -> AdapterInfo {
        AdapterInfo {
            registry_type: "dummy".to_string(),
            supported_resource_types: vec![ResourceType::Image],
            supported_resource_filters: vec![],
            supported_triggers: vec![TriggerType::Manual],
        }
    }

    fn registry(registry_type: &str) -> Registry {
        Registry { id: 1, name: "r".to_string(), registry_type: registry_type.to_string(), url: "http://r".to_string(), credential: None, insecure: false }
    }

    #[test]
    fn test_register_and_create() {
        let mut adapters = AdapterRegistry::new();
        adapters.register(dummy_info(), Arc::new(|_: &Registry| Ok(Arc::new(Dummy) as Arc<dyn Adapter>))).unwrap();

        assert_eq!(adapters.types(), vec!["dummy"]);
        assert!(adapters.create(&registry("dummy")).is_ok());
        assert!(matches!(adapters.create(&registry("other")), Err(ApiError::NotFound { .. })));
        assert!(adapters.info("dummy").is_some());
        assert!(Dummy.as_image_registry().is_none());
    }

    #[test]
    fn test_double_registration_fails() {
        let mut adapters = AdapterRegistry::new();
        adapters.register(dummy_info(), Arc::new(|_: &Registry| Ok(Arc::new(Dummy) as Arc<dyn Adapter>))).unwrap();
        let again = adapters.register(dummy_info(), Arc::new(|_: &Registry| Ok(Arc::new(Dummy) as Arc<dyn Adapter>)));
        assert!(matches!(again, Err(ApiError::Conflict { .. })));
    }
}
