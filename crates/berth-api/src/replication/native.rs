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

//! Adapter for registries speaking the Docker Registry HTTP API v2

use crate::auth::SECRET_SCHEME;
use crate::error::{ApiError, ApiResult};
use crate::rate_limiting::{TokenBucket, check_rate};
use crate::replication::adapter::{Adapter, AdapterInfo, AdapterRegistry, FilterCapability, FilterStyle, HealthStatus, ImageRegistry, Manifest, USER_AGENT};
use crate::replication::filter::{filter_resources, glob_match};
use crate::replication::model::{CredentialType, Filter, FilterType, Namespace, NamespaceQuery, Registry, Repository, Resource, ResourceMetadata, ResourceType, TriggerType};
use crate::retry::classify_status;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::stream::{self, StreamExt, TryStreamExt};
use hyper::body::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Registry type the adapter is registered under
pub const REGISTRY_TYPE: &str = "docker-registry";

const DIGEST_HEADER: &str = "Docker-Content-Digest";
const CATALOG_PAGE_SIZE: usize = 100;
const MAX_CONCURRENCY: usize = 16;

#[derive(Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Capabilities of plain v2 registries
pub fn adapter_info() -> AdapterInfo {
    AdapterInfo {
        registry_type: REGISTRY_TYPE.to_string(),
        supported_resource_types: vec![ResourceType::Image],
        supported_resource_filters: vec![
            FilterCapability { filter_type: FilterType::Name, style: FilterStyle::Text },
            FilterCapability { filter_type: FilterType::Tag, style: FilterStyle::Text },
        ],
        supported_triggers: vec![TriggerType::Manual, TriggerType::Scheduled],
    }
}

/// Register the native adapter; every adapter it creates shares one rate limiter per registry
pub fn register(adapters: &mut AdapterRegistry, rate: f64, burst: u32, timeout: Duration) -> ApiResult<()> {
    check_rate(rate)?;
    let limiters: Arc<DashMap<i64, Arc<TokenBucket>>> = Arc::new(DashMap::new());
    adapters.register(
        adapter_info(),
        Arc::new(move |registry: &Registry| {
            let limiter = match limiters.entry(registry.id) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => entry.insert(Arc::new(TokenBucket::new(rate, burst)?)).clone(),
            };
            Ok(Arc::new(NativeAdapter::new(registry.clone(), limiter, timeout)?) as Arc<dyn Adapter>)
        }),
    )
}

/// Parse the parameters of a `Bearer` challenge
pub fn parse_bearer_challenge(header: &str) -> Option<HashMap<String, String>> {
    let params = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer "))?;
    let mut out = HashMap::new();
    let mut rest = params.trim();

    while !rest.is_empty() {
        let (key, after) = rest.split_once('=')?;
        let (value, remaining) = match after.strip_prefix('"') {
            Some(quoted) => {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            }
            None => after.split_once(',').unwrap_or((after, "")),
        };
        out.insert(key.trim().to_ascii_lowercase(), value.to_string());
        rest = remaining.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
    }

    Some(out)
}

/// Target of the `next` relation in a `Link` header
fn next_link(header: &str) -> Option<String> {
    header.split(',').find(|part| part.contains("rel=\"next\"")).and_then(|part| {
        let start = part.find('<')? + 1;
        let end = part.find('>')?;
        Some(part[start..end].to_string())
    })
}

fn is_digest(reference: &str) -> bool {
    reference.contains(':')
}

fn repository_scope(repository: &str, actions: &str) -> String {
    format!("repository:{}:{}", repository, actions)
}

/// Adapter talking to one v2 registry
pub struct NativeAdapter {
    registry: Registry,
    base_url: String,
    client: reqwest::Client,
    limiter: Arc<TokenBucket>,
    tokens: DashMap<String, String>,
}

impl NativeAdapter {
    pub fn new(registry: Registry, limiter: Arc<TokenBucket>, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).timeout(timeout).danger_accept_invalid_certs(registry.insecure).build()?;
        let base_url = registry.url.trim_end_matches('/').to_string();
        Ok(Self { registry, base_url, client, limiter, tokens: DashMap::new() })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn has_credential(&self) -> bool {
        self.registry.credential.as_ref().is_some_and(|c| !c.access_key.is_empty() || !c.access_secret.is_empty())
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") { path.to_string() } else { format!("{}{}", self.base_url, path) }
    }

    fn authorize(&self, builder: RequestBuilder, scope: &str) -> RequestBuilder {
        if let Some(token) = self.tokens.get(scope) {
            return builder.bearer_auth(token.value());
        }
        match &self.registry.credential {
            Some(c) if c.credential_type == CredentialType::Secret && !c.access_secret.is_empty() => builder.header(reqwest::header::AUTHORIZATION, format!("{} {}", SECRET_SCHEME, c.access_secret)),
            Some(c) if !c.access_key.is_empty() => builder.basic_auth(&c.access_key, Some(&c.access_secret)),
            _ => builder,
        }
    }

    /// Exchange credentials for a bearer token at the realm named by a challenge
    async fn fetch_token(&self, challenge: &HashMap<String, String>, scope: &str) -> ApiResult<String> {
        let realm = challenge.get("realm").ok_or_else(|| ApiError::unauthorized("bearer challenge without realm"))?;
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(service) = challenge.get("service") {
            query.push(("service", service));
        }
        if !scope.is_empty() {
            query.push(("scope", scope));
        }

        let mut request = self.client.get(realm).query(&query);
        if let Some(c) = &self.registry.credential {
            if c.credential_type == CredentialType::Basic && !c.access_key.is_empty() {
                request = request.basic_auth(&c.access_key, Some(&c.access_secret));
            }
        }

        self.limiter.take().await;
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), format!("token request to {} failed", realm)));
        }
        let body: TokenBody = response.json().await?;
        body.token.or(body.access_token).ok_or_else(|| ApiError::unauthorized("token response carried no token"))
    }

    /// Send a request, answering one bearer challenge if the registry issues it
    async fn send<F>(&self, method: Method, path: &str, scope: &str, build: F) -> ApiResult<reqwest::Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path);

        self.limiter.take().await;
        let response = build(self.authorize(self.client.request(method.clone(), &url), scope)).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response.headers().get(WWW_AUTHENTICATE).and_then(|h| h.to_str().ok()).and_then(parse_bearer_challenge) else {
            return Ok(response);
        };
        let token = self.fetch_token(&challenge, scope).await?;
        self.tokens.insert(scope.to_string(), token.clone());
        debug!(registry = %self.registry.name, scope = %scope, "Obtained registry token");

        self.limiter.take().await;
        Ok(build(self.client.request(method, &url).bearer_auth(token)).send().await?)
    }

    async fn expect_success(response: reqwest::Response, what: &str) -> ApiResult<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_status(response.status(), format!("{} failed with status {}", what, response.status())))
        }
    }

    /// Every repository listed by the catalog, following pagination
    pub async fn catalog(&self) -> ApiResult<Vec<String>> {
        let mut repositories = Vec::new();
        let mut next = Some(format!("/v2/_catalog?n={}", CATALOG_PAGE_SIZE));

        while let Some(path) = next.take() {
            let response = Self::expect_success(self.send(Method::GET, &path, "registry:catalog:*", |b| b).await?, "catalog").await?;
            next = response.headers().get(LINK).and_then(|h| h.to_str().ok()).and_then(next_link);
            let page: CatalogPage = response.json().await?;
            repositories.extend(page.repositories);
        }

        Ok(repositories)
    }

    pub async fn list_tags(&self, repository: &str) -> ApiResult<Vec<String>> {
        let path = format!("/v2/{}/tags/list", repository);
        let response = self.send(Method::GET, &path, &repository_scope(repository, "pull"), |b| b).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let list: TagList = Self::expect_success(response, "tag listing").await?.json().await?;
        Ok(list.tags.unwrap_or_default())
    }

    /// Whether the registry answers on `/v2/`
    pub async fn ping(&self) -> ApiResult<bool> {
        let response = self.send(Method::GET, "/v2/", "", |b| b).await?;
        let status = response.status();
        Ok(status.is_success() || (status == StatusCode::UNAUTHORIZED && !self.has_credential()))
    }
}

#[async_trait]
impl Adapter for NativeAdapter {
    fn info(&self) -> AdapterInfo {
        adapter_info()
    }

    async fn list_namespaces(&self, query: &NamespaceQuery) -> ApiResult<Vec<Namespace>> {
        let names: BTreeSet<String> = self.catalog().await?.iter().filter_map(|r| r.split_once('/').map(|(ns, _)| ns.to_string())).collect();
        Ok(names.into_iter().filter(|n| query.name.as_ref().is_none_or(|q| n.contains(q.as_str()))).map(Namespace::new).collect())
    }

    async fn get_namespace(&self, name: &str) -> ApiResult<Namespace> {
        Ok(Namespace::new(name))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> ApiResult<()> {
        debug!(namespace = %namespace.name, "Namespaces are implicit on plain registries");
        Ok(())
    }

    async fn fetch_resources(&self, namespaces: &[String], filters: &[Filter]) -> ApiResult<Vec<Resource>> {
        let name_patterns: Vec<&str> = filters.iter().filter(|f| f.filter_type == FilterType::Name).map(|f| f.value.as_str()).collect();

        let mut repositories = Vec::new();
        for repository in self.catalog().await? {
            let in_namespace = namespaces.is_empty() || namespaces.iter().any(|ns| repository.strip_prefix(ns.as_str()).is_some_and(|rest| rest.starts_with('/')));
            if !in_namespace {
                continue;
            }
            let mut matched = true;
            for pattern in &name_patterns {
                matched &= glob_match(pattern, &repository)?;
            }
            if matched {
                repositories.push(repository);
            }
        }

        let resources: Vec<Resource> = stream::iter(repositories)
            .map(|repository| async move {
                let tags = self.list_tags(&repository).await.map_err(|e| ApiError::internal(format!("failed to list tags of {}: {}", repository, e)))?;
                Ok::<_, ApiError>(Resource {
                    resource_type: ResourceType::Image,
                    metadata: ResourceMetadata { repository: Repository { name: repository, metadata: HashMap::new() }, vtags: tags },
                    registry: Some(self.registry.clone()),
                    extended_info: HashMap::new(),
                    deleted: false,
                    override_existing: false,
                })
            })
            .buffer_unordered(MAX_CONCURRENCY)
            .try_filter(|r| futures::future::ready(!r.metadata.vtags.is_empty()))
            .try_collect()
            .await?;

        filter_resources(resources, filters)
    }

    async fn health_check(&self) -> ApiResult<HealthStatus> {
        match self.ping().await {
            Ok(true) => Ok(HealthStatus::Healthy),
            Ok(false) => Ok(HealthStatus::Unhealthy),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                warn!(registry = %self.registry.url, "Failed to ping registry: {}", e);
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_image_registry(&self) -> Option<&dyn ImageRegistry> {
        Some(self)
    }
}

#[async_trait]
impl ImageRegistry for NativeAdapter {
    async fn manifest_exist(&self, repository: &str, reference: &str) -> ApiResult<Option<String>> {
        let path = format!("/v2/{}/manifests/{}", repository, reference);
        let response = self.send(Method::HEAD, &path, &repository_scope(repository, "pull"), |b| b).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success(response, "manifest lookup").await?;
        Ok(Some(response.headers().get(DIGEST_HEADER).and_then(|h| h.to_str().ok()).unwrap_or(reference).to_string()))
    }

    async fn pull_manifest(&self, repository: &str, reference: &str, accepted_media_types: &[&str]) -> ApiResult<Manifest> {
        let path = format!("/v2/{}/manifests/{}", repository, reference);
        let accept = accepted_media_types.join(", ");
        let response = self.send(Method::GET, &path, &repository_scope(repository, "pull"), |b| if accept.is_empty() { b } else { b.header(ACCEPT, accept.as_str()) }).await?;
        let response = Self::expect_success(response, "manifest pull").await?;

        let media_type = response.headers().get(CONTENT_TYPE).and_then(|h| h.to_str().ok()).unwrap_or_default().to_string();
        let digest = response.headers().get(DIGEST_HEADER).and_then(|h| h.to_str().ok()).unwrap_or_default().to_string();
        let payload = response.bytes().await?;
        Ok(Manifest { media_type, digest, payload })
    }

    async fn push_manifest(&self, repository: &str, reference: &str, media_type: &str, payload: Bytes) -> ApiResult<()> {
        let path = format!("/v2/{}/manifests/{}", repository, reference);
        let response = self.send(Method::PUT, &path, &repository_scope(repository, "pull,push"), |b| b.header(CONTENT_TYPE, media_type).body(payload.clone())).await?;
        Self::expect_success(response, "manifest push").await?;
        Ok(())
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> ApiResult<()> {
        let digest = if is_digest(reference) {
            reference.to_string()
        } else {
            match self.manifest_exist(repository, reference).await? {
                Some(digest) => digest,
                None => {
                    debug!(repository = %repository, reference = %reference, "Manifest to delete does not exist");
                    return Ok(());
                }
            }
        };

        let path = format!("/v2/{}/manifests/{}", repository, digest);
        let response = self.send(Method::DELETE, &path, &repository_scope(repository, "delete"), |b| b).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(response, "manifest deletion").await?;
        Ok(())
    }

    async fn blob_exist(&self, repository: &str, digest: &str) -> ApiResult<bool> {
        let path = format!("/v2/{}/blobs/{}", repository, digest);
        let response = self.send(Method::HEAD, &path, &repository_scope(repository, "pull"), |b| b).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(classify_status(status, format!("blob lookup failed with status {}", status))),
        }
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> ApiResult<Bytes> {
        let path = format!("/v2/{}/blobs/{}", repository, digest);
        let response = self.send(Method::GET, &path, &repository_scope(repository, "pull"), |b| b).await?;
        Ok(Self::expect_success(response, "blob pull").await?.bytes().await?)
    }

    async fn push_blob(&self, repository: &str, digest: &str, blob: Bytes) -> ApiResult<()> {
        let scope = repository_scope(repository, "pull,push");
        let path = format!("/v2/{}/blobs/uploads/", repository);
        let started = Self::expect_success(self.send(Method::POST, &path, &scope, |b| b).await?, "blob upload").await?;

        let location = started.headers().get(LOCATION).and_then(|h| h.to_str().ok()).ok_or_else(|| ApiError::internal("blob upload response without location"))?.to_string();
        let separator = if location.contains('?') { '&' } else { '?' };
        let target = format!("{}{}digest={}", location, separator, urlencoding::encode(digest));

        let response = self.send(Method::PUT, &target, &scope, |b| b.header(CONTENT_TYPE, "application/octet-stream").body(blob.clone())).await?;
        Self::expect_success(response, "blob upload completion").await?;
        Ok(())
    }
}
