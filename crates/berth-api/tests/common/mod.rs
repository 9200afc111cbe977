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

#![allow(dead_code)]

use async_trait::async_trait;
use berth_api::auth::{Credentials, InMemoryUserDirectory};
use berth_api::body::full;
use berth_api::config::Config;
use berth_api::error::{ApiError, ApiResult};
use berth_api::handlers::registry::RegistryProxy;
use berth_api::rbac::roles::{ROLE_DEVELOPER, ROLE_GUEST, ROLE_PROJECT_ADMIN};
use berth_api::rbac::{InMemoryProjectController, NamespaceRegistry, PatternStore, Project, RbacSystem};
use berth_api::replication::adapter::{Adapter, AdapterInfo, AdapterRegistry, HealthStatus};
use berth_api::replication::filter::filter_resources;
use berth_api::replication::native;
use berth_api::replication::model::{Filter, Namespace, NamespaceQuery, Registry, ReplicationPolicy, Resource, ResourceType, Trigger, TriggerType};
use berth_api::replication::scheduler::{JobData, JobSubmitter};
use berth_api::replication::store::{PolicyManager, RegistryManager};
use berth_api::replication::{InMemoryExecutionManager, InMemoryPolicyManager, InMemoryRegistryManager, ReplicationController, Scheduler, TriggerManager, local_registry};
use berth_api::retry::RetryConfig;
use berth_api::router::Router;
use berth_api::security::Authenticator;
use berth_api::server::{GatewayService, gateway_service};
use berth_api::token::{TokenService, TokenSigner};
use berth_api::v2auth::{ChallengeConfig, RequestChecker};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceExt;

pub const PRIVATE_KEY: &[u8] = include_bytes!("../fixtures/private_key.pem");
pub const PUBLIC_KEY: &[u8] = include_bytes!("../fixtures/public_key.pem");
pub const SECRET: &str = "s3cret";
pub const SERVICE: &str = "harbor-registry";

/// Adapter serving a fixed set of resources and recording created namespaces
///
/// With a gate set, resource discovery waits until the gate is notified.
#[derive(Default)]
pub struct FakeAdapter {
    pub resources: Vec<Resource>,
    pub namespaces: Mutex<Vec<String>>,
    pub gate: Option<Arc<Notify>>,
}

pub fn fake_info() -> AdapterInfo {
    AdapterInfo {
        registry_type: "fake".to_string(),
        supported_resource_types: vec![ResourceType::Image],
        supported_resource_filters: vec![],
        supported_triggers: vec![TriggerType::Manual],
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn info(&self) -> AdapterInfo {
        fake_info()
    }

    async fn list_namespaces(&self, _query: &NamespaceQuery) -> ApiResult<Vec<Namespace>> {
        Ok(self.namespaces.lock().iter().map(Namespace::new).collect())
    }

    async fn get_namespace(&self, name: &str) -> ApiResult<Namespace> {
        let mut namespace = Namespace::new(name);
        namespace.metadata.insert("public".to_string(), serde_json::json!(true));
        Ok(namespace)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> ApiResult<()> {
        let mut namespaces = self.namespaces.lock();
        if !namespaces.contains(&namespace.name) {
            namespaces.push(namespace.name.clone());
        }
        Ok(())
    }

    async fn fetch_resources(&self, namespaces: &[String], filters: &[Filter]) -> ApiResult<Vec<Resource>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let in_scope = self.resources.iter().filter(|r| namespaces.is_empty() || namespaces.iter().any(|ns| ns == r.namespace())).cloned().collect();
        filter_resources(in_scope, filters)
    }

    async fn health_check(&self) -> ApiResult<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }
}

/// Job service double: records submissions, optionally failing every one
#[derive(Default)]
pub struct FakeSubmitter {
    pub fail: bool,
    pub submitted: Mutex<Vec<JobData>>,
    pub stopped: Mutex<Vec<String>>,
}

#[async_trait]
impl JobSubmitter for FakeSubmitter {
    async fn submit(&self, job: &JobData) -> ApiResult<String> {
        if self.fail {
            return Err(ApiError::retryable("job service unavailable"));
        }
        let mut submitted = self.submitted.lock();
        submitted.push(job.clone());
        Ok(format!("job-{}", submitted.len()))
    }

    async fn stop(&self, job_id: &str) -> ApiResult<()> {
        self.stopped.lock().push(job_id.to_string());
        Ok(())
    }
}

/// Replication wiring; the local registry is served by the source adapter
pub struct Replication {
    pub controller: Arc<ReplicationController>,
    pub triggers: Arc<TriggerManager>,
    pub source: Arc<FakeAdapter>,
    pub destination: Arc<FakeAdapter>,
    pub submitter: Arc<FakeSubmitter>,
    pub src_registry_id: i64,
    pub dst_registry_id: i64,
}

/// Controller wired to fake source and destination registries
pub async fn replication(resources: Vec<Resource>, submitter: FakeSubmitter) -> Replication {
    replication_from(FakeAdapter { resources, ..Default::default() }, submitter).await
}

/// Controller replicating out of the given source adapter
pub async fn replication_from(source: FakeAdapter, submitter: FakeSubmitter) -> Replication {
    let source = Arc::new(source);
    let destination = Arc::new(FakeAdapter::default());
    let submitter = Arc::new(submitter);

    let mut adapters = AdapterRegistry::new();
    let (src, dst) = (source.clone(), destination.clone());
    adapters
        .register(
            fake_info(),
            Arc::new(move |registry: &Registry| -> ApiResult<Arc<dyn Adapter>> {
                let adapter: Arc<dyn Adapter> = if registry.name == "srcReg" { src.clone() } else { dst.clone() };
                Ok(adapter)
            }),
        )
        .unwrap();
    native::register(&mut adapters, 50.0, 50, Duration::from_secs(5)).unwrap();

    let registries = Arc::new(InMemoryRegistryManager::new());
    let src_registry_id = registries.add(fake_registry("srcReg")).await.unwrap();
    let dst_registry_id = registries.add(fake_registry("dstReg")).await.unwrap();

    let controller = Arc::new(ReplicationController::new(
        Arc::new(InMemoryPolicyManager::new()),
        registries,
        Arc::new(adapters),
        Arc::new(InMemoryExecutionManager::new()),
        Arc::new(Scheduler::new(submitter.clone(), "http://core:8080")),
        fake_registry("srcReg"),
    ));
    let triggers = Arc::new(TriggerManager::new(controller.clone()));

    Replication { controller, triggers, source, destination, submitter, src_registry_id, dst_registry_id }
}

impl Replication {
    /// Policy copying `library` from `srcReg` into `mirror` on `dstReg`
    pub async fn mirror_policy(&self) -> i64 {
        let mut policy = ReplicationPolicy::new("mirror-library");
        policy.src_registry_id = Some(self.src_registry_id);
        policy.src_namespaces = vec!["library".to_string()];
        policy.dest_registry_id = Some(self.dst_registry_id);
        policy.dest_namespace = "mirror".to_string();
        self.controller.policies().create(policy).await.unwrap()
    }

    /// Policy copying pushes to `library` on the local registry into `mirror` on `dstReg`
    pub async fn event_policy(&self) -> i64 {
        let mut policy = ReplicationPolicy::new("on-push");
        policy.src_namespaces = vec!["library".to_string()];
        policy.dest_registry_id = Some(self.dst_registry_id);
        policy.dest_namespace = "mirror".to_string();
        policy.trigger = Some(Trigger { trigger_type: TriggerType::EventBased, settings: None });
        self.controller.policies().create(policy).await.unwrap()
    }
}

pub fn fake_registry(name: &str) -> Registry {
    Registry { id: 0, name: name.to_string(), registry_type: "fake".to_string(), url: format!("https://{}.example.com", name), credential: None, insecure: false }
}

/// Upstream registry double answering 200 to everything
pub async fn spawn_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let service = service_fn(|_req: Request<Incoming>| async move {
                    Ok::<_, Infallible>(Response::builder().status(200).header("x-upstream", "registry").body(Full::new(Bytes::from_static(b"{}"))).unwrap())
                });
                let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
            });
        }
    });

    format!("http://{}", addr)
}

pub struct Gateway {
    pub service: GatewayService,
    pub signer: Arc<TokenSigner>,
    pub projects: Arc<InMemoryProjectController>,
    pub replication: Replication,
}

/// Full gateway stack over in-memory collaborators
///
/// Projects: `library` (1, public), `test` (2, private), `p1` (3, private), `p3` (4, private).
/// Users: `admin` (system administrator), `alice` (project admin of library, developer of p1),
/// `bob` (guest of library), `carol` (developer of library). Every password is `pw`.
pub async fn gateway(replication: Replication) -> Gateway {
    let upstream = spawn_upstream().await;
    let config = Config {
        registry_url: upstream.clone(),
        external_endpoint: "https://reg.example.com".to_string(),
        internal_secret: Some(SECRET.to_string()),
        ..Config::default()
    };

    let projects = Arc::new(InMemoryProjectController::new());
    projects.add_project(Project::new(1, "library", true));
    projects.add_project(Project::new(2, "test", false));
    projects.add_project(Project::new(3, "p1", false));
    projects.add_project(Project::new(4, "p3", false));

    let users = Arc::new(InMemoryUserDirectory::new());
    users.add_user("admin", "pw", true).unwrap();
    let alice = users.add_user("alice", "pw", false).unwrap();
    let bob = users.add_user("bob", "pw", false).unwrap();
    let carol = users.add_user("carol", "pw", false).unwrap();
    projects.add_member(1, alice.user_id, ROLE_PROJECT_ADMIN);
    projects.add_member(3, alice.user_id, ROLE_DEVELOPER);
    projects.add_member(1, bob.user_id, ROLE_GUEST);
    projects.add_member(1, carol.user_id, ROLE_DEVELOPER);

    let signer = Arc::new(TokenSigner::from_pem(&config.token_issuer, PRIVATE_KEY, PUBLIC_KEY).unwrap());
    let rbac = RbacSystem::new(Arc::new(NamespaceRegistry::with_builtins().unwrap()), projects.clone(), Arc::new(PatternStore::new()));
    let authenticator = Arc::new(Authenticator::new(users, rbac, signer.clone(), SERVICE, config.internal_secret.clone()));
    let tokens = Arc::new(TokenService::new(signer.clone(), projects.clone(), config.token_expiration_minutes));
    let checker = Arc::new(RequestChecker::new(projects.clone(), ChallengeConfig::from_config(&config)));

    let proxy = RegistryProxy::new(&upstream, Duration::from_secs(5)).unwrap();
    let retry = RetryConfig { budget: Duration::from_millis(200), ..RetryConfig::default() };
    let router = Arc::new(Router::new(tokens, replication.triggers.clone(), proxy, SERVICE, local_registry(&config), retry));

    Gateway { service: gateway_service(router, authenticator, checker), signer, projects, replication }
}

pub fn basic(user: &str, password: &str) -> String {
    Credentials::Basic { username: user.to_string(), password: password.to_string() }.to_header().unwrap()
}

pub fn secret() -> String {
    Credentials::Secret(SECRET.to_string()).to_header().unwrap()
}

pub fn request(method: &str, uri: &str, authorization: Option<&str>, body: &str) -> Request<Full<Bytes>> {
    let mut builder = Request::builder().method(method).uri(uri).header("host", "reg.example.com");
    if let Some(authorization) = authorization {
        builder = builder.header("authorization", authorization);
    }
    builder.body(Full::new(Bytes::from(body.to_string()))).unwrap()
}

pub async fn send(service: &GatewayService, req: Request<Full<Bytes>>) -> (Response<Full<Bytes>>, Bytes) {
    let response = service.clone().oneshot(req.map(full)).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    (Response::from_parts(parts, Full::new(bytes.clone())), bytes)
}
