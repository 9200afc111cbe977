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

//! HTTP server implementation using Hyper

use crate::auth::InMemoryUserDirectory;
use crate::body::{BoxError, GatewayBody, boxed, full_response};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::handlers::registry::RegistryProxy;
use crate::middleware::LoggingLayer;
use crate::rbac::{InMemoryProjectController, Project, RbacSystem};
use crate::replication::scheduler::HttpJobSubmitter;
use crate::replication::{AdapterRegistry, InMemoryExecutionManager, InMemoryPolicyManager, InMemoryRegistryManager, ReplicationController, Scheduler, TriggerManager, local_registry, native};
use crate::retry::RetryConfig;
use crate::router::Router;
use crate::security::{Authenticator, SecurityLayer};
use crate::token::{TokenService, TokenSigner};
use crate::v2auth::{ChallengeConfig, RequestChecker, V2AuthLayer};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use tracing::{error, info};

/// The gateway as a tower service over streaming bodies
pub type GatewayService = BoxCloneService<Request<GatewayBody>, Response<GatewayBody>, BoxError>;

/// Stack logging, authentication and the v2 access check in front of the router
pub fn gateway_service(router: Arc<Router>, authenticator: Arc<Authenticator>, checker: Arc<RequestChecker>) -> GatewayService {
    let service = ServiceBuilder::new()
        .layer(LoggingLayer::new())
        .layer(SecurityLayer::new(authenticator))
        .layer(V2AuthLayer::new(checker))
        .service(tower::service_fn(move |req: Request<GatewayBody>| {
            let router = router.clone();
            let fut: Pin<Box<dyn Future<Output = Result<Response<GatewayBody>, Infallible>> + Send>> = Box::pin(async move {
                match router.route(req).await {
                    Ok(response) => Ok::<_, Infallible>(response),
                    Err(e) => Ok(full_response(Response::from(e))),
                }
            });
            fut
        }));
    BoxCloneService::new(service)
}

/// API server using Hyper
pub struct ApiServer {
    bind_address: SocketAddr,
    service: GatewayService,
}

impl ApiServer {
    /// Wire every component from the configuration
    pub async fn new(config: Config) -> ApiResult<Self> {
        config.validate()?;
        let bind_address: SocketAddr = config.bind_address.parse().map_err(|e| ApiError::invalid_argument(format!("Invalid bind address: {}", e)))?;
        let timeout = config.request_timeout();

        let signer = Arc::new(TokenSigner::from_files(&config.token_issuer, &config.private_key_path, &config.public_key_path)?);

        let projects = Arc::new(InMemoryProjectController::new());
        projects.add_project(Project::new(1, "library", true));

        let users = Arc::new(InMemoryUserDirectory::new());
        if let Some(password) = &config.admin_password {
            users.add_user("admin", password, true)?;
        }

        let rbac = RbacSystem::initialize(&config, projects.clone(), Vec::new())?;
        let authenticator = Arc::new(Authenticator::new(users, rbac, signer.clone(), config.registry_service.clone(), config.internal_secret.clone()));
        let tokens = Arc::new(TokenService::new(signer, projects.clone(), config.token_expiration_minutes));
        let checker = Arc::new(RequestChecker::new(projects, ChallengeConfig::from_config(&config)));

        let mut adapters = AdapterRegistry::new();
        native::register(&mut adapters, config.registry_rate_limit, config.registry_rate_burst, timeout)?;

        let submitter = Arc::new(HttpJobSubmitter::new(&config.jobservice_url, config.internal_secret.clone(), timeout)?);
        let local = local_registry(&config);
        let controller = Arc::new(ReplicationController::new(
            Arc::new(InMemoryPolicyManager::new()),
            Arc::new(InMemoryRegistryManager::new()),
            Arc::new(adapters),
            Arc::new(InMemoryExecutionManager::new()),
            Arc::new(Scheduler::new(submitter, &config.core_url)),
            local.clone(),
        ));

        let triggers = Arc::new(TriggerManager::new(controller));
        triggers.start_all().await?;

        let proxy = RegistryProxy::new(&config.registry_url, timeout)?;
        let health_retry = RetryConfig { budget: timeout, ..RetryConfig::default() };
        let router = Arc::new(Router::new(tokens, triggers, proxy, config.registry_service.clone(), local, health_retry));

        info!("API server created for registry {}", config.registry_url);

        Ok(Self { bind_address, service: gateway_service(router, authenticator, checker) })
    }

    /// Get the bind address
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Start the server
    pub async fn run(self) -> ApiResult<()> {
        let listener = TcpListener::bind(self.bind_address).await?;

        info!("Registry gateway listening on http://{}", self.bind_address);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let gateway = self.service.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let gateway = gateway.clone();
                    let fut: Pin<Box<dyn Future<Output = Result<Response<GatewayBody>, BoxError>> + Send>> = Box::pin(gateway.oneshot(req.map(boxed)));
                    fut
                });

                let conn: Pin<Box<dyn Future<Output = Result<(), hyper::Error>> + Send>> = Box::pin(http1::Builder::new().serve_connection(io, service));
                if let Err(err) = conn.await {
                    error!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}
