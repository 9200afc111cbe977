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

//! HTTP routing for the registry gateway

use crate::body::{GatewayBody, buffer, full_response};
use crate::error::{ApiError, ApiResult};
use crate::handlers::registry::RegistryProxy;
use crate::handlers::{health, parse_id, replication, token};
use crate::replication::{Registry, ReplicationController, TriggerManager};
use crate::retry::RetryConfig;
use crate::token::TokenService;
use crate::v2auth::middleware::is_v2_path;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP router for the gateway
pub struct Router {
    tokens: Arc<TokenService>,
    triggers: Arc<TriggerManager>,
    controller: Arc<ReplicationController>,
    proxy: RegistryProxy,
    registry_service: String,
    local: Registry,
    health_retry: RetryConfig,
}

impl Router {
    pub fn new(tokens: Arc<TokenService>, triggers: Arc<TriggerManager>, proxy: RegistryProxy, registry_service: impl Into<String>, local: Registry, health_retry: RetryConfig) -> Self {
        let controller = triggers.controller().clone();
        Self { tokens, triggers, controller, proxy, registry_service: registry_service.into(), local, health_retry }
    }

    /// Route a request to the appropriate handler
    ///
    /// Registry traffic streams through the proxy; API requests are buffered first.
    pub async fn route(&self, req: Request<GatewayBody>) -> Result<Response<GatewayBody>, ApiError> {
        debug!("Routing request: {} {}", req.method(), req.uri().path());

        if is_v2_path(req.uri().path()) {
            let forward: Pin<Box<dyn Future<Output = ApiResult<Response<GatewayBody>>> + Send + '_>> = Box::pin(self.proxy.forward(req));
            return forward.await;
        }

        let req = buffer(req).await?;
        self.route_api(req).await.map(full_response)
    }

    async fn route_api(&self, req: Request<Full<Bytes>>) -> ApiResult<Response<Full<Bytes>>> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        match (&method, path.as_str()) {
            (&Method::GET, "/service/token") => token::issue_token(req, &self.tokens, &self.registry_service).await,
            (&Method::GET, "/api/v2.0/health") => health::health_check(&self.controller, &self.local, &self.health_retry).await,
            (&Method::POST, replication::EXECUTIONS_PATH) => replication::start_execution(req, &self.controller).await,
            (&Method::GET, replication::EXECUTIONS_PATH) => replication::list_executions(req, &self.controller).await,
            (&Method::POST, replication::REGISTRY_EVENTS_PATH) => replication::registry_events(req, &self.triggers).await,
            _ => self.handle_dynamic_routes(req).await,
        }
    }

    /// Handle routes with path parameters
    async fn handle_dynamic_routes(&self, req: Request<Full<Bytes>>) -> ApiResult<Response<Full<Bytes>>> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();

        match (&method, segments.as_slice()) {
            (&Method::GET, ["", "api", "v2.0", "replication", "executions", id]) => replication::get_execution(req, parse_id(id)?, &self.controller).await,
            (&Method::PUT, ["", "api", "v2.0", "replication", "executions", id]) => replication::stop_execution(req, parse_id(id)?, &self.controller).await,
            (&Method::DELETE, ["", "api", "v2.0", "replication", "executions", id]) => replication::delete_execution(req, parse_id(id)?, &self.controller).await,
            (&Method::GET, ["", "api", "v2.0", "replication", "executions", id, "tasks"]) => replication::list_tasks(req, parse_id(id)?, &self.controller).await,
            (&Method::POST, ["", "service", "notifications", "jobs", "replication", "task", id]) => replication::task_status_hook(req, parse_id(id)?, &self.controller).await,
            _ => {
                warn!("Route not found: {} {}", method, path);
                Err(ApiError::not_found(format!("Route not found: {} {}", method, path)))
            }
        }
    }
}
