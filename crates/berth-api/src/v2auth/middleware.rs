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

//! Authorization middleware in front of the registry v2 API

use crate::body::{GatewayBody, full_response};
use crate::error::ApiError;
use crate::rbac::{ProjectController, roles};
use crate::security::{SecurityContext, security_context};
use crate::v2auth::challenge::ChallengeConfig;
use crate::v2auth::request::{Access, Target, access_list};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, StatusCode};
use metrics::counter;
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::{debug, warn};

pub const API_VERSION_HEADER: &str = "Docker-Distribution-Api-Version";
pub const API_VERSION: &str = "registry/2.0";

/// Decides whether a v2 request may reach the registry
pub struct RequestChecker {
    projects: Arc<dyn ProjectController>,
    challenges: ChallengeConfig,
}

impl RequestChecker {
    pub fn new(projects: Arc<dyn ProjectController>, challenges: ChallengeConfig) -> Self {
        Self { projects, challenges }
    }

    /// `Ok(())` when the request may proceed, otherwise the challenge to send back
    pub async fn check(&self, req: &Parts, ctx: &SecurityContext) -> Result<(), String> {
        let target = Target::classify(&req.method, req.uri.path(), req.uri.query());
        let accesses = access_list(&target, &req.method);

        let denial = self.denial_reason(req, ctx, &target, &accesses).await;
        match denial {
            None => {
                debug!(user = %ctx.username(), method = %req.method, path = %req.uri.path(), "v2 request permitted");
                Ok(())
            }
            Some(reason) => {
                warn!(user = %ctx.username(), method = %req.method, path = %req.uri.path(), reason = %reason, "v2 request denied");
                Err(self.challenges.challenge(&req.headers, &target, &accesses))
            }
        }
    }

    async fn denial_reason(&self, req: &Parts, ctx: &SecurityContext, target: &Target, accesses: &[Access]) -> Option<String> {
        if let Some(rejection) = ctx.rejection() {
            return Some(format!("credentials rejected: {}", rejection));
        }

        match target {
            Target::Login if !ctx.is_authenticated() => Some("login requires authentication".to_string()),
            Target::Login => None,
            Target::Catalog if !ctx.is_sysadmin() => Some("catalog requires a system administrator".to_string()),
            Target::Catalog => None,
            Target::Unknown => (!ctx.is_authenticated()).then(|| "unrecognized request requires authentication".to_string()),
            Target::Repository(_) if accesses.is_empty() => (!ctx.is_authenticated()).then(|| "unsupported method requires authentication".to_string()),
            Target::Repository(_) => {
                if req.method == Method::HEAD && !req.headers.contains_key(AUTHORIZATION) {
                    return Some("HEAD without credentials".to_string());
                }
                for access in accesses {
                    if let Some(reason) = self.check_access(ctx, access).await {
                        return Some(reason);
                    }
                }
                None
            }
        }
    }

    async fn check_access(&self, ctx: &SecurityContext, access: &Access) -> Option<String> {
        let project = match self.projects.get_by_name(&access.project_name).await {
            Ok(Some(project)) => project,
            Ok(None) => return Some(format!("project {} not found", access.project_name)),
            Err(e) => return Some(format!("failed to look up project {}: {}", access.project_name, e)),
        };

        let resource = roles::project_resource(project.project_id, roles::RESOURCE_REPOSITORY);
        if ctx.can(access.action, &resource).await { None } else { Some(format!("{} denied on {}", access.action, access.repository)) }
    }
}

/// 401 response carrying a challenge in the registry's error format
pub fn unauthorized_response(challenge: &str) -> Result<Response<Full<Bytes>>, ApiError> {
    let body = serde_json::json!({
        "errors": [{ "code": "UNAUTHORIZED", "message": "unauthorized to access repository", "detail": null }]
    });

    Ok(Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(WWW_AUTHENTICATE, challenge)
        .header(API_VERSION_HEADER, API_VERSION)
        .header(CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Full::new(Bytes::from(serde_json::to_vec(&body)?)))?)
}

/// Whether a path belongs to the registry v2 API
pub fn is_v2_path(path: &str) -> bool {
    path == "/v2" || path.starts_with("/v2/")
}

/// Middleware enforcing registry permissions on `/v2/` requests
#[derive(Clone)]
pub struct V2AuthMiddleware<S> {
    inner: S,
    checker: Arc<RequestChecker>,
}

impl<S, B> Service<Request<B>> for V2AuthMiddleware<S>
where
    S: Service<Request<B>, Response = Response<GatewayBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: Send + 'static,
{
    type Response = Response<GatewayBody>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let checker = self.checker.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !is_v2_path(req.uri().path()) {
                return inner.call(req).await.map_err(Into::into);
            }

            let ctx = match security_context(&req) {
                Ok(ctx) => ctx,
                Err(e) => return Ok(full_response(Response::from(e))),
            };

            // Only the head is borrowed across the check; the body stays owned
            let (parts, body) = req.into_parts();
            match checker.check(&parts, &ctx).await {
                Ok(()) => {
                    counter!("berth_v2_requests_total", 1, "decision" => "allow");
                    inner.call(Request::from_parts(parts, body)).await.map_err(Into::into)
                }
                Err(challenge) => {
                    counter!("berth_v2_requests_total", 1, "decision" => "deny");
                    Ok(full_response(unauthorized_response(&challenge).unwrap_or_else(Response::from)))
                }
            }
        })
    }
}

/// Layer producing [`V2AuthMiddleware`]
#[derive(Clone)]
pub struct V2AuthLayer {
    checker: Arc<RequestChecker>,
}

impl V2AuthLayer {
    pub fn new(checker: Arc<RequestChecker>) -> Self {
        Self { checker }
    }
}

impl<S> Layer<S> for V2AuthLayer {
    type Service = V2AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        V2AuthMiddleware { inner, checker: self.checker.clone() }
    }
}
