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

//! Security context of a request: who is calling and what they may do

use crate::auth::{Credentials, User, UserDirectory};
use crate::error::{ApiError, ApiResult};
use crate::rbac::{Action, Evaluator, Policy, ProjectController, RbacSystem, Resource, roles};
use crate::token::scope::ResourceActions;
use crate::token::signer::TokenSigner;
use hyper::header::AUTHORIZATION;
use hyper::{HeaderMap, Request, Response};
use metrics::counter;
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Name reported for callers authenticated by the shared secret
pub const SECRET_SUBJECT: &str = "harbor-internal";

/// Who the caller is
#[derive(Debug, Clone)]
pub enum Subject {
    Anonymous,
    User(User),
    Secret,
    Token { username: String },
}

/// Authenticated subject plus the evaluator deciding its permissions
#[derive(Clone)]
pub struct SecurityContext {
    subject: Subject,
    evaluator: Arc<dyn Evaluator>,
    rejection: Option<String>,
}

impl SecurityContext {
    pub fn new(subject: Subject, evaluator: Arc<dyn Evaluator>) -> Self {
        Self { subject, evaluator, rejection: None }
    }

    /// Anonymous context recording why the presented credentials were refused
    pub fn rejected(evaluator: Arc<dyn Evaluator>, reason: impl Into<String>) -> Self {
        Self { subject: Subject::Anonymous, evaluator, rejection: Some(reason.into()) }
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Username, empty for anonymous callers
    pub fn username(&self) -> &str {
        match &self.subject {
            Subject::Anonymous => "",
            Subject::User(user) => &user.username,
            Subject::Secret => SECRET_SUBJECT,
            Subject::Token { username } => username,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self.subject, Subject::Anonymous)
    }

    pub fn is_sysadmin(&self) -> bool {
        matches!(&self.subject, Subject::User(user) if user.sysadmin)
    }

    pub fn is_secret(&self) -> bool {
        matches!(self.subject, Subject::Secret)
    }

    /// Reason the presented credentials were refused, if they were
    pub fn rejection(&self) -> Option<&str> {
        self.rejection.as_deref()
    }

    pub fn evaluator(&self) -> &Arc<dyn Evaluator> {
        &self.evaluator
    }

    /// Whether the caller may perform `action` on `resource`
    pub async fn can(&self, action: Action, resource: &Resource) -> bool {
        self.evaluator.has_permission(resource, action).await
    }
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext").field("subject", &self.subject).field("rejection", &self.rejection).finish()
    }
}

/// Builds security contexts from request headers
#[derive(Clone)]
pub struct Authenticator {
    users: Arc<dyn UserDirectory>,
    rbac: RbacSystem,
    signer: Arc<TokenSigner>,
    registry_service: String,
    secret: Option<String>,
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserDirectory>, rbac: RbacSystem, signer: Arc<TokenSigner>, registry_service: impl Into<String>, secret: Option<String>) -> Self {
        Self { users, rbac, signer, registry_service: registry_service.into(), secret }
    }

    pub fn rbac(&self) -> &RbacSystem {
        &self.rbac
    }

    /// Context for anonymous callers
    pub fn anonymous(&self) -> SecurityContext {
        SecurityContext::new(Subject::Anonymous, self.rbac.user_evaluator(None, false))
    }

    /// Authenticate the caller from the `Authorization` header
    ///
    /// Missing credentials yield the anonymous context; present but invalid credentials are an error.
    pub async fn authenticate(&self, headers: &HeaderMap) -> ApiResult<SecurityContext> {
        let header = headers.get(AUTHORIZATION).map(|v| v.to_str().map_err(|_| ApiError::unauthorized("authorization header is not valid ASCII"))).transpose()?;

        match Credentials::parse(header)? {
            Credentials::None => Ok(self.anonymous()),
            Credentials::Basic { username, password } => {
                let user = self.users.authenticate(&username, &password).await?.ok_or_else(|| ApiError::unauthorized("invalid username or password"))?;
                debug!(user = %user.username, sysadmin = user.sysadmin, "Authenticated by basic credentials");
                let evaluator = self.rbac.user_evaluator(Some(user.as_local_user()), user.sysadmin);
                Ok(SecurityContext::new(Subject::User(user), evaluator))
            }
            Credentials::Secret(secret) => match &self.secret {
                Some(expected) if *expected == secret => {
                    debug!("Authenticated by shared secret");
                    Ok(SecurityContext::new(Subject::Secret, self.rbac.secret_evaluator(SECRET_SUBJECT)))
                }
                _ => Err(ApiError::unauthorized("invalid secret")),
            },
            Credentials::Bearer(token) => {
                let claims = self.signer.validate(&token, &self.registry_service)?;
                let policies = access_to_policies(self.rbac.projects().as_ref(), &claims.access).await;
                debug!(user = %claims.sub, policies = policies.len(), "Authenticated by registry token");
                let evaluator = self.rbac.policies_evaluator(&claims.sub, policies);
                Ok(SecurityContext::new(Subject::Token { username: claims.sub }, evaluator))
            }
        }
    }

    /// Like [`Authenticator::authenticate`], but never fails: refused credentials produce an anonymous context
    pub async fn resolve(&self, headers: &HeaderMap) -> SecurityContext {
        match self.authenticate(headers).await {
            Ok(ctx) => {
                counter!("berth_authentications_total", 1, "result" => "ok");
                ctx
            }
            Err(e) => {
                warn!("Rejected credentials: {}", e);
                counter!("berth_authentications_total", 1, "result" => "rejected");
                SecurityContext::rejected(self.rbac.user_evaluator(None, false), e.to_string())
            }
        }
    }
}

/// Translate a token's access list into policies on project resources
///
/// Entries naming unknown projects or actions are skipped.
pub async fn access_to_policies(projects: &dyn ProjectController, access: &[ResourceActions]) -> Vec<Policy> {
    let mut policies = Vec::new();

    for entry in access {
        match entry.resource_type.as_str() {
            "repository" => {
                let Some(project_name) = entry.name.split('/').next().filter(|n| !n.is_empty()) else {
                    continue;
                };
                let project = match projects.get_by_name(project_name).await {
                    Ok(Some(project)) => project,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(project = %project_name, "Failed to resolve project for token access: {}", e);
                        continue;
                    }
                };
                let resource = roles::project_resource(project.project_id, roles::RESOURCE_REPOSITORY);
                policies.extend(entry.actions.iter().filter_map(|a| a.parse::<Action>().ok()).map(|action| Policy::new(resource.clone(), action)));
            }
            "registry" if entry.name == "catalog" => {
                let resource = Resource::new(format!("/system/{}", roles::RESOURCE_CATALOG));
                if entry.actions.iter().any(|a| a == "*") {
                    policies.push(Policy::new(resource, Action::Read));
                }
            }
            _ => {}
        }
    }

    policies
}

/// Attaches a [`SecurityContext`] to every request
#[derive(Clone)]
pub struct SecurityMiddleware<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
}

impl<S, B, ResBody> Service<Request<B>> for SecurityMiddleware<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let ctx = authenticator.resolve(req.headers()).await;
            req.extensions_mut().insert(Arc::new(ctx));
            inner.call(req).await.map_err(Into::into)
        })
    }
}

/// Layer producing [`SecurityMiddleware`]
#[derive(Clone)]
pub struct SecurityLayer {
    authenticator: Arc<Authenticator>,
}

impl SecurityLayer {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for SecurityLayer {
    type Service = SecurityMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityMiddleware { inner, authenticator: self.authenticator.clone() }
    }
}

/// Security context attached to a request
pub fn security_context<B>(req: &Request<B>) -> ApiResult<Arc<SecurityContext>> {
    req.extensions().get::<Arc<SecurityContext>>().cloned().ok_or_else(|| ApiError::internal("no security context attached to request"))
}
