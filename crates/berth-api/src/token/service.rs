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

//! Registry token issuance

use crate::error::ApiResult;
use crate::rbac::ProjectController;
use crate::security::SecurityContext;
use crate::token::claims::Claims;
use crate::token::filter::{AccessFilter, RegistryFilter, RepositoryFilter};
use crate::token::scope::{ResourceActions, parse_scopes};
use crate::token::signer::TokenSigner;
use chrono::{Duration, SecondsFormat};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Body of a successful token response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: i64,
    pub issued_at: String,
}

/// Issues signed tokens carrying the access a caller may actually exercise
pub struct TokenService {
    signer: Arc<TokenSigner>,
    filters: HashMap<String, Arc<dyn AccessFilter>>,
    expiration: Duration,
}

impl TokenService {
    /// Service with the `repository` and `registry` filters installed
    pub fn new(signer: Arc<TokenSigner>, projects: Arc<dyn ProjectController>, expiration_minutes: i64) -> Self {
        let mut filters: HashMap<String, Arc<dyn AccessFilter>> = HashMap::new();
        filters.insert("repository".to_string(), Arc::new(RepositoryFilter::new(projects)));
        filters.insert("registry".to_string(), Arc::new(RegistryFilter));

        Self { signer, filters, expiration: Duration::minutes(expiration_minutes) }
    }

    /// Install or replace the filter for a scope type
    pub fn with_filter(mut self, resource_type: impl Into<String>, filter: Arc<dyn AccessFilter>) -> Self {
        self.filters.insert(resource_type.into(), filter);
        self
    }

    pub fn signer(&self) -> &Arc<TokenSigner> {
        &self.signer
    }

    /// Narrow each requested scope to what the caller may do
    ///
    /// A failing filter leaves its scope with no actions instead of failing the request.
    pub async fn filter_access(&self, ctx: &SecurityContext, mut access: Vec<ResourceActions>) -> Vec<ResourceActions> {
        for entry in access.iter_mut() {
            let Some(filter) = self.filters.get(&entry.resource_type) else {
                entry.actions.clear();
                continue;
            };

            if let Err(e) = filter.filter(ctx, entry).await {
                warn!(scope = %entry, "Failed to filter scope: {}", e);
                entry.actions.clear();
            }
        }
        access
    }

    /// Issue a token for `service` covering the permitted part of `scopes`
    pub async fn issue<S: AsRef<str>>(&self, ctx: &SecurityContext, service: &str, scopes: &[S]) -> ApiResult<TokenResponse> {
        let requested = parse_scopes(scopes)?;
        let access = self.filter_access(ctx, requested).await;

        let claims = Claims::new(self.signer.issuer(), ctx.username(), service, access, self.expiration);
        let token = self.signer.sign(&claims)?;

        counter!("berth_tokens_issued_total", 1);
        info!(user = %ctx.username(), service = %service, scopes = claims.access.len(), "Issued registry token");

        Ok(TokenResponse {
            token,
            expires_in: claims.expires_in(),
            issued_at: claims.issued_at_time().to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::{Action, Evaluator, InMemoryProjectController, Project, Resource};
    use crate::security::Subject;
    use async_trait::async_trait;

    const PRIVATE_KEY: &[u8] = include_bytes!("../../tests/fixtures/private_key.pem");
    const PUBLIC_KEY: &[u8] = include_bytes!("../../tests/fixtures/public_key.pem");

    struct PullOnly;

    #[async_trait]
    impl Evaluator for PullOnly {
        async fn has_permission(&self, _resource: &Resource, action: Action) -> bool {
            action == Action::Pull
        }
    }

    fn service() -> TokenService {
        let projects = Arc::new(InMemoryProjectController::new());
        projects.add_project(Project::new(1, "library", true));
        let signer = Arc::new(TokenSigner::from_pem("harbor-token-issuer", PRIVATE_KEY, PUBLIC_KEY).unwrap());
        TokenService::new(signer, projects, 30)
    }

    #[tokio::test]
    async fn test_issue_filters_and_signs() {
        let service = service();
        let ctx = SecurityContext::new(Subject::Token { username: "bob".to_string() }, Arc::new(PullOnly));

        let response = service.issue(&ctx, "harbor-registry", &["repository:library/ubuntu:pull,push", "artifact:x:read"]).await.unwrap();
        assert_eq!(response.expires_in, 1800);
        assert!(chrono::DateTime::parse_from_rfc3339(&response.issued_at).is_ok());

        let claims = service.signer().validate(&response.token, "harbor-registry").unwrap();
        assert_eq!(claims.sub, "bob");
        assert_eq!(claims.access[0].actions, vec!["pull"]);
        assert!(claims.access[1].actions.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_scope_is_rejected() {
        let service = service();
        let ctx = SecurityContext::new(Subject::Anonymous, Arc::new(PullOnly));
        assert!(service.issue(&ctx, "harbor-registry", &[":bad:pull"]).await.is_err());
    }

    #[tokio::test]
    async fn test_anonymous_handshake_without_scopes() {
        let service = service();
        let ctx = SecurityContext::new(Subject::Anonymous, Arc::new(PullOnly));
        let response = service.issue::<&str>(&ctx, "harbor-registry", &[]).await.unwrap();
        let claims = service.signer().validate(&response.token, "harbor-registry").unwrap();
        assert_eq!(claims.sub, "");
        assert!(claims.access.is_empty());
    }
}
