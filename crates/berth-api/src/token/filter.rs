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

//! Access filters narrowing requested scopes to what the caller may do

use crate::error::ApiResult;
use crate::rbac::{Action, ProjectController, roles};
use crate::security::SecurityContext;
use crate::token::scope::ResourceActions;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const REPOSITORY_ACTIONS: [Action; 3] = [Action::Pull, Action::Push, Action::Delete];

/// Rewrites the actions of one requested scope in place
#[async_trait]
pub trait AccessFilter: Send + Sync {
    async fn filter(&self, ctx: &SecurityContext, access: &mut ResourceActions) -> ApiResult<()>;
}

/// Filter for `repository` scopes
pub struct RepositoryFilter {
    projects: Arc<dyn ProjectController>,
}

impl RepositoryFilter {
    pub fn new(projects: Arc<dyn ProjectController>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl AccessFilter for RepositoryFilter {
    async fn filter(&self, ctx: &SecurityContext, access: &mut ResourceActions) -> ApiResult<()> {
        let project_name = access.name.split('/').next().unwrap_or_default();
        let Some(project) = self.projects.get_by_name(project_name).await? else {
            debug!(project = %project_name, "Project does not exist, granting no actions");
            access.actions.clear();
            return Ok(());
        };

        let resource = roles::project_resource(project.project_id, roles::RESOURCE_REPOSITORY);
        let wildcard = access.actions.iter().any(|a| a == Action::All.as_str());

        let mut granted = Vec::new();
        for action in REPOSITORY_ACTIONS {
            let requested = wildcard || access.actions.iter().any(|a| a == action.as_str());
            if requested && ctx.can(action, &resource).await {
                granted.push(action.as_str().to_string());
            }
        }

        debug!(user = %ctx.username(), repository = %access.name, requested = ?access.actions, granted = ?granted, "Filtered repository scope");
        access.actions = granted;
        Ok(())
    }
}

/// Filter for `registry` scopes; only the catalog is recognized and only administrators keep it
pub struct RegistryFilter;

#[async_trait]
impl AccessFilter for RegistryFilter {
    async fn filter(&self, ctx: &SecurityContext, access: &mut ResourceActions) -> ApiResult<()> {
        if access.name != roles::RESOURCE_CATALOG || !ctx.is_sysadmin() {
            access.actions.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryUserDirectory;
    use crate::rbac::{AdminEvaluator, Evaluator, InMemoryProjectController, Project, Resource};
    use crate::security::Subject;

    /// Grants a fixed list of actions on one resource
    struct Grants(Resource, Vec<Action>);

    #[async_trait]
    impl Evaluator for Grants {
        async fn has_permission(&self, resource: &Resource, action: Action) -> bool {
            *resource == self.0 && self.1.contains(&action)
        }
    }

    fn projects() -> Arc<InMemoryProjectController> {
        let projects = Arc::new(InMemoryProjectController::new());
        projects.add_project(Project::new(1, "library", false));
        projects
    }

    fn ctx(actions: Vec<Action>) -> SecurityContext {
        SecurityContext::new(Subject::Token { username: "alice".to_string() }, Arc::new(Grants(Resource::new("/project/1/repository"), actions)))
    }

    #[tokio::test]
    async fn test_wildcard_becomes_permitted_subset() {
        let filter = RepositoryFilter::new(projects());
        let mut access = ResourceActions::new("repository", "library/ubuntu", &["*"]);
        filter.filter(&ctx(vec![Action::Pull, Action::Push]), &mut access).await.unwrap();
        assert_eq!(access.actions, vec!["pull", "push"]);
    }

    #[tokio::test]
    async fn test_requested_actions_are_intersected() {
        let filter = RepositoryFilter::new(projects());
        let mut access = ResourceActions::new("repository", "library/ubuntu", &["push", "pull"]);
        filter.filter(&ctx(vec![Action::Pull]), &mut access).await.unwrap();
        assert_eq!(access.actions, vec!["pull"]);

        let mut access = ResourceActions::new("repository", "library/ubuntu", &["pull", "push"]);
        filter.filter(&ctx(vec![Action::Pull, Action::Push, Action::Delete]), &mut access).await.unwrap();
        assert_eq!(access.actions, vec!["pull", "push"]);
    }

    #[tokio::test]
    async fn test_unknown_project_grants_nothing() {
        let filter = RepositoryFilter::new(projects());
        let mut access = ResourceActions::new("repository", "missing/ubuntu", &["pull"]);
        filter.filter(&ctx(vec![Action::Pull]), &mut access).await.unwrap();
        assert!(access.actions.is_empty());
    }

    #[tokio::test]
    async fn test_registry_catalog_for_admins_only() {
        let admin = InMemoryUserDirectory::new().add_user("admin", "pw", true).unwrap();
        let admin_ctx = SecurityContext::new(Subject::User(admin), Arc::new(AdminEvaluator::new("admin")));

        let mut access = ResourceActions::new("registry", "catalog", &["*"]);
        RegistryFilter.filter(&admin_ctx, &mut access).await.unwrap();
        assert_eq!(access.actions, vec!["*"]);

        let mut access = ResourceActions::new("registry", "catalog", &["*"]);
        RegistryFilter.filter(&ctx(vec![]), &mut access).await.unwrap();
        assert!(access.actions.is_empty());

        let mut access = ResourceActions::new("registry", "other", &["*"]);
        RegistryFilter.filter(&admin_ctx, &mut access).await.unwrap();
        assert!(access.actions.is_empty());
    }
}
