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

//! Shared RBAC handles and evaluator construction

use crate::config::Config;
use crate::error::ApiResult;
use crate::rbac::evaluator::{AdminEvaluator, Evaluator, EvaluatorSet, NamespaceEvaluator};
use crate::rbac::matcher::PatternStore;
use crate::rbac::namespace::{NamespaceRegistry, PROJECT_KIND, ParseFn, SYSTEM_KIND};
use crate::rbac::principal::{LocalUser, LocalUserBuilder, PrincipalBuilder, StaticPoliciesBuilder, SystemBuilder};
use crate::rbac::project::ProjectController;
use crate::rbac::resource::{Action, Policy};
use std::sync::Arc;
use tracing::info;

/// Handles every evaluator is built from
#[derive(Clone)]
pub struct RbacSystem {
    namespaces: Arc<NamespaceRegistry>,
    projects: Arc<dyn ProjectController>,
    patterns: Arc<PatternStore>,
}

impl RbacSystem {
    pub fn new(namespaces: Arc<NamespaceRegistry>, projects: Arc<dyn ProjectController>, patterns: Arc<PatternStore>) -> Self {
        Self { namespaces, projects, patterns }
    }

    /// Build the system with the built-in namespaces plus `extra` ones and start the pattern purge task
    ///
    /// Registering a namespace kind twice fails the startup.
    pub fn initialize(config: &Config, projects: Arc<dyn ProjectController>, extra: Vec<(&str, ParseFn)>) -> ApiResult<Self> {
        let mut namespaces = NamespaceRegistry::with_builtins()?;
        for (kind, parser) in extra {
            namespaces.register(kind, parser)?;
        }

        let patterns = Arc::new(PatternStore::new());
        let _purge_task = PatternStore::start_purge_task(patterns.clone(), config.pattern_purge_interval, config.pattern_purge_jitter);

        let system = Self::new(Arc::new(namespaces), projects, patterns);
        info!("RBAC system initialized with namespaces {:?}", system.namespaces.kinds());
        Ok(system)
    }

    pub fn namespaces(&self) -> &Arc<NamespaceRegistry> {
        &self.namespaces
    }

    pub fn projects(&self) -> &Arc<dyn ProjectController> {
        &self.projects
    }

    pub fn patterns(&self) -> &Arc<PatternStore> {
        &self.patterns
    }

    /// Evaluator for the given namespace kind over the given builders
    pub fn namespace_evaluator(&self, kind: &str, builders: Vec<Arc<dyn PrincipalBuilder>>) -> NamespaceEvaluator {
        NamespaceEvaluator::new(kind, self.namespaces.clone(), self.projects.clone(), self.patterns.clone(), builders)
    }

    /// Evaluator for a local user, or anonymous when `user` is `None`
    pub fn user_evaluator(&self, user: Option<LocalUser>, sysadmin: bool) -> Arc<dyn Evaluator> {
        if sysadmin {
            let name = user.map(|u| u.username).unwrap_or_default();
            return Arc::new(AdminEvaluator::new(name));
        }

        Arc::new(self.namespace_evaluator(PROJECT_KIND, vec![Arc::new(LocalUserBuilder::new(user, self.projects.clone()))]))
    }

    /// Evaluator for internal components presenting the shared secret
    ///
    /// Covers the system catalog plus pull and read on every project.
    pub fn secret_evaluator(&self, name: &str) -> Arc<dyn Evaluator> {
        let project_wide = vec![Policy::new("/project/*", Action::Pull), Policy::new("/project/*", Action::Read)];

        let mut set = EvaluatorSet::new();
        set.add(Arc::new(self.namespace_evaluator(SYSTEM_KIND, vec![Arc::new(SystemBuilder::new(name))])));
        set.add(Arc::new(self.namespace_evaluator(PROJECT_KIND, vec![Arc::new(StaticPoliciesBuilder::new(name, project_wide))])));
        Arc::new(set)
    }

    /// Evaluator for a fixed policy list, each policy only effective in its own namespace
    pub fn policies_evaluator(&self, username: &str, policies: Vec<Policy>) -> Arc<dyn Evaluator> {
        let builder = || -> Arc<dyn PrincipalBuilder> { Arc::new(StaticPoliciesBuilder::new(username, policies.clone()).scoped_to_namespace(self.namespaces.clone())) };

        let mut set = EvaluatorSet::new();
        set.add(Arc::new(self.namespace_evaluator(PROJECT_KIND, vec![builder()])));
        set.add(Arc::new(self.namespace_evaluator(SYSTEM_KIND, vec![builder()])));
        Arc::new(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::namespace::{Namespace, parse_project};
    use crate::rbac::project::{InMemoryProjectController, Project};
    use crate::rbac::resource::Resource;
    use crate::rbac::roles::ROLE_GUEST;

    fn system() -> RbacSystem {
        let projects = Arc::new(InMemoryProjectController::new());
        projects.add_project(Project::new(1, "library", true));
        projects.add_project(Project::new(2, "test", false));
        projects.add_member(2, 5, ROLE_GUEST);
        RbacSystem::new(Arc::new(NamespaceRegistry::with_builtins().unwrap()), projects, Arc::new(PatternStore::new()))
    }

    #[tokio::test]
    async fn test_user_evaluator() {
        let rbac = system();
        let bob = rbac.user_evaluator(Some(LocalUser { user_id: 5, username: "bob".to_string() }), false);
        assert!(bob.has_permission(&Resource::new("/project/2/repository"), Action::Pull).await);
        assert!(!bob.has_permission(&Resource::new("/project/2/repository"), Action::Push).await);
        assert!(!bob.has_permission(&Resource::new("/system/registry"), Action::Read).await);

        let anonymous = rbac.user_evaluator(None, false);
        assert!(anonymous.has_permission(&Resource::new("/project/1/repository"), Action::Pull).await);
        assert!(!anonymous.has_permission(&Resource::new("/project/2/repository"), Action::Pull).await);
        assert!(!anonymous.has_permission(&Resource::new("/system/registry"), Action::Read).await);
    }

    #[tokio::test]
    async fn test_admin_evaluator_for_sysadmin() {
        let admin = system().user_evaluator(Some(LocalUser { user_id: 1, username: "admin".to_string() }), true);
        assert!(admin.has_permission(&Resource::new("/project/2/repository"), Action::Delete).await);
    }

    #[tokio::test]
    async fn test_secret_evaluator() {
        let secret = system().secret_evaluator("jobservice");
        assert!(secret.has_permission(&Resource::new("/system/replication"), Action::Read).await);
        assert!(!secret.has_permission(&Resource::new("/system/replication"), Action::Create).await);
        assert!(secret.has_permission(&Resource::new("/project/2/repository"), Action::Pull).await);
        assert!(!secret.has_permission(&Resource::new("/project/2/repository"), Action::Push).await);
    }

    #[tokio::test]
    async fn test_policies_evaluator_is_namespace_scoped() {
        let evaluator = system().policies_evaluator("robot$ci", vec![Policy::new("/project/1/repository", Action::Push)]);
        assert!(evaluator.has_permission(&Resource::new("/project/1/repository"), Action::Push).await);
        assert!(!evaluator.has_permission(&Resource::new("/project/2/repository"), Action::Push).await);
    }

    #[tokio::test]
    async fn test_policies_evaluator_for_anonymous_token() {
        let evaluator = system().policies_evaluator("", vec![Policy::new("/project/1/repository", Action::Pull)]);
        assert!(evaluator.has_permission(&Resource::new("/project/1/repository"), Action::Pull).await);
        assert!(!evaluator.has_permission(&Resource::new("/project/1/repository"), Action::Push).await);
        assert!(!evaluator.has_permission(&Resource::new("/project/2/repository"), Action::Pull).await);
    }

    #[tokio::test]
    async fn test_initialize_registers_extra_namespaces() {
        let projects: Arc<dyn ProjectController> = Arc::new(InMemoryProjectController::new());
        let robot: ParseFn = Box::new(|resource: &Resource| resource.as_str().starts_with("/robot/").then(Namespace::system));

        let rbac = RbacSystem::initialize(&Config::default(), projects, vec![("robot", robot)]).unwrap();
        assert_eq!(rbac.namespaces().kinds(), vec!["project", "system", "robot"]);
    }

    #[tokio::test]
    async fn test_initialize_rejects_duplicate_namespace() {
        let projects: Arc<dyn ProjectController> = Arc::new(InMemoryProjectController::new());
        let result = RbacSystem::initialize(&Config::default(), projects, vec![(PROJECT_KIND, Box::new(parse_project) as ParseFn)]);
        assert!(matches!(result, Err(crate::error::ApiError::Conflict { .. })));
    }
}
