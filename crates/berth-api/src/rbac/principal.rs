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

//! Principal assembly from an authenticated subject and a target namespace

use crate::error::ApiResult;
use crate::rbac::engine::{RbacUser, Role};
use crate::rbac::namespace::{Namespace, NamespaceRegistry, SYSTEM_KIND};
use crate::rbac::project::{Project, ProjectController};
use crate::rbac::resource::Policy;
use crate::rbac::roles;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the role that carries public-project policies for anonymous callers
pub const PUBLIC_ROLE: &str = "public";

/// Name of the role that carries static policies granted to an anonymous principal
pub const GRANTED_ROLE: &str = "granted";

/// Produces the principal for one namespace, or `None` when the builder has no opinion
#[async_trait]
pub trait PrincipalBuilder: Send + Sync {
    async fn build(&self, namespace: &Namespace, project: Option<&Project>) -> ApiResult<Option<RbacUser>>;
}

/// Locally known user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub user_id: i64,
    pub username: String,
}

/// Builds principals for local users from their project membership
pub struct LocalUserBuilder {
    user: Option<LocalUser>,
    projects: Arc<dyn ProjectController>,
}

impl LocalUserBuilder {
    /// Builder for `user`; `None` builds the anonymous principal
    pub fn new(user: Option<LocalUser>, projects: Arc<dyn ProjectController>) -> Self {
        Self { user, projects }
    }
}

#[async_trait]
impl PrincipalBuilder for LocalUserBuilder {
    async fn build(&self, namespace: &Namespace, project: Option<&Project>) -> ApiResult<Option<RbacUser>> {
        let Some(project) = project else {
            return Ok(None);
        };
        let public = if project.public { roles::public_policies(namespace) } else { Vec::new() };

        let Some(user) = &self.user else {
            let roles = if public.is_empty() { Vec::new() } else { vec![Role::new(PUBLIC_ROLE, public)] };
            return Ok(Some(RbacUser::new("", Vec::new(), roles)));
        };

        let role_ids = self.projects.list_roles(project.project_id, user.user_id).await?;
        let roles = role_ids.into_iter().map(|id| roles::project_role(namespace, id)).collect::<Vec<_>>();
        debug!(user = %user.username, project = %project.name, roles = roles.len(), "Assembled local user principal");

        Ok(Some(RbacUser::new(user.username.clone(), public, roles)))
    }
}

/// Per-namespace filter applied to static policies
pub type PolicyFilter = Arc<dyn Fn(&Namespace, &Policy) -> bool + Send + Sync>;

/// Builds principals from a fixed policy list, as carried by robot accounts and tokens
pub struct StaticPoliciesBuilder {
    username: String,
    policies: Vec<Policy>,
    filters: Vec<PolicyFilter>,
}

impl StaticPoliciesBuilder {
    pub fn new(username: impl Into<String>, policies: Vec<Policy>) -> Self {
        Self { username: username.into(), policies, filters: Vec::new() }
    }

    /// Keep only the policies that satisfy `filter` for the target namespace
    pub fn with_filter(mut self, filter: PolicyFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Keep only the policies whose resource lies in the target namespace
    pub fn scoped_to_namespace(self, registry: Arc<NamespaceRegistry>) -> Self {
        self.with_filter(Arc::new(move |namespace, policy| registry.parse(&policy.resource).map(|ns| ns == *namespace).unwrap_or(false)))
    }
}

#[async_trait]
impl PrincipalBuilder for StaticPoliciesBuilder {
    async fn build(&self, namespace: &Namespace, _project: Option<&Project>) -> ApiResult<Option<RbacUser>> {
        let policies = self.policies.iter().filter(|p| self.filters.iter().all(|f| f(namespace, p))).cloned().collect::<Vec<_>>();

        // The engine ignores direct policies of anonymous principals, so anonymous grants travel as a role
        if self.username.is_empty() {
            let roles = if policies.is_empty() { Vec::new() } else { vec![Role::new(GRANTED_ROLE, policies)] };
            return Ok(Some(RbacUser::new("", Vec::new(), roles)));
        }
        Ok(Some(RbacUser::new(self.username.clone(), policies, Vec::new())))
    }
}

/// Builds the system principal with the system policy catalog
pub struct SystemBuilder {
    username: String,
}

impl SystemBuilder {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}

#[async_trait]
impl PrincipalBuilder for SystemBuilder {
    async fn build(&self, namespace: &Namespace, _project: Option<&Project>) -> ApiResult<Option<RbacUser>> {
        if namespace.kind() != SYSTEM_KIND {
            warn!(namespace = %namespace, "System principal requested outside the system namespace");
            return Ok(None);
        }
        Ok(Some(RbacUser::new(self.username.clone(), roles::system_policies(), Vec::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::project::InMemoryProjectController;
    use crate::rbac::resource::Action;
    use crate::rbac::roles::{ROLE_DEVELOPER, ROLE_PROJECT_ADMIN};

    fn controller() -> Arc<InMemoryProjectController> {
        let ctl = Arc::new(InMemoryProjectController::new());
        ctl.add_project(Project::new(1, "library", true));
        ctl.add_project(Project::new(2, "test", false));
        ctl.add_member(1, 10, ROLE_PROJECT_ADMIN);
        ctl.add_member(2, 10, ROLE_DEVELOPER);
        ctl
    }

    #[tokio::test]
    async fn test_anonymous_principal() {
        let builder = LocalUserBuilder::new(None, controller());

        let public = builder.build(&Namespace::project(1), Some(&Project::new(1, "library", true))).await.unwrap().unwrap();
        assert!(public.is_anonymous());
        assert!(public.policies().is_empty());
        assert_eq!(public.roles().len(), 1);
        assert_eq!(public.roles()[0].name(), PUBLIC_ROLE);

        let private = builder.build(&Namespace::project(2), Some(&Project::new(2, "test", false))).await.unwrap().unwrap();
        assert!(private.roles().is_empty());
        assert!(private.policies().is_empty());
    }

    #[tokio::test]
    async fn test_local_user_roles_and_public_merge() {
        let builder = LocalUserBuilder::new(Some(LocalUser { user_id: 10, username: "alice".to_string() }), controller());

        let user = builder.build(&Namespace::project(1), Some(&Project::new(1, "library", true))).await.unwrap().unwrap();
        assert_eq!(user.username(), "alice");
        assert_eq!(user.roles()[0].name(), "projectAdmin");
        assert!(user.policies().contains(&Policy::new("/project/1/repository", Action::Pull)));

        let user = builder.build(&Namespace::project(2), Some(&Project::new(2, "test", false))).await.unwrap().unwrap();
        assert_eq!(user.roles()[0].name(), "developer");
        assert!(user.policies().is_empty());
    }

    #[tokio::test]
    async fn test_static_policies_scoped_to_namespace() {
        let registry = Arc::new(NamespaceRegistry::with_builtins().unwrap());
        let builder = StaticPoliciesBuilder::new(
            "robot$ci",
            vec![Policy::new("/project/1/repository", Action::Pull), Policy::new("/project/2/repository", Action::Push)],
        )
        .scoped_to_namespace(registry);

        let user = builder.build(&Namespace::project(1), None).await.unwrap().unwrap();
        assert_eq!(user.policies(), &[Policy::new("/project/1/repository", Action::Pull)]);
    }

    #[tokio::test]
    async fn test_anonymous_static_policies_become_a_role() {
        let builder = StaticPoliciesBuilder::new("", vec![Policy::new("/project/1/repository", Action::Pull)]);

        let user = builder.build(&Namespace::project(1), None).await.unwrap().unwrap();
        assert!(user.is_anonymous());
        assert!(user.policies().is_empty());
        assert_eq!(user.roles()[0].name(), GRANTED_ROLE);
        assert_eq!(user.roles()[0].policies(), &[Policy::new("/project/1/repository", Action::Pull)]);

        let empty = StaticPoliciesBuilder::new("", Vec::new()).build(&Namespace::project(1), None).await.unwrap().unwrap();
        assert!(empty.roles().is_empty());
    }

    #[tokio::test]
    async fn test_system_builder_only_in_system_namespace() {
        let builder = SystemBuilder::new("admin");
        assert!(builder.build(&Namespace::project(1), None).await.unwrap().is_none());
        let user = builder.build(&Namespace::system(), None).await.unwrap().unwrap();
        assert!(!user.policies().is_empty());
    }
}
