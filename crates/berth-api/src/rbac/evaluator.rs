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

//! Permission evaluators and their composition

use crate::rbac::engine::RbacEngine;
use crate::rbac::matcher::PatternStore;
use crate::rbac::namespace::{Namespace, NamespaceRegistry, PROJECT_KIND};
use crate::rbac::principal::PrincipalBuilder;
use crate::rbac::project::ProjectController;
use crate::rbac::resource::{Action, Resource};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use metrics::counter;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Decides whether an action on a resource is permitted
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn has_permission(&self, resource: &Resource, action: Action) -> bool;
}

#[async_trait]
impl Evaluator for RbacEngine {
    async fn has_permission(&self, resource: &Resource, action: Action) -> bool {
        self.enforce(resource, action)
    }
}

/// Grants everything; used for system administrators
#[derive(Debug, Clone)]
pub struct AdminEvaluator {
    username: String,
}

impl AdminEvaluator {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}

#[async_trait]
impl Evaluator for AdminEvaluator {
    async fn has_permission(&self, resource: &Resource, action: Action) -> bool {
        debug!(user = %self.username, resource = %resource, action = %action, "Granted to administrator");
        true
    }
}

/// Ordered OR over member evaluators
#[derive(Default, Clone)]
pub struct EvaluatorSet {
    members: Vec<Arc<dyn Evaluator>>,
}

impl EvaluatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member; adding the same instance twice is a no-op
    pub fn add(&mut self, evaluator: Arc<dyn Evaluator>) -> &mut Self {
        if !self.members.iter().any(|m| Arc::ptr_eq(m, &evaluator)) {
            self.members.push(evaluator);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl Evaluator for EvaluatorSet {
    async fn has_permission(&self, resource: &Resource, action: Action) -> bool {
        for member in &self.members {
            if member.has_permission(resource, action).await {
                return true;
            }
        }
        false
    }
}

/// Factory run by a [`LazyEvaluator`]
pub type EvaluatorFactory = Box<dyn Fn() -> BoxFuture<'static, Option<Arc<dyn Evaluator>>> + Send + Sync>;

/// Builds its inner evaluator on first use, at most once
pub struct LazyEvaluator {
    factory: EvaluatorFactory,
    inner: OnceCell<Option<Arc<dyn Evaluator>>>,
}

impl LazyEvaluator {
    pub fn new(factory: EvaluatorFactory) -> Self {
        Self { factory, inner: OnceCell::new() }
    }
}

#[async_trait]
impl Evaluator for LazyEvaluator {
    async fn has_permission(&self, resource: &Resource, action: Action) -> bool {
        let inner = self.inner.get_or_init(|| (self.factory)()).await;
        match inner {
            Some(evaluator) => evaluator.has_permission(resource, action).await,
            None => false,
        }
    }
}

/// Evaluator for one namespace kind, memoizing the per-namespace evaluators it builds
///
/// One instance is created per request, so the memo lives exactly as long as the request.
pub struct NamespaceEvaluator {
    kind: String,
    namespaces: Arc<NamespaceRegistry>,
    projects: Arc<dyn ProjectController>,
    patterns: Arc<PatternStore>,
    builders: Arc<Vec<Arc<dyn PrincipalBuilder>>>,
    memo: DashMap<String, Arc<LazyEvaluator>>,
}

impl NamespaceEvaluator {
    pub fn new(kind: impl Into<String>, namespaces: Arc<NamespaceRegistry>, projects: Arc<dyn ProjectController>, patterns: Arc<PatternStore>, builders: Vec<Arc<dyn PrincipalBuilder>>) -> Self {
        Self {
            kind: kind.into(),
            namespaces,
            projects,
            patterns,
            builders: Arc::new(builders),
            memo: DashMap::new(),
        }
    }

    fn evaluator_for(&self, namespace: Namespace) -> Arc<LazyEvaluator> {
        if let Some(existing) = self.memo.get(&namespace.key()) {
            return existing.clone();
        }

        let key = namespace.key();
        let projects = self.projects.clone();
        let patterns = self.patterns.clone();
        let builders = self.builders.clone();
        let factory: EvaluatorFactory = Box::new(move || {
            let namespace = namespace.clone();
            let projects = projects.clone();
            let patterns = patterns.clone();
            let builders = builders.clone();
            Box::pin(async move { build_namespace_evaluator(namespace, projects, patterns, builders).await })
        });

        self.memo.entry(key).or_insert_with(|| Arc::new(LazyEvaluator::new(factory))).clone()
    }
}

async fn build_namespace_evaluator(
    namespace: Namespace,
    projects: Arc<dyn ProjectController>,
    patterns: Arc<PatternStore>,
    builders: Arc<Vec<Arc<dyn PrincipalBuilder>>>,
) -> Option<Arc<dyn Evaluator>> {
    counter!("berth_namespace_evaluators_built_total", 1);

    let project = if namespace.kind() == PROJECT_KIND {
        let id = namespace.identity()?;
        match projects.get(id).await {
            Ok(Some(project)) => Some(project),
            Ok(None) => {
                debug!(project_id = id, "Project not found, no permissions apply");
                return None;
            }
            Err(e) => {
                warn!(project_id = id, "Failed to fetch project: {}", e);
                return None;
            }
        }
    } else {
        None
    };

    let mut set = EvaluatorSet::new();
    for builder in builders.iter() {
        match builder.build(&namespace, project.as_ref()).await {
            Ok(Some(user)) => {
                set.add(Arc::new(RbacEngine::new(&user, patterns.clone())));
            }
            Ok(None) => {}
            Err(e) => warn!(namespace = %namespace, "Failed to build principal: {}", e),
        }
    }

    if set.is_empty() { None } else { Some(Arc::new(set)) }
}

#[async_trait]
impl Evaluator for NamespaceEvaluator {
    async fn has_permission(&self, resource: &Resource, action: Action) -> bool {
        let Some(namespace) = self.namespaces.parse(resource) else {
            debug!(resource = %resource, "Resource belongs to no known namespace");
            return false;
        };
        if namespace.kind() != self.kind {
            return false;
        }

        self.evaluator_for(namespace).has_permission(resource, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiResult;
    use crate::rbac::engine::RbacUser;
    use crate::rbac::principal::LocalUserBuilder;
    use crate::rbac::project::{InMemoryProjectController, Project};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(bool);

    #[async_trait]
    impl Evaluator for Fixed {
        async fn has_permission(&self, _resource: &Resource, _action: Action) -> bool {
            self.0
        }
    }

    struct CountingBuilder(Arc<AtomicUsize>);

    #[async_trait]
    impl PrincipalBuilder for CountingBuilder {
        async fn build(&self, _namespace: &Namespace, _project: Option<&Project>) -> ApiResult<Option<RbacUser>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn registry() -> Arc<NamespaceRegistry> {
        Arc::new(NamespaceRegistry::with_builtins().unwrap())
    }

    #[tokio::test]
    async fn test_admin_grants_everything() {
        let admin = AdminEvaluator::new("admin");
        assert!(admin.has_permission(&Resource::new("/project/1/repository"), Action::Delete).await);
        assert!(admin.has_permission(&Resource::new("/anything"), Action::All).await);
    }

    #[tokio::test]
    async fn test_set_is_or_and_deduplicates() {
        let deny: Arc<dyn Evaluator> = Arc::new(Fixed(false));
        let allow: Arc<dyn Evaluator> = Arc::new(Fixed(true));

        let mut set = EvaluatorSet::new();
        set.add(deny.clone()).add(deny.clone());
        assert_eq!(set.len(), 1);
        assert!(!set.has_permission(&Resource::new("/project/1"), Action::Read).await);

        set.add(allow);
        assert!(set.has_permission(&Resource::new("/project/1"), Action::Read).await);
    }

    #[tokio::test]
    async fn test_lazy_runs_factory_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let lazy = LazyEvaluator::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Some(Arc::new(Fixed(true)) as Arc<dyn Evaluator>) })
        }));

        assert!(lazy.has_permission(&Resource::new("/project/1"), Action::Read).await);
        assert!(lazy.has_permission(&Resource::new("/project/2"), Action::Read).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_namespace_evaluator_memoizes_per_namespace() {
        let projects = Arc::new(InMemoryProjectController::new());
        projects.add_project(Project::new(1, "library", true));
        projects.add_project(Project::new(2, "test", false));
        let calls = Arc::new(AtomicUsize::new(0));

        let evaluator = NamespaceEvaluator::new(PROJECT_KIND, registry(), projects, Arc::new(PatternStore::new()), vec![Arc::new(CountingBuilder(calls.clone()))]);
        evaluator.has_permission(&Resource::new("/project/1/repository"), Action::Pull).await;
        evaluator.has_permission(&Resource::new("/project/1/artifact"), Action::Read).await;
        evaluator.has_permission(&Resource::new("/project/2/repository"), Action::Pull).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_namespace_evaluator_rejects_other_kinds() {
        let projects = Arc::new(InMemoryProjectController::new());
        projects.add_project(Project::new(1, "library", true));
        let builders: Vec<Arc<dyn PrincipalBuilder>> = vec![Arc::new(LocalUserBuilder::new(None, projects.clone()))];

        let evaluator = NamespaceEvaluator::new(PROJECT_KIND, registry(), projects, Arc::new(PatternStore::new()), builders);
        assert!(evaluator.has_permission(&Resource::new("/project/1/repository"), Action::Pull).await);
        assert!(!evaluator.has_permission(&Resource::new("/system/registry"), Action::Read).await);
        assert!(!evaluator.has_permission(&Resource::new("/project/9/repository"), Action::Pull).await);
    }
}
