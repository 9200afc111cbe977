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

//! Project records and the controller used to look them up

use crate::error::ApiResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Project as seen by the authorization core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: i64,
    pub name: String,
    pub public: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub owner_id: i64,
}

impl Project {
    pub fn new(project_id: i64, name: impl Into<String>, public: bool) -> Self {
        Self { project_id, name: name.into(), public, metadata: HashMap::new(), owner_id: 0 }
    }
}

/// Read access to projects and project membership
#[async_trait]
pub trait ProjectController: Send + Sync {
    /// Get a project by id
    async fn get(&self, project_id: i64) -> ApiResult<Option<Project>>;

    /// Get a project by name
    async fn get_by_name(&self, name: &str) -> ApiResult<Option<Project>>;

    /// Role ids the user holds in the project
    async fn list_roles(&self, project_id: i64, user_id: i64) -> ApiResult<Vec<i64>>;
}

/// Project controller backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryProjectController {
    projects: RwLock<HashMap<i64, Project>>,
    members: RwLock<HashMap<(i64, i64), Vec<i64>>>,
}

impl InMemoryProjectController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a project
    pub fn add_project(&self, project: Project) {
        self.projects.write().insert(project.project_id, project);
    }

    /// Grant a role to a user in a project
    pub fn add_member(&self, project_id: i64, user_id: i64, role_id: i64) {
        let mut members = self.members.write();
        let roles = members.entry((project_id, user_id)).or_default();
        if !roles.contains(&role_id) {
            roles.push(role_id);
        }
    }
}

#[async_trait]
impl ProjectController for InMemoryProjectController {
    async fn get(&self, project_id: i64) -> ApiResult<Option<Project>> {
        Ok(self.projects.read().get(&project_id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> ApiResult<Option<Project>> {
        Ok(self.projects.read().values().find(|p| p.name == name).cloned())
    }

    async fn list_roles(&self, project_id: i64, user_id: i64) -> ApiResult<Vec<i64>> {
        Ok(self.members.read().get(&(project_id, user_id)).cloned().unwrap_or_default())
    }
}
