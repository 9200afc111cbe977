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

//! Allow/deny decision engine over a principal's policy lines

use crate::rbac::matcher::PatternStore;
use crate::rbac::resource::{Action, Effect, Policy, Resource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Named bundle of policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    name: String,
    policies: Vec<Policy>,
}

impl Role {
    pub fn new(name: impl Into<String>, policies: Vec<Policy>) -> Self {
        Self { name: name.into(), policies }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }
}

/// Authorization principal: identity plus direct policies and roles
///
/// An empty username is the anonymous principal, whose direct policies are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacUser {
    username: String,
    policies: Vec<Policy>,
    roles: Vec<Role>,
}

impl RbacUser {
    pub fn new(username: impl Into<String>, policies: Vec<Policy>, roles: Vec<Role>) -> Self {
        Self { username: username.into(), policies, roles }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

#[derive(Debug, Clone)]
struct PolicyLine {
    subject: String,
    resource: Resource,
    action: Action,
    effect: Effect,
}

/// Decision engine bound to one principal
#[derive(Debug)]
pub struct RbacEngine {
    username: String,
    lines: Vec<PolicyLine>,
    patterns: Arc<PatternStore>,
}

impl RbacEngine {
    pub fn new(user: &RbacUser, patterns: Arc<PatternStore>) -> Self {
        let mut lines = Vec::new();

        if !user.is_anonymous() {
            lines.extend(user.policies.iter().map(|p| PolicyLine { subject: user.username.clone(), resource: p.resource.clone(), action: p.action, effect: p.effect() }));
        }

        for role in user.roles.iter().filter(|r| !r.name.is_empty()) {
            lines.extend(role.policies.iter().map(|p| PolicyLine { subject: role.name.clone(), resource: p.resource.clone(), action: p.action, effect: p.effect() }));
        }

        Self { username: user.username.clone(), lines, patterns }
    }

    /// Permit iff some matching line allows and none denies
    pub fn enforce(&self, resource: &Resource, action: Action) -> bool {
        let mut allowed = false;

        for line in self.lines.iter().filter(|l| l.action.covers(action)) {
            let matched = match self.patterns.matches(line.resource.as_str(), resource.as_str()) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(pattern = %line.resource, "Skipping policy line with invalid pattern: {}", e);
                    false
                }
            };
            if !matched {
                continue;
            }

            match line.effect {
                Effect::Deny => {
                    debug!(user = %self.username, subject = %line.subject, resource = %resource, action = %action, "Denied by policy");
                    return false;
                }
                Effect::Allow => allowed = true,
            }
        }

        debug!(user = %self.username, resource = %resource, action = %action, allowed, "Permission decision");
        allowed
    }
}
