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

//! Resources, actions, effects and policies

use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hierarchical resource path such as `/project/17/repository`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(String);

impl Resource {
    /// Create a resource from a path, normalizing separators
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(clean_path(path.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join this resource with the given subresources
    pub fn subresource<S: AsRef<str>>(&self, subs: &[S]) -> Resource {
        let mut joined = self.0.clone();
        for sub in subs {
            joined.push('/');
            joined.push_str(sub.as_ref());
        }
        Resource(clean_path(&joined))
    }

    /// Strip `base` from this resource, returning `.` when both are equal
    pub fn relative_to(&self, base: &Resource) -> ApiResult<Resource> {
        let prefix = base.as_str();
        let rest = self
            .0
            .strip_prefix(prefix)
            .filter(|rest| rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'))
            .ok_or_else(|| ApiError::invalid_argument(format!("resource {} is not under {}", self.0, prefix)))?;

        let relative = rest.trim_start_matches('/');
        if relative.is_empty() { Ok(Resource(".".to_string())) } else { Ok(Resource(relative.to_string())) }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Resource {
    fn from(path: &str) -> Self {
        Resource::new(path)
    }
}

impl From<String> for Resource {
    fn from(path: String) -> Self {
        Resource::new(path)
    }
}

/// Lexical path cleanup: collapses repeated separators, drops `.` and resolves `..`
fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().map(|p| *p != "..").unwrap_or(false) {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let body = parts.join("/");
    match (rooted, body.is_empty()) {
        (true, _) => format!("/{}", body),
        (false, true) => ".".to_string(),
        (false, false) => body,
    }
}

/// Verb describing an intended operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "pull")]
    Pull,
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "list")]
    List,
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "scan")]
    Scan,
    #[serde(rename = "operate")]
    Operate,
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "scanner-pull")]
    ScannerPull,
    #[serde(rename = "*")]
    All,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pull => "pull",
            Action::Push => "push",
            Action::Delete => "delete",
            Action::Read => "read",
            Action::List => "list",
            Action::Create => "create",
            Action::Update => "update",
            Action::Scan => "scan",
            Action::Operate => "operate",
            Action::Stop => "stop",
            Action::ScannerPull => "scanner-pull",
            Action::All => "*",
        }
    }

    /// Whether a policy line carrying this action covers the requested one
    pub fn covers(&self, requested: Action) -> bool {
        *self == Action::All || *self == requested
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pull" => Action::Pull,
            "push" => Action::Push,
            "delete" => Action::Delete,
            "read" => Action::Read,
            "list" => Action::List,
            "create" => Action::Create,
            "update" => Action::Update,
            "scan" => Action::Scan,
            "operate" => Action::Operate,
            "stop" => Action::Stop,
            "scanner-pull" => Action::ScannerPull,
            "*" => Action::All,
            other => return Err(ApiError::invalid_argument(format!("unknown action: {}", other))),
        })
    }
}

/// Outcome a policy line contributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => f.write_str("allow"),
            Effect::Deny => f.write_str("deny"),
        }
    }
}

/// A (resource, action, effect) triple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub resource: Resource,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
}

impl Policy {
    pub fn new(resource: impl Into<Resource>, action: Action) -> Self {
        Self { resource: resource.into(), action, effect: None }
    }

    pub fn deny(resource: impl Into<Resource>, action: Action) -> Self {
        Self { resource: resource.into(), action, effect: Some(Effect::Deny) }
    }

    /// Effect of this policy, `allow` when unset
    pub fn effect(&self) -> Effect {
        self.effect.unwrap_or_default()
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource, self.action, self.effect())
    }
}

// Policies are identified by their rendered form, so a missing effect equals an explicit allow.
impl PartialEq for Policy {
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource && self.action == other.action && self.effect() == other.effect()
    }
}

impl Eq for Policy {}

impl std::hash::Hash for Policy {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.resource.hash(state);
        self.action.hash(state);
        self.effect().hash(state);
    }
}
