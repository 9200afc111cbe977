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

//! Namespace handles and the parser registry that maps resources onto them

use crate::error::{ApiError, ApiResult};
use crate::rbac::resource::Resource;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

/// Kind name of project namespaces
pub const PROJECT_KIND: &str = "project";

/// Kind name of the system namespace
pub const SYSTEM_KIND: &str = "system";

static PROJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/project/(\d+)(/.*)?$").expect("static project pattern"));

/// A partition of the resource space
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    kind: String,
    identity: Option<i64>,
    prefix: Resource,
}

impl Namespace {
    /// Namespace for the given project id
    pub fn project(id: i64) -> Self {
        Self { kind: PROJECT_KIND.to_string(), identity: Some(id), prefix: Resource::new(format!("/project/{}", id)) }
    }

    /// The single system namespace
    pub fn system() -> Self {
        Self { kind: SYSTEM_KIND.to_string(), identity: None, prefix: Resource::new("/system") }
    }

    /// Namespace of a custom kind
    pub fn custom(kind: impl Into<String>, identity: Option<i64>, prefix: Resource) -> Self {
        Self { kind: kind.into(), identity, prefix }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn identity(&self) -> Option<i64> {
        self.identity
    }

    /// Scope a relative resource into this namespace
    pub fn resource<S: AsRef<str>>(&self, subresources: &[S]) -> Resource {
        self.prefix.subresource(subresources)
    }

    /// Key used to memoize per-namespace state
    pub fn key(&self) -> String {
        match self.identity {
            Some(id) => format!("{}:{}", self.kind, id),
            None => self.kind.clone(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix.as_str())
    }
}

/// Parse function registered for a namespace kind
pub type ParseFn = Box<dyn Fn(&Resource) -> Option<Namespace> + Send + Sync>;

/// Registry of namespace parsers, populated at startup and read-only afterwards
pub struct NamespaceRegistry {
    parsers: Vec<(String, ParseFn)>,
}

impl NamespaceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self { parsers: Vec::new() }
    }

    /// Registry with the built-in `project` and `system` parsers
    pub fn with_builtins() -> ApiResult<Self> {
        let mut registry = Self::new();
        registry.register(PROJECT_KIND, Box::new(parse_project))?;
        registry.register(SYSTEM_KIND, Box::new(parse_system))?;
        Ok(registry)
    }

    /// Register a parser; a kind can only be registered once
    pub fn register(&mut self, kind: &str, parser: ParseFn) -> ApiResult<()> {
        if self.parsers.iter().any(|(k, _)| k == kind) {
            return Err(ApiError::conflict(format!("namespace parser for kind {} already registered", kind)));
        }

        debug!(kind = %kind, "Registered namespace parser");
        self.parsers.push((kind.to_string(), parser));
        Ok(())
    }

    /// Resolve the namespace a resource belongs to
    pub fn parse(&self, resource: &Resource) -> Option<Namespace> {
        self.parsers.iter().find_map(|(_, parser)| parser(resource))
    }

    /// Registered kinds in registration order
    pub fn kinds(&self) -> Vec<&str> {
        self.parsers.iter().map(|(k, _)| k.as_str()).collect()
    }
}

impl fmt::Debug for NamespaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceRegistry").field("kinds", &self.kinds()).finish()
    }
}

/// Parser for `/project/<id>[/...]`
pub fn parse_project(resource: &Resource) -> Option<Namespace> {
    let captures = PROJECT_PATTERN.captures(resource.as_str())?;
    let id = captures.get(1)?.as_str().parse::<i64>().ok()?;
    Some(Namespace::project(id))
}

/// Parser for anything under `/system/`
pub fn parse_system(resource: &Resource) -> Option<Namespace> {
    if resource.as_str().starts_with("/system/") { Some(Namespace::system()) } else { None }
}
