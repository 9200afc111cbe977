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

//! Token scopes: `type:name:action[,action...]`

use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested or granted access to one named resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceActions {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub actions: Vec<String>,
}

impl ResourceActions {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>, actions: &[&str]) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Parse a single scope
    ///
    /// The name may itself contain `:` (registry host with a port), so the type is everything
    /// before the first colon and the actions everything after the last.
    pub fn parse(scope: &str) -> ApiResult<Self> {
        let items: Vec<&str> = scope.split(':').collect();
        let resource_type = items[0];
        if resource_type.is_empty() {
            return Err(ApiError::invalid_argument(format!("malformed scope: {}", scope)));
        }

        let (name, actions) = match items.len() {
            1 => (String::new(), Vec::new()),
            2 => (items[1].to_string(), Vec::new()),
            n => {
                let actions = items[n - 1].split(',').map(str::trim).filter(|a| !a.is_empty()).map(str::to_string).collect();
                (items[1..n - 1].join(":"), actions)
            }
        };

        Ok(Self { resource_type: resource_type.to_string(), name, actions })
    }
}

impl fmt::Display for ResourceActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource_type, self.name, self.actions.join(","))
    }
}

/// Parse every scope parameter; one parameter may carry several space separated scopes
pub fn parse_scopes<S: AsRef<str>>(scopes: &[S]) -> ApiResult<Vec<ResourceActions>> {
    scopes.iter().flat_map(|s| s.as_ref().split_whitespace().map(str::to_string).collect::<Vec<_>>()).map(|s| ResourceActions::parse(&s)).collect()
}
