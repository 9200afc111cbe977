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

//! Resource filters: glob matching on repository names and tags

use crate::error::{ApiError, ApiResult};
use crate::replication::model::{Filter, FilterType, Resource, ResourceType};
use regex::Regex;
use tracing::debug;

/// Compile a glob into an anchored regex
///
/// `*` matches within one path segment, `?` one character of a segment, `**` across segments and
/// `{a,b}` either alternative.
pub fn glob_to_regex(pattern: &str) -> ApiResult<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    let mut in_group = false;
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' if !in_group => {
                in_group = true;
                out.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            ',' if in_group => out.push('|'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    if in_group {
        return Err(ApiError::invalid_argument(format!("unbalanced braces in pattern: {}", pattern)));
    }

    out.push('$');
    Regex::new(&out).map_err(|e| ApiError::invalid_argument(format!("invalid pattern {}: {}", pattern, e)))
}

/// Whether `value` matches the glob `pattern`; an empty pattern matches everything
pub fn glob_match(pattern: &str, value: &str) -> ApiResult<bool> {
    if pattern.is_empty() {
        return Ok(true);
    }
    Ok(glob_to_regex(pattern)?.is_match(value))
}

/// Resource types selected by `resource` filters, or `None` when no such filter is present
pub fn selected_resource_types(filters: &[Filter]) -> ApiResult<Option<Vec<ResourceType>>> {
    let types = filters.iter().filter(|f| f.filter_type == FilterType::Resource).map(|f| f.value.parse()).collect::<ApiResult<Vec<_>>>()?;
    Ok((!types.is_empty()).then_some(types))
}

/// Apply every filter to every resource
///
/// Filters of different types are a conjunction; several `resource` filters select any of their types.
/// Tag filters narrow a resource's tags and drop it when none remain.
pub fn filter_resources(resources: Vec<Resource>, filters: &[Filter]) -> ApiResult<Vec<Resource>> {
    let types = selected_resource_types(filters)?;
    let mut kept = Vec::with_capacity(resources.len());

    'resources: for mut resource in resources {
        if types.as_ref().is_some_and(|types| !types.contains(&resource.resource_type)) {
            continue;
        }

        for filter in filters {
            match filter.filter_type {
                FilterType::Resource => {}
                FilterType::Name => {
                    if !glob_match(&filter.value, resource.repository_name())? {
                        continue 'resources;
                    }
                }
                FilterType::Tag => {
                    let matcher = (!filter.value.is_empty()).then(|| glob_to_regex(&filter.value)).transpose()?;
                    let vtags: Vec<String> = resource.metadata.vtags.iter().filter(|t| matcher.as_ref().is_none_or(|m| m.is_match(t))).cloned().collect();
                    if vtags.is_empty() {
                        continue 'resources;
                    }
                    resource.metadata.vtags = vtags;
                }
                FilterType::Label => {}
            }
        }
        kept.push(resource);
    }

    debug!(kept = kept.len(), "Filtered resources");
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_semantics() {
        assert!(glob_match("library/*", "library/ubuntu").unwrap());
        assert!(!glob_match("library/*", "library/a/ubuntu").unwrap());
        assert!(glob_match("library/**", "library/a/ubuntu").unwrap());
        assert!(glob_match("v1.?", "v1.2").unwrap());
        assert!(!glob_match("v1.?", "v1.10").unwrap());
        assert!(glob_match("{dev,prod}/*", "prod/app").unwrap());
        assert!(!glob_match("lib.ary/*", "libxary/ubuntu").unwrap());
        assert!(glob_match("", "anything").unwrap());
        assert!(glob_to_regex("{open").is_err());
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let resources = vec![
            Resource::image("library/ubuntu", &["14.04", "16.04", "latest"]),
            Resource::image("library/redis", &["latest"]),
            Resource::image("dev/ubuntu", &["16.04"]),
        ];
        let filters = vec![Filter::new(FilterType::Name, "library/*"), Filter::new(FilterType::Tag, "1?.04")];

        let kept = filter_resources(resources, &filters).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].repository_name(), "library/ubuntu");
        assert_eq!(kept[0].metadata.vtags, vec!["14.04", "16.04"]);
    }

    #[test]
    fn test_resource_type_filter() {
        let mut chart = Resource::image("library/nginx", &["1.0.0"]);
        chart.resource_type = ResourceType::Chart;
        let resources = vec![Resource::image("library/ubuntu", &["latest"]), chart];

        let kept = filter_resources(resources, &[Filter::new(FilterType::Resource, "chart")]).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].resource_type, ResourceType::Chart);

        assert_eq!(selected_resource_types(&[Filter::new(FilterType::Resource, "image")]).unwrap(), Some(vec![ResourceType::Image]));
        assert_eq!(selected_resource_types(&[]).unwrap(), None);
    }

    #[test]
    fn test_resource_filters_select_any_listed_type() {
        let mut chart = Resource::image("library/nginx", &["1.0.0"]);
        chart.resource_type = ResourceType::Chart;
        let resources = vec![Resource::image("library/ubuntu", &["latest"]), chart];
        let both = vec![Filter::new(FilterType::Resource, "image"), Filter::new(FilterType::Resource, "chart"), Filter::new(FilterType::Name, "library/*")];

        let kept = filter_resources(resources.clone(), &both).unwrap();
        assert_eq!(kept.iter().map(|r| r.resource_type).collect::<Vec<_>>(), vec![ResourceType::Image, ResourceType::Chart]);
        assert_eq!(selected_resource_types(&both).unwrap(), Some(vec![ResourceType::Image, ResourceType::Chart]));

        let unknown = vec![Filter::new(FilterType::Resource, "helm")];
        assert!(filter_resources(resources, &unknown).is_err());
    }
}
