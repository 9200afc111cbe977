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

//! Replication data model

use crate::error::{ApiError, ApiResult};
use crate::replication::trigger::parse_cron;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Kind of artifact a resource carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Chart,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Chart => "chart",
        }
    }
}

impl FromStr for ResourceType {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(ResourceType::Image),
            "chart" => Ok(ResourceType::Chart),
            other => Err(ApiError::invalid_argument(format!("unknown resource type: {}", other))),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Resource,
    Name,
    Tag,
    Label,
}

/// Typed resource filter; `value` is a glob for name and tag filters and a resource type for resource filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub value: String,
}

impl Filter {
    pub fn new(filter_type: FilterType, value: impl Into<String>) -> Self {
        Self { filter_type, value: value.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    EventBased,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
            TriggerType::EventBased => "event_based",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSettings {
    #[serde(default)]
    pub cron: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<TriggerSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    Basic,
    Secret,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type")]
    pub credential_type: CredentialType,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub access_secret: String,
}

/// Remote or local registry endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub registry_type: String,
    pub url: String,
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub insecure: bool,
}

/// Namespace on a registry (a project on Harbor, implicit on plain registries)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), metadata: HashMap::new() }
    }
}

/// Filter applied when listing namespaces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceQuery {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub repository: Repository,
    #[serde(default)]
    pub vtags: Vec<String>,
}

/// A replicable repository together with the tags selected for transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub metadata: ResourceMetadata,
    #[serde(default)]
    pub registry: Option<Registry>,
    #[serde(default)]
    pub extended_info: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

impl Resource {
    pub fn image(repository: impl Into<String>, vtags: &[&str]) -> Self {
        Self {
            resource_type: ResourceType::Image,
            metadata: ResourceMetadata {
                repository: Repository { name: repository.into(), metadata: HashMap::new() },
                vtags: vtags.iter().map(|t| t.to_string()).collect(),
            },
            registry: None,
            extended_info: HashMap::new(),
            deleted: false,
            override_existing: false,
        }
    }

    pub fn repository_name(&self) -> &str {
        &self.metadata.repository.name
    }

    /// Namespace part of the repository name: everything before the last `/`
    pub fn namespace(&self) -> &str {
        split_repository(self.repository_name()).0
    }

    /// Display name used in task records
    ///
    /// `repo`, `repo:[tag]` or `repo:[tag ... N in total]`.
    pub fn display_name(&self) -> String {
        let name = self.repository_name();
        match self.metadata.vtags.as_slice() {
            [] => name.to_string(),
            [tag] => format!("{}:[{}]", name, tag),
            [first, ..] => format!("{}:[{} ... {} in total]", name, first, self.metadata.vtags.len()),
        }
    }
}

/// Split `a/b/c` into (`a/b`, `c`); a name without `/` has an empty namespace
pub fn split_repository(repository: &str) -> (&str, &str) {
    repository.rsplit_once('/').unwrap_or(("", repository))
}

/// Move a repository under `namespace`, keeping only its last path component
///
/// An empty namespace leaves the name unchanged.
pub fn replace_namespace(repository: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        return repository.to_string();
    }
    format!("{}/{}", namespace, split_repository(repository).1)
}

/// Replication policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub src_registry_id: Option<i64>,
    #[serde(default)]
    pub src_namespaces: Vec<String>,
    #[serde(default)]
    pub dest_registry_id: Option<i64>,
    #[serde(default)]
    pub dest_namespace: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub replicate_deletion: bool,
    #[serde(default, rename = "override")]
    pub override_existing: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub creation_time: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub update_time: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ReplicationPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            creator: String::new(),
            src_registry_id: None,
            src_namespaces: Vec::new(),
            dest_registry_id: None,
            dest_namespace: String::new(),
            filters: Vec::new(),
            trigger: None,
            replicate_deletion: false,
            override_existing: false,
            enabled: true,
            creation_time: now,
            update_time: now,
        }
    }

    /// Check the policy is well formed
    pub fn validate(&self) -> ApiResult<()> {
        if self.name.trim().is_empty() {
            return Err(ApiError::invalid_argument("policy name is required"));
        }
        if self.src_registry_id.is_none() && self.dest_registry_id.is_none() {
            return Err(ApiError::invalid_argument("either the source or the destination registry must be set"));
        }
        for filter in &self.filters {
            if filter.filter_type == FilterType::Resource {
                filter.value.parse::<ResourceType>()?;
            }
        }
        if let Some(trigger) = &self.trigger {
            if trigger.trigger_type == TriggerType::Scheduled {
                match trigger.settings.as_ref().map(|s| s.cron.trim()).filter(|cron| !cron.is_empty()) {
                    Some(cron) => {
                        parse_cron(cron)?;
                    }
                    None => return Err(ApiError::invalid_argument("the cron string is required for scheduled triggers")),
                }
            }
        }
        Ok(())
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger.as_ref().map(|t| t.trigger_type).unwrap_or(TriggerType::Manual)
    }
}

/// Storage representation of a policy: namespaces comma-joined, filters and trigger JSON encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub creator: String,
    pub src_registry_id: Option<i64>,
    pub src_namespaces: String,
    pub dest_registry_id: Option<i64>,
    pub dest_namespace: String,
    pub filters: String,
    pub trigger: String,
    pub replicate_deletion: bool,
    #[serde(rename = "override")]
    pub override_existing: bool,
    pub enabled: bool,
    pub creation_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl TryFrom<&ReplicationPolicy> for PolicyRecord {
    type Error = ApiError;

    fn try_from(policy: &ReplicationPolicy) -> Result<Self, Self::Error> {
        Ok(Self {
            id: policy.id,
            name: policy.name.clone(),
            description: policy.description.clone(),
            creator: policy.creator.clone(),
            src_registry_id: policy.src_registry_id,
            src_namespaces: policy.src_namespaces.join(","),
            dest_registry_id: policy.dest_registry_id,
            dest_namespace: policy.dest_namespace.clone(),
            filters: serde_json::to_string(&policy.filters)?,
            trigger: policy.trigger.as_ref().map(serde_json::to_string).transpose()?.unwrap_or_default(),
            replicate_deletion: policy.replicate_deletion,
            override_existing: policy.override_existing,
            enabled: policy.enabled,
            creation_time: policy.creation_time,
            update_time: policy.update_time,
        })
    }
}

impl TryFrom<&PolicyRecord> for ReplicationPolicy {
    type Error = ApiError;

    fn try_from(record: &PolicyRecord) -> Result<Self, Self::Error> {
        let filters = if record.filters.is_empty() { Vec::new() } else { serde_json::from_str(&record.filters)? };
        let trigger = if record.trigger.is_empty() { None } else { Some(serde_json::from_str(&record.trigger)?) };

        Ok(Self {
            id: record.id,
            name: record.name.clone(),
            description: record.description.clone(),
            creator: record.creator.clone(),
            src_registry_id: record.src_registry_id,
            src_namespaces: record.src_namespaces.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
            dest_registry_id: record.dest_registry_id,
            dest_namespace: record.dest_namespace.clone(),
            filters,
            trigger,
            replicate_deletion: record.replicate_deletion,
            override_existing: record.override_existing,
            enabled: record.enabled,
            creation_time: record.creation_time,
            update_time: record.update_time,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    InProgress,
    Succeed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Initialized,
    Pending,
    InProgress,
    Succeed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeed | TaskStatus::Failed | TaskStatus::Stopped)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Initialized => 0,
            TaskStatus::Pending => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Succeed | TaskStatus::Failed | TaskStatus::Stopped => 3,
        }
    }

    /// Whether moving from `self` to `next` goes forward
    ///
    /// Terminal states are final and states never move backwards.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl FromStr for TaskStatus {
    type Err = ApiError;

    /// Accepts task status names as well as the worker's job status names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "initialized" => Ok(TaskStatus::Initialized),
            "pending" | "scheduled" => Ok(TaskStatus::Pending),
            "inprogress" | "running" => Ok(TaskStatus::InProgress),
            "succeed" | "success" => Ok(TaskStatus::Succeed),
            "failed" | "error" => Ok(TaskStatus::Failed),
            "stopped" => Ok(TaskStatus::Stopped),
            other => Err(ApiError::invalid_argument(format!("unknown task status: {}", other))),
        }
    }
}

/// One invocation of a replication policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub policy_id: i64,
    pub status: ExecutionStatus,
    pub status_text: String,
    pub trigger: TriggerType,
    pub total: usize,
    pub failed: usize,
    pub succeed: usize,
    pub in_progress: usize,
    pub stopped: usize,
    pub pending: usize,
    pub initialized: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(policy_id: i64, trigger: TriggerType) -> Self {
        Self {
            id: 0,
            policy_id,
            status: ExecutionStatus::InProgress,
            status_text: String::new(),
            trigger,
            total: 0,
            failed: 0,
            succeed: 0,
            in_progress: 0,
            stopped: 0,
            pending: 0,
            initialized: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }
}

/// Copy of a resource between registries, or deletion of it on the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Copy,
    Deletion,
}

/// A single source to destination transfer within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub execution_id: i64,
    pub resource_type: ResourceType,
    pub src_resource: String,
    pub dst_resource: String,
    pub operation: Operation,
    pub job_id: Option<String>,
    pub status: TaskStatus,
    pub status_text: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(execution_id: i64, src: &Resource, dst: &Resource) -> Self {
        Self {
            id: 0,
            execution_id,
            resource_type: src.resource_type,
            src_resource: src.display_name(),
            dst_resource: dst.display_name(),
            operation: if dst.deleted { Operation::Deletion } else { Operation::Copy },
            job_id: None,
            status: TaskStatus::Initialized,
            status_text: String::new(),
            start_time: None,
            end_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_namespace() {
        assert_eq!(replace_namespace("c", "n"), "n/c");
        assert_eq!(replace_namespace("b/c", "n"), "n/c");
        assert_eq!(replace_namespace("a/b/c", "n"), "n/c");
        assert_eq!(replace_namespace("a/b/c", ""), "a/b/c");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(Resource::image("library/hello-world", &[]).display_name(), "library/hello-world");
        assert_eq!(Resource::image("library/hello-world", &["latest"]).display_name(), "library/hello-world:[latest]");
        assert_eq!(Resource::image("library/hello-world", &["a", "b", "c"]).display_name(), "library/hello-world:[a ... 3 in total]");
        assert_eq!(Resource::image("a/b/c", &[]).namespace(), "a/b");
    }

    #[test]
    fn test_task_status_transitions() {
        use TaskStatus::*;
        assert!(Initialized.can_transition_to(Pending));
        assert!(Pending.can_transition_to(InProgress));
        assert!(Initialized.can_transition_to(Stopped));
        assert!(InProgress.can_transition_to(Succeed));
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!Succeed.can_transition_to(Failed));
        assert!(!Stopped.can_transition_to(Succeed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_task_status_parsing() {
        assert_eq!("Running".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("Success".parse::<TaskStatus>().unwrap(), TaskStatus::Succeed);
        assert_eq!("Error".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_policy_validation() {
        let mut policy = ReplicationPolicy::new("mirror");
        assert!(policy.validate().is_err());

        policy.dest_registry_id = Some(2);
        assert!(policy.validate().is_ok());

        policy.trigger = Some(Trigger { trigger_type: TriggerType::Scheduled, settings: None });
        assert!(policy.validate().is_err());
        policy.trigger = Some(Trigger { trigger_type: TriggerType::Scheduled, settings: Some(TriggerSettings { cron: "every hour".to_string() }) });
        assert!(matches!(policy.validate(), Err(ApiError::InvalidArgument { .. })));
        policy.trigger = Some(Trigger { trigger_type: TriggerType::Scheduled, settings: Some(TriggerSettings { cron: "0 0 * * * *".to_string() }) });
        assert!(policy.validate().is_ok());

        policy.filters.push(Filter::new(FilterType::Resource, "helm"));
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_record_conversion() {
        let mut policy = ReplicationPolicy::new("mirror");
        policy.src_namespaces = vec!["library".to_string(), "dev".to_string()];
        policy.filters = vec![Filter::new(FilterType::Name, "library/*"), Filter::new(FilterType::Tag, "v?")];
        policy.trigger = Some(Trigger { trigger_type: TriggerType::Manual, settings: None });

        let record = PolicyRecord::try_from(&policy).unwrap();
        assert_eq!(record.src_namespaces, "library,dev");
        assert_eq!(record.filters, r#"[{"type":"name","value":"library/*"},{"type":"tag","value":"v?"}]"#);
        assert_eq!(record.trigger, r#"{"type":"manual"}"#);

        assert_eq!(ReplicationPolicy::try_from(&record).unwrap(), policy);
    }
}
