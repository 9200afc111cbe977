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

//! Scheduled and event-based triggering of replication policies

use crate::error::{ApiError, ApiResult};
use crate::replication::controller::ReplicationController;
use crate::replication::filter::filter_resources;
use crate::replication::model::{ReplicationPolicy, Resource, TriggerType};
use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Parse a cron expression with a leading seconds field
pub fn parse_cron(expression: &str) -> ApiResult<Schedule> {
    Schedule::from_str(expression.trim()).map_err(|e| ApiError::invalid_argument(format!("invalid cron string {:?}: {}", expression, e)))
}

/// What happened to an artifact on the local registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOperation {
    Push,
    Delete,
}

/// Artifact change that may start event-based replications
#[derive(Debug, Clone)]
pub struct ReplicationEvent {
    pub operation: EventOperation,
    pub resource: Resource,
}

impl ReplicationEvent {
    pub fn push(resource: Resource) -> Self {
        Self { operation: EventOperation::Push, resource }
    }

    pub fn delete(mut resource: Resource) -> Self {
        resource.deleted = true;
        Self { operation: EventOperation::Delete, resource }
    }
}

/// Fires policies whose trigger is a cron schedule or a registry event
///
/// Each armed schedule is one background task; dropping the manager cancels them.
pub struct TriggerManager {
    controller: Arc<ReplicationController>,
    runners: DashMap<i64, JoinHandle<()>>,
}

impl TriggerManager {
    pub fn new(controller: Arc<ReplicationController>) -> Self {
        Self { controller, runners: DashMap::new() }
    }

    pub fn controller(&self) -> &Arc<ReplicationController> {
        &self.controller
    }

    /// Arm the schedule of every stored policy; returns how many were armed
    pub async fn start_all(&self) -> ApiResult<usize> {
        let mut armed = 0;
        for policy in self.controller.policies().list().await? {
            match self.sync(&policy) {
                Ok(true) => armed += 1,
                Ok(false) => {}
                Err(e) => warn!(policy_id = policy.id, "Failed to arm scheduled trigger: {}", e),
            }
        }
        info!(armed, "Scheduled triggers started");
        Ok(armed)
    }

    /// Bring a policy's schedule in line with its current trigger; returns whether one is armed
    ///
    /// Call after creating, updating, enabling or disabling a policy.
    pub fn sync(&self, policy: &ReplicationPolicy) -> ApiResult<bool> {
        self.unschedule(policy.id);
        let Some(expression) = scheduled_cron(policy).filter(|_| policy.enabled) else {
            return Ok(false);
        };

        let schedule = parse_cron(expression)?;
        let runner = tokio::spawn(run_schedule(self.controller.clone(), policy.id, schedule));
        self.runners.insert(policy.id, runner);
        info!(policy_id = policy.id, cron = %expression, "Scheduled trigger armed");
        Ok(true)
    }

    /// Cancel the schedule of a policy, if any
    pub fn unschedule(&self, policy_id: i64) {
        if let Some((_, runner)) = self.runners.remove(&policy_id) {
            runner.abort();
            debug!(policy_id, "Scheduled trigger cancelled");
        }
    }

    pub fn is_scheduled(&self, policy_id: i64) -> bool {
        self.runners.contains_key(&policy_id)
    }

    /// Start every event-based policy the event concerns; returns the started execution ids
    pub async fn on_event(&self, event: &ReplicationEvent) -> ApiResult<Vec<i64>> {
        let mut started = Vec::new();
        for policy in self.controller.policies().list().await? {
            let Some(resources) = event_resources(&policy, event)? else {
                continue;
            };

            counter!("berth_replication_triggers_total", 1, "trigger" => "event_based");
            match self.controller.start(policy.id, TriggerType::EventBased, Some(resources)).await {
                Ok(execution_id) => {
                    info!(policy_id = policy.id, execution_id, repository = %event.resource.repository_name(), "Event-based replication started");
                    started.push(execution_id);
                }
                Err(e) => warn!(policy_id = policy.id, "Failed to start event-based replication: {}", e),
            }
        }
        Ok(started)
    }
}

impl Drop for TriggerManager {
    fn drop(&mut self) {
        for runner in self.runners.iter() {
            runner.value().abort();
        }
    }
}

fn scheduled_cron(policy: &ReplicationPolicy) -> Option<&str> {
    let trigger = policy.trigger.as_ref().filter(|t| t.trigger_type == TriggerType::Scheduled)?;
    trigger.settings.as_ref().map(|s| s.cron.as_str())
}

/// The event's resource as the policy would replicate it, or `None` when the policy ignores the event
///
/// Only enabled event-based policies replicating out of the local registry react to events.
fn event_resources(policy: &ReplicationPolicy, event: &ReplicationEvent) -> ApiResult<Option<Vec<Resource>>> {
    if !policy.enabled || policy.trigger_type() != TriggerType::EventBased || policy.src_registry_id.is_some() {
        return Ok(None);
    }
    if event.operation == EventOperation::Delete && !policy.replicate_deletion {
        return Ok(None);
    }

    let namespace = event.resource.namespace();
    if !policy.src_namespaces.is_empty() && !policy.src_namespaces.iter().any(|ns| ns == namespace) {
        return Ok(None);
    }

    let resources = filter_resources(vec![event.resource.clone()], &policy.filters)?;
    Ok((!resources.is_empty()).then_some(resources))
}

/// Start the policy at every instant the schedule names until the task is aborted
///
/// Instants are computed on the runtime clock anchored at the wall clock once.
async fn run_schedule(controller: Arc<ReplicationController>, policy_id: i64, schedule: Schedule) {
    let anchor = (Utc::now(), Instant::now());
    let now = || -> DateTime<Utc> { anchor.0 + chrono::Duration::from_std(anchor.1.elapsed()).unwrap_or_else(|_| chrono::Duration::zero()) };

    let mut last = now();
    while let Some(next) = schedule.after(&last).next() {
        sleep((next - now()).to_std().unwrap_or_default()).await;
        last = next;

        counter!("berth_replication_triggers_total", 1, "trigger" => "scheduled");
        match controller.start(policy_id, TriggerType::Scheduled, None).await {
            Ok(execution_id) => info!(policy_id, execution_id, "Scheduled replication started"),
            Err(e) => warn!(policy_id, "Scheduled replication did not start: {}", e),
        }
    }
    debug!(policy_id, "Schedule has no further instants");
}
