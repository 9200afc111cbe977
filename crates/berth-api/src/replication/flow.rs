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

//! The copy flow: one execution of a replication policy from discovery to job submission

use crate::error::ApiResult;
use crate::replication::adapter::Adapter;
use crate::replication::execution::ExecutionManager;
use crate::replication::filter::{filter_resources, selected_resource_types};
use crate::replication::model::{ExecutionStatus, FilterType, Namespace, Registry, ReplicationPolicy, Repository, Resource, ResourceMetadata, Task, TaskStatus, replace_namespace, split_repository};
use crate::replication::scheduler::{ScheduleItem, Scheduler};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

pub const NO_RESOURCES: &str = "no resources need to be replicated";

/// Everything one run of a policy needs
pub struct CopyFlow {
    pub policy: ReplicationPolicy,
    pub src_adapter: Arc<dyn Adapter>,
    pub dst_adapter: Arc<dyn Adapter>,
    pub dst_registry: Registry,
    pub executions: Arc<dyn ExecutionManager>,
    pub scheduler: Arc<Scheduler>,
    /// Resources handed over by an event; discovery is skipped when set
    pub resources: Option<Vec<Resource>>,
}

impl CopyFlow {
    /// Drive the execution until its jobs are submitted; returns the number of jobs submitted
    ///
    /// A failing step writes its error into the execution and stops the flow.
    pub async fn run(self, execution_id: i64) -> ApiResult<usize> {
        match self.steps(execution_id).await {
            Ok(submitted) => Ok(submitted),
            Err(e) => {
                error!(execution_id, policy_id = self.policy.id, "Replication failed: {}", e);
                self.executions.update_status(execution_id, ExecutionStatus::Failed, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn steps(&self, execution_id: i64) -> ApiResult<usize> {
        let src_resources = self.fetch_resources().await?;
        if src_resources.is_empty() {
            info!(execution_id, "No resources to replicate");
            self.executions.update_status(execution_id, ExecutionStatus::Succeed, NO_RESOURCES).await?;
            return Ok(0);
        }
        debug!(execution_id, count = src_resources.len(), "Fetched source resources");
        if !self.still_running(execution_id).await? {
            return Ok(0);
        }

        let dst_resources = self.assemble(&src_resources);
        self.create_namespaces(&src_resources, &dst_resources).await?;
        debug!(execution_id, "Destination namespaces ready");

        let mut items = self.scheduler.preprocess(&src_resources, &dst_resources)?;
        if !self.still_running(execution_id).await? {
            return Ok(0);
        }
        let tasks = items.iter().map(|item| Task::new(execution_id, &item.src_resource, &item.dst_resource)).collect();
        let ids = self.executions.create_tasks(tasks).await?;
        for (item, id) in items.iter_mut().zip(ids) {
            item.task_id = id;
        }
        debug!(execution_id, tasks = items.len(), "Tasks created");

        if !self.still_running(execution_id).await? {
            return Ok(0);
        }
        self.schedule(execution_id, items).await
    }

    /// False once the execution was stopped or otherwise finished behind the flow's back
    async fn still_running(&self, execution_id: i64) -> ApiResult<bool> {
        let status = self.executions.get(execution_id).await?.status;
        if status.is_terminal() {
            info!(execution_id, status = ?status, "Execution finished while the flow was running");
            return Ok(false);
        }
        Ok(true)
    }

    async fn fetch_resources(&self) -> ApiResult<Vec<Resource>> {
        let resources = match &self.resources {
            Some(resources) => resources.clone(),
            None => {
                let types = match selected_resource_types(&self.policy.filters)? {
                    Some(types) => types,
                    None => self.src_adapter.info().supported_resource_types,
                };
                let filters: Vec<_> = self.policy.filters.iter().filter(|f| f.filter_type != FilterType::Resource).cloned().collect();

                self.src_adapter
                    .fetch_resources(&self.policy.src_namespaces, &filters)
                    .await?
                    .into_iter()
                    .filter(|r| types.contains(&r.resource_type))
                    .collect()
            }
        };

        let resources = filter_resources(resources, &self.policy.filters)?;
        Ok(resources.into_iter().filter(|r| !r.deleted || self.policy.replicate_deletion).collect())
    }

    /// Destination counterpart of every source resource
    fn assemble(&self, src_resources: &[Resource]) -> Vec<Resource> {
        src_resources
            .iter()
            .map(|src| Resource {
                resource_type: src.resource_type,
                metadata: ResourceMetadata {
                    repository: Repository {
                        name: replace_namespace(src.repository_name(), &self.policy.dest_namespace),
                        metadata: src.metadata.repository.metadata.clone(),
                    },
                    vtags: src.metadata.vtags.clone(),
                },
                registry: Some(self.dst_registry.clone()),
                extended_info: src.extended_info.clone(),
                deleted: src.deleted,
                override_existing: self.policy.override_existing,
            })
            .collect()
    }

    /// Create each destination namespace once, carrying the source namespace's metadata
    async fn create_namespaces(&self, src_resources: &[Resource], dst_resources: &[Resource]) -> ApiResult<()> {
        let mut wanted: BTreeMap<&str, &str> = BTreeMap::new();
        for (src, dst) in src_resources.iter().zip(dst_resources) {
            let namespace = split_repository(dst.repository_name()).0;
            if !namespace.is_empty() {
                wanted.entry(namespace).or_insert_with(|| src.namespace());
            }
        }

        for (name, src_namespace) in wanted {
            let metadata = if src_namespace.is_empty() { Default::default() } else { self.src_adapter.get_namespace(src_namespace).await?.metadata };
            self.dst_adapter.create_namespace(&Namespace { name: name.to_string(), metadata }).await?;
            debug!(namespace = %name, "Namespace created on the destination registry");
        }
        Ok(())
    }

    async fn schedule(&self, execution_id: i64, items: Vec<ScheduleItem>) -> ApiResult<usize> {
        // Only tasks still initialized are submitted
        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            if self.executions.get_task(item.task_id).await?.status == TaskStatus::Initialized {
                pending.push(item);
            }
        }

        let results = self.scheduler.schedule(&pending).await;
        let mut submitted = 0;
        let mut first_error = None;

        for result in &results {
            match (&result.job_id, &result.error) {
                (Some(job_id), None) => {
                    self.executions.set_task_job(result.task_id, job_id).await?;
                    submitted += 1;
                }
                (_, error) => {
                    let message = error.clone().unwrap_or_else(|| "job submission returned no job id".to_string());
                    self.executions.update_task_status(result.task_id, TaskStatus::Failed, &message).await?;
                    first_error.get_or_insert(message);
                }
            }
        }

        if submitted == 0 && !results.is_empty() {
            let text = format!("all tasks failed to be scheduled: {}", first_error.unwrap_or_default());
            self.executions.update_status(execution_id, ExecutionStatus::Failed, &text).await?;
            self.executions.refresh_status(execution_id).await?;
            return Ok(0);
        }

        self.executions.refresh_status(execution_id).await?;
        info!(execution_id, submitted, failed = results.len() - submitted, "Replication jobs submitted");
        Ok(submitted)
    }
}
