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

//! Entry point of replication: starting, stopping and tracking executions

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::replication::adapter::AdapterRegistry;
use crate::replication::execution::ExecutionManager;
use crate::replication::flow::CopyFlow;
use crate::replication::model::{Credential, CredentialType, Execution, ExecutionStatus, Registry, Resource, Task, TaskStatus, TriggerType};
use crate::replication::native;
use crate::replication::scheduler::Scheduler;
use crate::replication::store::{PolicyManager, RegistryManager};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry a policy refers to when it leaves the source or destination unset
pub fn local_registry(config: &Config) -> Registry {
    Registry {
        id: 0,
        name: "Local".to_string(),
        registry_type: native::REGISTRY_TYPE.to_string(),
        url: config.registry_url.clone(),
        credential: config.internal_secret.as_ref().map(|secret| Credential {
            credential_type: CredentialType::Secret,
            access_key: String::new(),
            access_secret: secret.clone(),
        }),
        insecure: true,
    }
}

pub struct ReplicationController {
    policies: Arc<dyn PolicyManager>,
    registries: Arc<dyn RegistryManager>,
    adapters: Arc<AdapterRegistry>,
    executions: Arc<dyn ExecutionManager>,
    scheduler: Arc<Scheduler>,
    local: Registry,
}

impl ReplicationController {
    pub fn new(
        policies: Arc<dyn PolicyManager>,
        registries: Arc<dyn RegistryManager>,
        adapters: Arc<AdapterRegistry>,
        executions: Arc<dyn ExecutionManager>,
        scheduler: Arc<Scheduler>,
        local: Registry,
    ) -> Self {
        Self { policies, registries, adapters, executions, scheduler, local }
    }

    pub fn policies(&self) -> &Arc<dyn PolicyManager> {
        &self.policies
    }

    pub fn registries(&self) -> &Arc<dyn RegistryManager> {
        &self.registries
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    async fn registry(&self, id: Option<i64>) -> ApiResult<Registry> {
        match id {
            Some(id) => self.registries.get(id).await,
            None => Ok(self.local.clone()),
        }
    }

    /// Resolve the policy and its registries, then open the execution record
    async fn prepare(&self, policy_id: i64, trigger: TriggerType, resources: Option<Vec<Resource>>) -> ApiResult<(i64, CopyFlow)> {
        let policy = self.policies.get(policy_id).await?;
        if !policy.enabled {
            return Err(ApiError::invalid_argument(format!("policy {} is disabled", policy_id)));
        }

        let src_registry = self.registry(policy.src_registry_id).await?;
        let dst_registry = self.registry(policy.dest_registry_id).await?;
        let src_adapter = self.adapters.create(&src_registry)?;
        let dst_adapter = self.adapters.create(&dst_registry)?;

        let execution_id = self.executions.create(Execution::new(policy.id, trigger)).await?;
        debug!(execution_id, policy_id, "Execution created");

        let flow = CopyFlow {
            policy,
            src_adapter,
            dst_adapter,
            dst_registry,
            executions: self.executions.clone(),
            scheduler: self.scheduler.clone(),
            resources,
        };
        Ok((execution_id, flow))
    }

    /// Start an execution in the background and return its id
    pub async fn start(&self, policy_id: i64, trigger: TriggerType, resources: Option<Vec<Resource>>) -> ApiResult<i64> {
        let (execution_id, flow) = self.prepare(policy_id, trigger, resources).await?;
        info!(execution_id, policy_id, trigger = %trigger, "Starting replication");

        tokio::spawn(async move {
            // Failures are already recorded on the execution
            let _ = flow.run(execution_id).await;
        });
        Ok(execution_id)
    }

    /// Run an execution up to job submission and return its record
    pub async fn execute(&self, policy_id: i64, trigger: TriggerType, resources: Option<Vec<Resource>>) -> ApiResult<Execution> {
        let (execution_id, flow) = self.prepare(policy_id, trigger, resources).await?;
        if let Err(e) = flow.run(execution_id).await {
            debug!(execution_id, "Execution ended with error: {}", e);
        }
        self.executions.get(execution_id).await
    }

    /// Mark an execution stopped and stop every unfinished task
    ///
    /// A flow still running for the execution sees the status and submits nothing further.
    /// Stopping jobs on the worker is best effort.
    pub async fn stop(&self, execution_id: i64) -> ApiResult<Execution> {
        if !self.executions.update_status(execution_id, ExecutionStatus::Stopped, "").await? {
            let execution = self.executions.get(execution_id).await?;
            debug!(execution_id, status = ?execution.status, "Execution already finished");
            return Ok(execution);
        }

        for task in self.executions.list_tasks(execution_id).await? {
            if task.status.is_terminal() {
                continue;
            }
            if let Some(job_id) = &task.job_id {
                if let Err(e) = self.scheduler.stop(job_id).await {
                    warn!(execution_id, task_id = task.id, "Failed to stop job {}: {}", job_id, e);
                }
            }
            self.executions.update_task_status(task.id, TaskStatus::Stopped, "").await?;
        }

        self.executions.refresh_status(execution_id).await?;
        info!(execution_id, "Execution stopped");
        self.executions.get(execution_id).await
    }

    /// Apply a status reported by the worker; duplicates and late reports leave the task as is
    pub async fn handle_task_status(&self, task_id: i64, status: &str, status_text: &str) -> ApiResult<Execution> {
        let status: TaskStatus = status.parse()?;
        let task = self.executions.get_task(task_id).await?;

        if self.executions.update_task_status(task_id, status, status_text).await? {
            debug!(task_id, status = ?status, "Task status updated");
        }
        self.executions.refresh_status(task.execution_id).await
    }

    pub async fn get_execution(&self, execution_id: i64) -> ApiResult<Execution> {
        self.executions.get(execution_id).await
    }

    pub async fn list_executions(&self, policy_id: Option<i64>) -> ApiResult<Vec<Execution>> {
        self.executions.list(policy_id).await
    }

    pub async fn list_tasks(&self, execution_id: i64) -> ApiResult<Vec<Task>> {
        self.executions.get(execution_id).await?;
        self.executions.list_tasks(execution_id).await
    }

    /// Remove a finished execution with its tasks
    pub async fn remove_execution(&self, execution_id: i64) -> ApiResult<()> {
        let execution = self.executions.get(execution_id).await?;
        if !execution.status.is_terminal() {
            return Err(ApiError::conflict(format!("execution {} is still in progress", execution_id)));
        }
        self.executions.remove(execution_id).await
    }
}
