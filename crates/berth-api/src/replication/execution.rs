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

//! Execution and task records of replication runs

use crate::error::{ApiError, ApiResult};
use crate::replication::model::{Execution, ExecutionStatus, Task, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

/// Persistence of executions and their tasks
#[async_trait]
pub trait ExecutionManager: Send + Sync {
    async fn create(&self, execution: Execution) -> ApiResult<i64>;

    async fn get(&self, id: i64) -> ApiResult<Execution>;

    /// Executions, newest first, optionally restricted to one policy
    async fn list(&self, policy_id: Option<i64>) -> ApiResult<Vec<Execution>>;

    /// Write the execution status; terminal statuses also stamp the end time
    ///
    /// A finished execution keeps its status; returns false when the write was refused.
    async fn update_status(&self, id: i64, status: ExecutionStatus, status_text: &str) -> ApiResult<bool>;

    /// Remove an execution together with its tasks
    async fn remove(&self, id: i64) -> ApiResult<()>;

    /// Persist a batch of tasks; either every task is stored or none is
    async fn create_tasks(&self, tasks: Vec<Task>) -> ApiResult<Vec<i64>>;

    async fn get_task(&self, id: i64) -> ApiResult<Task>;

    async fn list_tasks(&self, execution_id: i64) -> ApiResult<Vec<Task>>;

    /// Move a task forward; returns false when the transition is not allowed
    async fn update_task_status(&self, id: i64, status: TaskStatus, status_text: &str) -> ApiResult<bool>;

    /// Record the job a task was submitted as and mark it pending
    async fn set_task_job(&self, id: i64, job_id: &str) -> ApiResult<()>;

    /// Recompute counters and, while the execution is running, its status
    async fn refresh_status(&self, execution_id: i64) -> ApiResult<Execution>;
}

/// Task counters of an execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub initialized: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub succeed: usize,
    pub failed: usize,
    pub stopped: usize,
}

impl TaskCounts {
    pub fn of<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            counts.total += 1;
            match task.status {
                TaskStatus::Initialized => counts.initialized += 1,
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Succeed => counts.succeed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Stopped => counts.stopped += 1,
            }
        }
        counts
    }

    /// Execution status implied by the task statuses
    pub fn status(&self) -> ExecutionStatus {
        if self.initialized + self.pending + self.in_progress > 0 {
            ExecutionStatus::InProgress
        } else if self.failed > 0 {
            ExecutionStatus::Failed
        } else if self.stopped > 0 {
            ExecutionStatus::Stopped
        } else {
            ExecutionStatus::Succeed
        }
    }

    fn apply(&self, execution: &mut Execution) {
        execution.total = self.total;
        execution.initialized = self.initialized;
        execution.pending = self.pending;
        execution.in_progress = self.in_progress;
        execution.succeed = self.succeed;
        execution.failed = self.failed;
        execution.stopped = self.stopped;
    }
}

#[derive(Default)]
struct Tables {
    executions: BTreeMap<i64, Execution>,
    tasks: BTreeMap<i64, Task>,
    next_execution_id: i64,
    next_task_id: i64,
}

/// Execution store kept in process memory
///
/// One lock guards both tables so batches and cascades are atomic.
#[derive(Default)]
pub struct InMemoryExecutionManager {
    tables: RwLock<Tables>,
}

impl InMemoryExecutionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

fn execution_not_found(id: i64) -> ApiError {
    ApiError::not_found(format!("execution {} not found", id))
}

fn task_not_found(id: i64) -> ApiError {
    ApiError::not_found(format!("task {} not found", id))
}

#[async_trait]
impl ExecutionManager for InMemoryExecutionManager {
    async fn create(&self, mut execution: Execution) -> ApiResult<i64> {
        let mut tables = self.tables.write();
        tables.next_execution_id += 1;
        execution.id = tables.next_execution_id;
        let id = execution.id;
        tables.executions.insert(id, execution);
        Ok(id)
    }

    async fn get(&self, id: i64) -> ApiResult<Execution> {
        self.tables.read().executions.get(&id).cloned().ok_or_else(|| execution_not_found(id))
    }

    async fn list(&self, policy_id: Option<i64>) -> ApiResult<Vec<Execution>> {
        let tables = self.tables.read();
        Ok(tables.executions.values().rev().filter(|e| policy_id.is_none_or(|p| e.policy_id == p)).cloned().collect())
    }

    async fn update_status(&self, id: i64, status: ExecutionStatus, status_text: &str) -> ApiResult<bool> {
        let mut tables = self.tables.write();
        let execution = tables.executions.get_mut(&id).ok_or_else(|| execution_not_found(id))?;
        if execution.status.is_terminal() {
            debug!(execution_id = id, from = ?execution.status, to = ?status, "Ignoring status of finished execution");
            return Ok(false);
        }

        execution.status = status;
        execution.status_text = status_text.to_string();
        if status.is_terminal() {
            execution.end_time = Some(Utc::now());
        }
        Ok(true)
    }

    async fn remove(&self, id: i64) -> ApiResult<()> {
        let mut tables = self.tables.write();
        tables.executions.remove(&id).ok_or_else(|| execution_not_found(id))?;
        tables.tasks.retain(|_, task| task.execution_id != id);
        Ok(())
    }

    async fn create_tasks(&self, tasks: Vec<Task>) -> ApiResult<Vec<i64>> {
        let mut tables = self.tables.write();
        if let Some(orphan) = tasks.iter().find(|t| !tables.executions.contains_key(&t.execution_id)) {
            return Err(execution_not_found(orphan.execution_id));
        }

        let mut ids = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            tables.next_task_id += 1;
            task.id = tables.next_task_id;
            ids.push(task.id);
            tables.tasks.insert(task.id, task);
        }
        Ok(ids)
    }

    async fn get_task(&self, id: i64) -> ApiResult<Task> {
        self.tables.read().tasks.get(&id).cloned().ok_or_else(|| task_not_found(id))
    }

    async fn list_tasks(&self, execution_id: i64) -> ApiResult<Vec<Task>> {
        Ok(self.tables.read().tasks.values().filter(|t| t.execution_id == execution_id).cloned().collect())
    }

    async fn update_task_status(&self, id: i64, status: TaskStatus, status_text: &str) -> ApiResult<bool> {
        let mut tables = self.tables.write();
        let task = tables.tasks.get_mut(&id).ok_or_else(|| task_not_found(id))?;

        if !task.status.can_transition_to(status) {
            debug!(task_id = id, from = ?task.status, to = ?status, "Ignoring task status transition");
            return Ok(false);
        }

        task.status = status;
        if !status_text.is_empty() {
            task.status_text = status_text.to_string();
        }
        let now = Utc::now();
        if status == TaskStatus::InProgress && task.start_time.is_none() {
            task.start_time = Some(now);
        }
        if status.is_terminal() {
            task.end_time = Some(now);
        }
        Ok(true)
    }

    async fn set_task_job(&self, id: i64, job_id: &str) -> ApiResult<()> {
        let mut tables = self.tables.write();
        let task = tables.tasks.get_mut(&id).ok_or_else(|| task_not_found(id))?;
        task.job_id = Some(job_id.to_string());
        if task.status.can_transition_to(TaskStatus::Pending) {
            task.status = TaskStatus::Pending;
        }
        task.start_time = Some(Utc::now());
        Ok(())
    }

    async fn refresh_status(&self, execution_id: i64) -> ApiResult<Execution> {
        let mut tables = self.tables.write();
        let counts = TaskCounts::of(tables.tasks.values().filter(|t| t.execution_id == execution_id));
        let execution = tables.executions.get_mut(&execution_id).ok_or_else(|| execution_not_found(execution_id))?;

        counts.apply(execution);
        if execution.status == ExecutionStatus::InProgress && counts.total > 0 {
            execution.status = counts.status();
            if execution.status.is_terminal() {
                execution.end_time = Some(Utc::now());
            }
        }
        Ok(execution.clone())
    }
}
