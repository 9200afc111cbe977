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

mod common;

use berth_api::error::ApiError;
use berth_api::replication::model::{Filter, FilterType, Operation, ReplicationPolicy, Resource};
use berth_api::replication::{ExecutionStatus, TaskStatus, TriggerType};
use common::{FakeAdapter, FakeSubmitter, replication, replication_from};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn hello_world() -> Vec<Resource> {
    vec![Resource::image("library/hello-world", &["latest"])]
}

#[tokio::test]
async fn test_mirror_replication_happy_path() {
    let rep = replication(hello_world(), FakeSubmitter::default()).await;
    let policy_id = rep.mirror_policy().await;

    let execution = rep.controller.execute(policy_id, TriggerType::Manual, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::InProgress);
    assert_eq!(execution.total, 1);
    assert_eq!(execution.pending, 1);

    assert_eq!(*rep.destination.namespaces.lock(), vec!["mirror".to_string()]);

    let tasks = rep.controller.list_tasks(execution.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.execution_id, execution.id);
    assert_eq!(task.src_resource, "library/hello-world:[latest]");
    assert_eq!(task.dst_resource, "mirror/hello-world:[latest]");
    assert_eq!(task.operation, Operation::Copy);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.job_id.as_deref(), Some("job-1"));

    let submitted = rep.submitter.submitted.lock();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].name, "REPLICATION");
    assert_eq!(submitted[0].status_hook, format!("http://core:8080/service/notifications/jobs/replication/task/{}", task.id));
    let src: serde_json::Value = serde_json::from_str(&submitted[0].parameters["src_resource"]).unwrap();
    assert_eq!(src["metadata"]["repository"]["name"], "library/hello-world");
    let dst: serde_json::Value = serde_json::from_str(&submitted[0].parameters["dst_resource"]).unwrap();
    assert_eq!(dst["metadata"]["repository"]["name"], "mirror/hello-world");
}

#[tokio::test]
async fn test_all_submissions_failing_fails_execution() {
    let rep = replication(hello_world(), FakeSubmitter { fail: true, ..Default::default() }).await;
    let policy_id = rep.mirror_policy().await;

    let execution = rep.controller.execute(policy_id, TriggerType::Manual, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(!execution.status_text.is_empty());
    assert_eq!(execution.failed, 1);
    assert!(execution.end_time.is_some());

    let tasks = rep.controller.list_tasks(execution.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert!(tasks[0].status_text.contains("job service unavailable"));
    assert!(tasks[0].job_id.is_none());
}

#[tokio::test]
async fn test_execution_completes_from_callbacks() {
    let resources = vec![Resource::image("library/a", &["1"]), Resource::image("library/b", &["1", "2"])];
    let rep = replication(resources, FakeSubmitter::default()).await;
    let policy_id = rep.mirror_policy().await;
    let execution = rep.controller.execute(policy_id, TriggerType::Manual, None).await.unwrap();

    let tasks = rep.controller.list_tasks(execution.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.execution_id == execution.id));

    let running = rep.controller.handle_task_status(tasks[0].id, "Running", "").await.unwrap();
    assert_eq!(running.status, ExecutionStatus::InProgress);
    assert_eq!(running.in_progress, 1);

    rep.controller.handle_task_status(tasks[0].id, "Success", "").await.unwrap();
    let done = rep.controller.handle_task_status(tasks[1].id, "Success", "").await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Succeed);
    assert_eq!(done.succeed, 2);

    // Duplicate and out of order deliveries change nothing
    let again = rep.controller.handle_task_status(tasks[1].id, "Running", "").await.unwrap();
    assert_eq!(again, done);
}

#[tokio::test]
async fn test_unknown_callback_status_is_rejected() {
    let rep = replication(hello_world(), FakeSubmitter::default()).await;
    let policy_id = rep.mirror_policy().await;
    let execution = rep.controller.execute(policy_id, TriggerType::Manual, None).await.unwrap();
    let tasks = rep.controller.list_tasks(execution.id).await.unwrap();

    let result = rep.controller.handle_task_status(tasks[0].id, "Exploded", "").await;
    assert!(matches!(result, Err(ApiError::InvalidArgument { .. })));
    assert!(matches!(rep.controller.handle_task_status(999, "Success", "").await, Err(ApiError::NotFound { .. })));
}

#[tokio::test]
async fn test_stop_marks_unfinished_tasks() {
    let resources = vec![Resource::image("library/a", &["1"]), Resource::image("library/b", &["1"])];
    let rep = replication(resources, FakeSubmitter::default()).await;
    let policy_id = rep.mirror_policy().await;
    let execution = rep.controller.execute(policy_id, TriggerType::Manual, None).await.unwrap();
    let tasks = rep.controller.list_tasks(execution.id).await.unwrap();
    rep.controller.handle_task_status(tasks[0].id, "Success", "").await.unwrap();

    let stopped = rep.controller.stop(execution.id).await.unwrap();
    assert_eq!(stopped.status, ExecutionStatus::Stopped);
    assert_eq!(stopped.succeed, 1);
    assert_eq!(stopped.stopped, 1);
    assert_eq!(*rep.submitter.stopped.lock(), vec![tasks[1].job_id.clone().unwrap()]);

    // Stopping twice is harmless; late reports leave the stopped task alone
    assert_eq!(rep.controller.stop(execution.id).await.unwrap().status, ExecutionStatus::Stopped);
    rep.controller.handle_task_status(tasks[1].id, "Success", "").await.unwrap();
    let tasks = rep.controller.list_tasks(execution.id).await.unwrap();
    assert_eq!(tasks[1].status, TaskStatus::Stopped);
}

#[tokio::test]
async fn test_stop_during_discovery_cancels_the_run() {
    let gate = Arc::new(Notify::new());
    let source = FakeAdapter { resources: hello_world(), gate: Some(gate.clone()), ..Default::default() };
    let rep = replication_from(source, FakeSubmitter::default()).await;
    let policy_id = rep.mirror_policy().await;

    let execution_id = rep.controller.start(policy_id, TriggerType::Manual, None).await.unwrap();
    let stopped = rep.controller.stop(execution_id).await.unwrap();
    assert_eq!(stopped.status, ExecutionStatus::Stopped);

    gate.notify_one();
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let execution = rep.controller.get_execution(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Stopped);
    assert_eq!(execution.end_time, stopped.end_time);
    assert!(rep.controller.list_tasks(execution_id).await.unwrap().is_empty());
    assert!(rep.submitter.submitted.lock().is_empty());
    assert!(rep.destination.namespaces.lock().is_empty());
}

#[tokio::test]
async fn test_in_progress_execution_cannot_be_removed() {
    let rep = replication(hello_world(), FakeSubmitter::default()).await;
    let policy_id = rep.mirror_policy().await;
    let execution = rep.controller.execute(policy_id, TriggerType::Manual, None).await.unwrap();

    assert!(matches!(rep.controller.remove_execution(execution.id).await, Err(ApiError::Conflict { .. })));
    rep.controller.stop(execution.id).await.unwrap();
    rep.controller.remove_execution(execution.id).await.unwrap();
    assert!(rep.controller.list_tasks(execution.id).await.is_err());
}

#[tokio::test]
async fn test_filters_narrow_replicated_resources() {
    let resources = vec![Resource::image("library/hello-world", &["latest", "1.0", "dev"]), Resource::image("library/busybox", &["latest"])];
    let rep = replication(resources, FakeSubmitter::default()).await;

    let mut policy = ReplicationPolicy::new("filtered");
    policy.src_registry_id = Some(rep.src_registry_id);
    policy.dest_registry_id = Some(rep.dst_registry_id);
    policy.filters = vec![Filter::new(FilterType::Name, "library/hello-*"), Filter::new(FilterType::Tag, "{latest,1.0}")];
    let policy_id = rep.controller.policies().create(policy).await.unwrap();

    let execution = rep.controller.execute(policy_id, TriggerType::Manual, None).await.unwrap();
    let tasks = rep.controller.list_tasks(execution.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].src_resource, "library/hello-world:[latest ... 2 in total]");
    assert_eq!(tasks[0].dst_resource, tasks[0].src_resource);
    assert_eq!(*rep.destination.namespaces.lock(), vec!["library".to_string()]);
}

#[tokio::test]
async fn test_disabled_policy_does_not_start() {
    let rep = replication(hello_world(), FakeSubmitter::default()).await;
    let policy_id = rep.mirror_policy().await;
    let mut policy = rep.controller.policies().get(policy_id).await.unwrap();
    policy.enabled = false;
    rep.controller.policies().update(policy).await.unwrap();

    assert!(matches!(rep.controller.start(policy_id, TriggerType::Manual, None).await, Err(ApiError::InvalidArgument { .. })));
    assert!(rep.controller.list_executions(Some(policy_id)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_started_execution_runs_in_background() {
    let rep = replication(hello_world(), FakeSubmitter::default()).await;
    let policy_id = rep.mirror_policy().await;

    let execution_id = rep.controller.start(policy_id, TriggerType::Manual, None).await.unwrap();
    let mut tasks = Vec::new();
    for _ in 0..100 {
        tasks = rep.controller.list_tasks(execution_id).await.unwrap();
        if tasks.iter().any(|t| t.job_id.is_some()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].job_id.as_deref(), Some("job-1"));

    let listed = rep.controller.list_executions(Some(policy_id)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, execution_id);
}
