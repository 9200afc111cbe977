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

//! Replication management endpoints and worker callbacks

use crate::error::{ApiError, ApiResult};
use crate::handlers::{json_response, query_pairs, read_json};
use crate::replication::{Execution, ReplicationController, ReplicationEvent, Resource, Task, TriggerManager, TriggerType};
use crate::security::{SecurityContext, security_context};
use http_body_util::Full;
use hyper::header::LOCATION;
use hyper::{Request, Response, StatusCode, body::Bytes};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const EXECUTIONS_PATH: &str = "/api/v2.0/replication/executions";
pub const REGISTRY_EVENTS_PATH: &str = "/service/notifications";

#[derive(Debug, Deserialize)]
pub struct StartReplicationRequest {
    pub policy_id: i64,
}

/// Status report posted by the job service
#[derive(Debug, Deserialize, Serialize)]
pub struct TaskStatusReport {
    pub status: String,
    #[serde(default)]
    pub status_text: String,
}

/// Notification envelope posted by the registry
#[derive(Debug, Default, Deserialize)]
pub struct RegistryEnvelope {
    #[serde(default)]
    pub events: Vec<RegistryEvent>,
}

#[derive(Debug, Deserialize)]
pub struct RegistryEvent {
    pub action: String,
    pub target: EventTarget,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTarget {
    #[serde(default)]
    pub media_type: String,
    pub repository: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub digest: String,
}

impl RegistryEvent {
    /// Manifest pushes and deletions become replication events; pulls and blob traffic do not
    pub fn to_replication_event(&self) -> Option<ReplicationEvent> {
        let target = &self.target;
        if target.tag.is_empty() && !target.media_type.contains("manifest") {
            return None;
        }
        let reference = if target.tag.is_empty() { target.digest.as_str() } else { target.tag.as_str() };
        let resource = Resource::image(target.repository.as_str(), &[reference]);

        match self.action.as_str() {
            "push" => Some(ReplicationEvent::push(resource)),
            "delete" => Some(ReplicationEvent::delete(resource)),
            _ => None,
        }
    }
}

/// Management calls are open to system administrators and internal components
fn require_manager(ctx: &SecurityContext) -> ApiResult<()> {
    if ctx.is_sysadmin() || ctx.is_secret() {
        Ok(())
    } else if ctx.is_authenticated() {
        warn!(user = %ctx.username(), "Replication management denied");
        Err(ApiError::forbidden("system administrator privilege is required"))
    } else {
        Err(ApiError::unauthorized("authentication is required"))
    }
}

/// Error details stay with administrators
fn redact_execution(mut execution: Execution, ctx: &SecurityContext) -> Execution {
    if !ctx.is_sysadmin() {
        execution.status_text.clear();
    }
    execution
}

fn redact_tasks(tasks: Vec<Task>, ctx: &SecurityContext) -> Vec<Task> {
    tasks
        .into_iter()
        .map(|mut task| {
            if !ctx.is_sysadmin() {
                task.status_text.clear();
            }
            task
        })
        .collect()
}

/// POST /api/v2.0/replication/executions
pub async fn start_execution(req: Request<Full<Bytes>>, controller: &ReplicationController) -> ApiResult<Response<Full<Bytes>>> {
    let ctx = security_context(&req)?;
    require_manager(&ctx)?;

    let body: StartReplicationRequest = read_json(req).await?;
    let execution_id = controller.start(body.policy_id, TriggerType::Manual, None).await?;
    info!(user = %ctx.username(), policy_id = body.policy_id, execution_id, "Replication started");

    Ok(Response::builder().status(StatusCode::CREATED).header(LOCATION, format!("{}/{}", EXECUTIONS_PATH, execution_id)).body(Full::new(Bytes::new()))?)
}

/// GET /api/v2.0/replication/executions
pub async fn list_executions(req: Request<Full<Bytes>>, controller: &ReplicationController) -> ApiResult<Response<Full<Bytes>>> {
    let ctx = security_context(&req)?;
    require_manager(&ctx)?;

    let policy_id = match query_pairs(&req).into_iter().find(|(k, _)| k == "policy_id") {
        Some((_, v)) => Some(super::parse_id(&v)?),
        None => None,
    };
    let executions: Vec<Execution> = controller.list_executions(policy_id).await?.into_iter().map(|e| redact_execution(e, &ctx)).collect();
    json_response(StatusCode::OK, &executions)
}

/// GET /api/v2.0/replication/executions/{id}
pub async fn get_execution(req: Request<Full<Bytes>>, execution_id: i64, controller: &ReplicationController) -> ApiResult<Response<Full<Bytes>>> {
    let ctx = security_context(&req)?;
    require_manager(&ctx)?;

    let execution = controller.get_execution(execution_id).await?;
    json_response(StatusCode::OK, &redact_execution(execution, &ctx))
}

/// PUT /api/v2.0/replication/executions/{id}
pub async fn stop_execution(req: Request<Full<Bytes>>, execution_id: i64, controller: &ReplicationController) -> ApiResult<Response<Full<Bytes>>> {
    let ctx = security_context(&req)?;
    require_manager(&ctx)?;

    let execution = controller.stop(execution_id).await?;
    info!(user = %ctx.username(), execution_id, "Replication stop requested");
    json_response(StatusCode::OK, &redact_execution(execution, &ctx))
}

/// DELETE /api/v2.0/replication/executions/{id}
pub async fn delete_execution(req: Request<Full<Bytes>>, execution_id: i64, controller: &ReplicationController) -> ApiResult<Response<Full<Bytes>>> {
    let ctx = security_context(&req)?;
    require_manager(&ctx)?;

    controller.remove_execution(execution_id).await?;
    Ok(Response::builder().status(StatusCode::OK).body(Full::new(Bytes::new()))?)
}

/// GET /api/v2.0/replication/executions/{id}/tasks
pub async fn list_tasks(req: Request<Full<Bytes>>, execution_id: i64, controller: &ReplicationController) -> ApiResult<Response<Full<Bytes>>> {
    let ctx = security_context(&req)?;
    require_manager(&ctx)?;

    let tasks = controller.list_tasks(execution_id).await?;
    json_response(StatusCode::OK, &redact_tasks(tasks, &ctx))
}

/// POST /service/notifications/jobs/replication/task/{id}
///
/// Repeated reports for the same task are accepted and change nothing.
pub async fn task_status_hook(req: Request<Full<Bytes>>, task_id: i64, controller: &ReplicationController) -> ApiResult<Response<Full<Bytes>>> {
    let ctx = security_context(&req)?;
    require_manager(&ctx)?;

    let report: TaskStatusReport = read_json(req).await?;
    controller.handle_task_status(task_id, &report.status, &report.status_text).await?;
    Ok(Response::builder().status(StatusCode::OK).body(Full::new(Bytes::new()))?)
}

/// POST /service/notifications
///
/// Registry events start the event-based policies they concern.
pub async fn registry_events(req: Request<Full<Bytes>>, triggers: &TriggerManager) -> ApiResult<Response<Full<Bytes>>> {
    let ctx = security_context(&req)?;
    require_manager(&ctx)?;

    let envelope: RegistryEnvelope = read_json(req).await?;
    let mut started = 0;
    for event in envelope.events.iter().filter_map(RegistryEvent::to_replication_event) {
        started += triggers.on_event(&event).await?.len();
    }
    debug!(events = envelope.events.len(), started, "Registry notification handled");
    Ok(Response::builder().status(StatusCode::OK).body(Full::new(Bytes::new()))?)
}
