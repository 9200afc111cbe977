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

//! Submission of replication tasks to the job service

use crate::auth::SECRET_SCHEME;
use crate::error::{ApiError, ApiResult};
use crate::replication::model::Resource;
use crate::retry::classify_status;
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Job name the worker runs transfers under
pub const REPLICATION_JOB: &str = "REPLICATION";

/// A persisted task paired with the resources it moves
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleItem {
    pub task_id: i64,
    pub src_resource: Resource,
    pub dst_resource: Resource,
}

/// Outcome of one submission; exactly one of `job_id` and `error` is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleResult {
    pub task_id: i64,
    pub job_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub kind: String,
    pub is_unique: bool,
}

/// Job description understood by the job service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobData {
    pub name: String,
    pub parameters: HashMap<String, String>,
    pub metadata: JobMetadata,
    pub status_hook: String,
}

#[derive(Serialize)]
struct JobEnvelope<'a> {
    job: &'a JobData,
}

#[derive(Deserialize)]
struct JobStats {
    job: JobInfo,
}

#[derive(Deserialize)]
struct JobInfo {
    id: String,
}

/// Worker pool the scheduler hands jobs to
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Submit a job and return its id
    async fn submit(&self, job: &JobData) -> ApiResult<String>;

    async fn stop(&self, job_id: &str) -> ApiResult<()>;
}

/// Job service client over HTTP
pub struct HttpJobSubmitter {
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
}

impl HttpJobSubmitter {
    pub fn new(base_url: &str, secret: Option<String>, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), secret })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(format!("{}{}", self.base_url, path));
        match &self.secret {
            Some(secret) => builder.header(reqwest::header::AUTHORIZATION, format!("{} {}", SECRET_SCHEME, secret)),
            None => builder,
        }
    }
}

#[async_trait]
impl JobSubmitter for HttpJobSubmitter {
    async fn submit(&self, job: &JobData) -> ApiResult<String> {
        let response = self.request("/api/v1/jobs").json(&JobEnvelope { job }).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, format!("job submission failed: {}", body)));
        }
        let stats: JobStats = response.json().await?;
        Ok(stats.job.id)
    }

    async fn stop(&self, job_id: &str) -> ApiResult<()> {
        let response = self.request(&format!("/api/v1/jobs/{}", job_id)).json(&serde_json::json!({ "action": "stop" })).send().await?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), format!("failed to stop job {}", job_id)));
        }
        Ok(())
    }
}

/// Turns task records into worker jobs
pub struct Scheduler {
    submitter: Arc<dyn JobSubmitter>,
    core_url: String,
}

impl Scheduler {
    pub fn new(submitter: Arc<dyn JobSubmitter>, core_url: &str) -> Self {
        Self { submitter, core_url: core_url.trim_end_matches('/').to_string() }
    }

    /// URL the worker reports the status of a task to
    pub fn status_hook(&self, task_id: i64) -> String {
        format!("{}/service/notifications/jobs/replication/task/{}", self.core_url, task_id)
    }

    /// Pair source and destination resources into schedule items
    pub fn preprocess(&self, src: &[Resource], dst: &[Resource]) -> ApiResult<Vec<ScheduleItem>> {
        if src.len() != dst.len() {
            return Err(ApiError::invalid_argument(format!("{} source resources but {} destination resources", src.len(), dst.len())));
        }
        Ok(src.iter().zip(dst).map(|(s, d)| ScheduleItem { task_id: 0, src_resource: s.clone(), dst_resource: d.clone() }).collect())
    }

    fn job_for(&self, item: &ScheduleItem) -> ApiResult<JobData> {
        let mut parameters = HashMap::new();
        parameters.insert("src_resource".to_string(), serde_json::to_string(&item.src_resource)?);
        parameters.insert("dst_resource".to_string(), serde_json::to_string(&item.dst_resource)?);

        Ok(JobData {
            name: REPLICATION_JOB.to_string(),
            parameters,
            metadata: JobMetadata { kind: "Generic".to_string(), is_unique: false },
            status_hook: self.status_hook(item.task_id),
        })
    }

    /// Submit every item once; failures are reported per item
    pub async fn schedule(&self, items: &[ScheduleItem]) -> Vec<ScheduleResult> {
        let mut results = Vec::with_capacity(items.len());

        for item in items {
            let submitted = match self.job_for(item) {
                Ok(job) => self.submitter.submit(&job).await,
                Err(e) => Err(e),
            };

            match submitted {
                Ok(job_id) => {
                    counter!("berth_replication_jobs_submitted_total", 1, "result" => "ok");
                    debug!(task_id = item.task_id, job_id = %job_id, "Replication job submitted");
                    results.push(ScheduleResult { task_id: item.task_id, job_id: Some(job_id), error: None });
                }
                Err(e) => {
                    counter!("berth_replication_jobs_submitted_total", 1, "result" => "error");
                    error!(task_id = item.task_id, "Failed to submit replication job: {}", e);
                    results.push(ScheduleResult { task_id: item.task_id, job_id: None, error: Some(e.to_string()) });
                }
            }
        }

        results
    }

    pub async fn stop(&self, job_id: &str) -> ApiResult<()> {
        self.submitter.stop(job_id).await.inspect_err(|e| warn!(job_id = %job_id, "Failed to stop job: {}", e))
    }
}
