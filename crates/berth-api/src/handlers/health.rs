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

//! Health check handler

use crate::error::ApiResult;
use crate::handlers::json_response;
use crate::replication::health::check_registry;
use crate::replication::{HealthStatus, Registry, ReplicationController};
use crate::retry::RetryConfig;
use futures::future::join_all;
use http_body_util::Full;
use hyper::{Response, StatusCode, body::Bytes};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallHealth {
    pub status: String,
    pub components: Vec<ComponentHealth>,
}

fn label(healthy: bool) -> String {
    (if healthy { "healthy" } else { "unhealthy" }).to_string()
}

/// GET /api/v2.0/health
pub async fn health_check(controller: &ReplicationController, local: &Registry, retry: &RetryConfig) -> ApiResult<Response<Full<Bytes>>> {
    info!("Processing health check request");

    let mut registries = vec![local.clone()];
    registries.extend(controller.registries().list().await?);

    let statuses = join_all(registries.iter().map(|registry| check_registry(controller.adapters(), registry, retry))).await;

    let mut components = vec![ComponentHealth { name: "core".to_string(), status: label(true) }];
    components.extend(registries.iter().zip(&statuses).map(|(registry, status)| ComponentHealth {
        name: if registry.id == 0 { "registry".to_string() } else { format!("registry:{}", registry.name) },
        status: label(*status == HealthStatus::Healthy),
    }));

    let healthy = components.iter().all(|c| c.status == "healthy");
    let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    json_response(status_code, &OverallHealth { status: label(healthy), components })
}
