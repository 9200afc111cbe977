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

//! Token endpoint

use crate::error::{ApiError, ApiResult};
use crate::handlers::{json_response, query_pairs};
use crate::security::security_context;
use crate::token::TokenService;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode, body::Bytes};
use tracing::{info, warn};

/// GET /service/token
///
/// Issues a token for the `scope` parameters, which may repeat and may each hold several
/// space-separated scopes. A caller whose credentials were rejected gets 401.
pub async fn issue_token(req: Request<Full<Bytes>>, tokens: &TokenService, default_service: &str) -> ApiResult<Response<Full<Bytes>>> {
    let ctx = security_context(&req)?;
    if let Some(reason) = ctx.rejection() {
        warn!("Token request with invalid credentials: {}", reason);
        return Err(ApiError::unauthorized(reason.to_string()));
    }

    let params = query_pairs(&req);
    let service = params.iter().find(|(k, _)| k == "service").map(|(_, v)| v.as_str()).unwrap_or(default_service);
    let scopes: Vec<&str> = params.iter().filter(|(k, _)| k == "scope").map(|(_, v)| v.as_str()).collect();

    info!(user = %ctx.username(), service = %service, scopes = scopes.len(), "Processing token request");
    let response = tokens.issue(&ctx, service, &scopes).await?;
    json_response(StatusCode::OK, &response)
}
