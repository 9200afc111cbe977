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

//! HTTP handlers

pub mod health;
pub mod registry;
pub mod replication;
pub mod token;

use crate::error::{ApiError, ApiResult};
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode, body::Bytes};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialize `body` into a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> ApiResult<Response<Full<Bytes>>> {
    let json = serde_json::to_string(body)?;
    Ok(Response::builder().status(status).header("content-type", "application/json").body(Full::new(Bytes::from(json)))?)
}

/// Decode the query string into key/value pairs, keeping repeated keys
pub fn query_pairs<B>(req: &Request<B>) -> Vec<(String, String)> {
    req.uri().query().map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect()).unwrap_or_default()
}

/// Parse the request body as JSON
pub async fn read_json<T: DeserializeOwned>(req: Request<Full<Bytes>>) -> ApiResult<T> {
    let body = req.into_body().collect().await.unwrap_or_else(|e| match e {}).to_bytes();
    serde_json::from_slice(&body).map_err(|e| ApiError::invalid_argument(format!("invalid request body: {}", e)))
}

/// Parse a numeric path segment
pub fn parse_id(segment: &str) -> ApiResult<i64> {
    segment.parse().map_err(|_| ApiError::invalid_argument(format!("invalid id: {}", segment)))
}
