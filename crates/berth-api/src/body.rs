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

//! Body type flowing through the gateway's tower stack

use crate::error::{ApiError, ApiResult};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::Collected;
use std::future::Future;
use std::pin::Pin;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};

/// Upper bound of a request body buffered for the JSON API
pub const MAX_API_BODY: usize = 1024 * 1024;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Streaming body of requests and responses passing through the gateway
pub type GatewayBody = UnsyncBoxBody<Bytes, BoxError>;

pub fn full(body: Full<Bytes>) -> GatewayBody {
    body.map_err(|never| match never {}).boxed_unsync()
}

/// Box any body whose errors convert into [`BoxError`]
pub fn boxed<B>(body: B) -> GatewayBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(|e| e.into()).boxed_unsync()
}

pub fn full_response(response: Response<Full<Bytes>>) -> Response<GatewayBody> {
    response.map(full)
}

/// Buffer a request body for handlers that parse small JSON documents
pub async fn buffer(req: Request<GatewayBody>) -> ApiResult<Request<Full<Bytes>>> {
    let (parts, body) = req.into_parts();
    let collect: Pin<Box<dyn Future<Output = Result<Collected<Bytes>, BoxError>> + Send>> = Box::pin(Limited::new(body, MAX_API_BODY).collect());
    let bytes = collect
        .await
        .map_err(|e| ApiError::invalid_argument(format!("failed to read request body: {}", e)))?
        .to_bytes();
    Ok(Request::from_parts(parts, Full::new(bytes)))
}
