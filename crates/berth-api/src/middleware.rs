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

//! Request logging middleware

use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Response};
use metrics::{counter, histogram};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{error, info};
use uuid::Uuid;

/// Header carrying the id assigned to each request
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Request logging middleware
///
/// Reuses an incoming `X-Request-Id` or assigns a new one and echoes it on the response.
#[derive(Clone)]
pub struct LoggingMiddleware<S> {
    inner: S,
}

impl<S> LoggingMiddleware<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for LoggingMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();
        let method = req.method().clone();
        let uri = req.uri().clone();
        let start_time = Instant::now();

        let request_id = match req.headers().get(&REQUEST_ID_HEADER) {
            Some(value) => value.clone(),
            None => {
                let value = HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap_or_else(|_| HeaderValue::from_static("unknown"));
                req.headers_mut().insert(REQUEST_ID_HEADER.clone(), value.clone());
                value
            }
        };

        Box::pin(async move {
            let id = request_id.to_str().unwrap_or_default().to_string();
            info!(request_id = %id, "Request: {} {}", method, uri);

            let result = inner.call(req).await;
            let duration = start_time.elapsed();
            histogram!("berth_http_request_duration_seconds", duration.as_secs_f64());

            match result {
                Ok(mut response) => {
                    info!(request_id = %id, "Response: {} {} - {} in {:?}", method, uri, response.status(), duration);
                    counter!("berth_http_requests_total", 1, "status" => response.status().as_u16().to_string());
                    response.headers_mut().insert(REQUEST_ID_HEADER.clone(), request_id);
                    Ok(response)
                }
                Err(e) => {
                    let e: Box<dyn std::error::Error + Send + Sync> = e.into();
                    error!(request_id = %id, "Error: {} {} - {} in {:?}", method, uri, e, duration);
                    Err(e)
                }
            }
        })
    }
}

/// Logging middleware layer
#[derive(Clone, Default)]
pub struct LoggingLayer;

impl LoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingMiddleware::new(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Bytes;
    use std::convert::Infallible;
    use tower::{ServiceBuilder, ServiceExt, service_fn};

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let service = ServiceBuilder::new().layer(LoggingLayer::new()).service(service_fn(|req: Request<Full<Bytes>>| async move {
            assert!(req.headers().contains_key(&REQUEST_ID_HEADER));
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
        }));

        let req = Request::builder().uri("/v2/").header("x-request-id", "abc").body(Full::new(Bytes::new())).unwrap();
        let response = service.clone().oneshot(req).await.unwrap();
        assert_eq!(response.headers()[&REQUEST_ID_HEADER], "abc");

        let req = Request::builder().uri("/v2/").body(Full::new(Bytes::new())).unwrap();
        let response = service.oneshot(req).await.unwrap();
        assert_eq!(response.headers()[&REQUEST_ID_HEADER].len(), 36);
    }
}
