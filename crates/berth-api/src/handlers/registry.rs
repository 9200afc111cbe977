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

//! Forwarding of `/v2/` traffic to the upstream registry

use crate::body::{BoxError, GatewayBody, boxed};
use crate::error::ApiResult;
use futures::TryStreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use hyper::{HeaderMap, Request, Response};
use std::time::Duration;
use tracing::debug;

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in [HOST, CONNECTION, TRANSFER_ENCODING] {
        headers.remove(name);
    }
}

/// Streaming reverse proxy in front of the registry
///
/// Bodies stream in both directions. The timeout bounds connecting only.
pub struct RegistryProxy {
    client: reqwest::Client,
    upstream: String,
}

impl RegistryProxy {
    pub fn new(upstream: &str, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder().connect_timeout(timeout).redirect(reqwest::redirect::Policy::none()).build()?;
        Ok(Self { client, upstream: upstream.trim_end_matches('/').to_string() })
    }

    /// Upstream URL for a request path and query
    pub fn target(&self, path_and_query: &str) -> String {
        format!("{}{}", self.upstream, path_and_query)
    }

    pub async fn forward(&self, req: Request<GatewayBody>) -> ApiResult<Response<GatewayBody>> {
        let (parts, body) = req.into_parts();
        let target = self.target(parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"));

        let mut headers = parts.headers;
        strip_hop_headers(&mut headers);
        debug!(method = %parts.method, target = %target, "Forwarding registry request");

        let mut request = self.client.request(parts.method, &target).headers(headers);
        if !body.is_end_stream() {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let upstream = request.send().await?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(response_headers) = response.headers_mut() {
            response_headers.extend(upstream.headers().clone());
            strip_hop_headers(response_headers);
        }
        let stream = upstream.bytes_stream().map_ok(Frame::data).map_err(|e| Box::new(e) as BoxError);
        Ok(response.body(boxed(StreamBody::new(stream)))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use hyper::body::{Bytes, Incoming};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    /// Upstream answering every request with the request's own body
    async fn echo_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<Incoming>| async move { Ok::<_, Infallible>(Response::new(req.into_body())) });
                    let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_target_keeps_query() {
        let proxy = RegistryProxy::new("http://registry:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(proxy.target("/v2/_catalog?n=10"), "http://registry:5000/v2/_catalog?n=10");
    }

    #[test]
    fn test_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, "gateway".parse().unwrap());
        headers.insert("docker-content-digest", "sha256:abc".parse().unwrap());
        strip_hop_headers(&mut headers);
        assert!(!headers.contains_key(HOST));
        assert!(headers.contains_key("docker-content-digest"));
    }

    #[tokio::test]
    async fn test_bodies_stream_through() {
        let proxy = RegistryProxy::new(&echo_upstream().await, Duration::from_secs(5)).unwrap();
        let chunks = stream::iter(vec![Ok::<_, BoxError>(Frame::data(Bytes::from_static(b"layer-"))), Ok(Frame::data(Bytes::from_static(b"bytes")))]);
        let req = Request::builder().method("PATCH").uri("/v2/library/ubuntu/blobs/uploads/abc").body(boxed(StreamBody::new(chunks))).unwrap();

        let response = proxy.forward(req).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), Bytes::from_static(b"layer-bytes"));
    }
}
