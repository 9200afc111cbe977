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

//! `WWW-Authenticate` challenges for denied v2 requests

use crate::v2auth::request::{Access, Target, scope_string};
use hyper::HeaderMap;
use hyper::header::{AUTHORIZATION, HOST};
use tracing::debug;
use url::Url;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Endpoints the token realm is derived from
#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    pub external_endpoint: String,
    pub core_url: String,
    pub registry_service: String,
}

impl ChallengeConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            external_endpoint: config.external_endpoint.trim_end_matches('/').to_string(),
            core_url: config.core_url.trim_end_matches('/').to_string(),
            registry_service: config.registry_service.clone(),
        }
    }

    /// Challenge for a denied request
    ///
    /// Requests that already carried credentials, and catalog requests, get a Basic challenge since
    /// a bearer token would not help them.
    pub fn challenge(&self, headers: &HeaderMap, target: &Target, accesses: &[Access]) -> String {
        if headers.contains_key(AUTHORIZATION) || *target == Target::Catalog {
            return format!("Basic realm=\"{}\"", self.registry_service);
        }

        let mut challenge = format!("Bearer realm=\"{}/service/token\",service=\"{}\"", self.token_endpoint_base(headers), self.registry_service);
        if !accesses.is_empty() {
            challenge.push_str(&format!(",scope=\"{}\"", scope_string(accesses)));
        }
        challenge
    }

    /// Endpoint clients should reach the token service on
    fn token_endpoint_base(&self, headers: &HeaderMap) -> String {
        let host = headers.get(HOST).and_then(|h| h.to_str().ok()).filter(|h| !h.is_empty());
        let Some(host) = host else {
            return self.external_endpoint.clone();
        };

        if host_matches(host, &self.core_url) {
            debug!(host = %host, "Request reached the core URL, using it as realm");
            return self.core_url.clone();
        }

        let scheme = headers
            .get(FORWARDED_PROTO)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| Url::parse(&self.external_endpoint).ok().map(|u| u.scheme().to_string()))
            .unwrap_or_else(|| "http".to_string());
        format!("{}://{}", scheme, host)
    }
}

/// Whether a `Host` header value addresses the server at `raw_url`
///
/// A host without a port is taken to use the default port of the URL's scheme.
pub fn host_matches(host: &str, raw_url: &str) -> bool {
    let Ok(url) = Url::parse(raw_url) else {
        return false;
    };
    let (Some(url_host), Some(url_port)) = (url.host_str(), url.port_or_known_default()) else {
        return false;
    };

    let (req_host, req_port) = match host.rsplit_once(':') {
        Some((h, p)) if !host.ends_with(']') => match p.parse::<u16>() {
            Ok(port) => (h, port),
            Err(_) => return false,
        },
        _ => (host, url_port_default(&url)),
    };

    req_host.eq_ignore_ascii_case(url_host) && req_port == url_port
}

fn url_port_default(url: &Url) -> u16 {
    match url.scheme() {
        "https" => 443,
        _ => 80,
    }
}
