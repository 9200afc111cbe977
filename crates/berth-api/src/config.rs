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

//! Configuration management for the registry gateway

use crate::error::{ApiError, ApiResult};
use crate::rate_limiting::check_rate;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the registry gateway
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the HTTP server to
    pub bind_address: String,

    /// Externally visible endpoint, used for the token realm
    pub external_endpoint: String,

    /// Internal URL of the core service
    pub core_url: String,

    /// Upstream registry that `/v2/` requests are proxied to
    pub registry_url: String,

    /// Job service that runs replication transfers
    pub jobservice_url: String,

    /// Service name registry tokens are issued for
    pub registry_service: String,

    /// Issuer name stamped into every token
    pub token_issuer: String,

    /// Token lifetime in minutes
    pub token_expiration_minutes: i64,

    /// PEM encoded RSA private key used to sign tokens
    pub private_key_path: PathBuf,

    /// PEM encoded public key used to validate tokens
    pub public_key_path: PathBuf,

    /// Shared secret accepted from internal components
    pub internal_secret: Option<String>,

    /// Password of the bootstrap `admin` account; no account is created when unset
    pub admin_password: Option<String>,

    /// How often the compiled pattern store is purged
    pub pattern_purge_interval: Duration,

    /// Upper bound of the random delay before the first purge
    pub pattern_purge_jitter: Duration,

    /// Outbound registry requests per second
    pub registry_rate_limit: f64,

    /// Burst allowance on top of the steady rate
    pub registry_rate_burst: u32,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            external_endpoint: "http://localhost:8080".to_string(),
            core_url: "http://core:8080".to_string(),
            registry_url: "http://registry:5000".to_string(),
            jobservice_url: "http://jobservice:8080".to_string(),
            registry_service: "harbor-registry".to_string(),
            token_issuer: "harbor-token-issuer".to_string(),
            token_expiration_minutes: 30,
            private_key_path: PathBuf::from("/etc/berth/private_key.pem"),
            public_key_path: PathBuf::from("/etc/berth/public_key.pem"),
            internal_secret: None,
            admin_password: None,
            pattern_purge_interval: Duration::from_secs(24 * 60 * 60),
            pattern_purge_jitter: Duration::from_secs(60 * 60),
            registry_rate_limit: 50.0,
            registry_rate_burst: 50,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_address: env::var("BERTH_BIND_ADDRESS").unwrap_or(defaults.bind_address),

            external_endpoint: env::var("BERTH_EXTERNAL_ENDPOINT").map(|v| v.trim_end_matches('/').to_string()).unwrap_or(defaults.external_endpoint),

            core_url: env::var("BERTH_CORE_URL").map(|v| v.trim_end_matches('/').to_string()).unwrap_or(defaults.core_url),

            registry_url: env::var("BERTH_REGISTRY_URL").map(|v| v.trim_end_matches('/').to_string()).unwrap_or(defaults.registry_url),

            jobservice_url: env::var("BERTH_JOBSERVICE_URL").map(|v| v.trim_end_matches('/').to_string()).unwrap_or(defaults.jobservice_url),

            registry_service: env::var("BERTH_REGISTRY_SERVICE").unwrap_or(defaults.registry_service),

            token_issuer: env::var("BERTH_TOKEN_ISSUER").unwrap_or(defaults.token_issuer),

            token_expiration_minutes: env::var("BERTH_TOKEN_EXPIRATION")
                .map(|v| v.parse().unwrap_or(defaults.token_expiration_minutes))
                .unwrap_or(defaults.token_expiration_minutes),

            private_key_path: env::var("BERTH_PRIVATE_KEY").map(PathBuf::from).unwrap_or(defaults.private_key_path),

            public_key_path: env::var("BERTH_PUBLIC_KEY").map(PathBuf::from).unwrap_or(defaults.public_key_path),

            internal_secret: env::var("BERTH_INTERNAL_SECRET").ok().filter(|s| !s.is_empty()),

            admin_password: env::var("BERTH_ADMIN_PASSWORD").ok().filter(|s| !s.is_empty()),

            pattern_purge_interval: env::var("BERTH_PATTERN_PURGE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.pattern_purge_interval),

            pattern_purge_jitter: env::var("BERTH_PATTERN_PURGE_JITTER_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.pattern_purge_jitter),

            registry_rate_limit: env::var("BERTH_REGISTRY_RATE_LIMIT").map(|v| v.parse().unwrap_or(defaults.registry_rate_limit)).unwrap_or(defaults.registry_rate_limit),

            registry_rate_burst: env::var("BERTH_REGISTRY_RATE_BURST").map(|v| v.parse().unwrap_or(defaults.registry_rate_burst)).unwrap_or(defaults.registry_rate_burst),

            request_timeout_secs: env::var("BERTH_REQUEST_TIMEOUT_SECS").map(|v| v.parse().unwrap_or(30)).unwrap_or(30),
        }
    }

    /// Reject settings the gateway cannot start with
    pub fn validate(&self) -> ApiResult<()> {
        check_rate(self.registry_rate_limit)?;
        if self.request_timeout_secs == 0 {
            return Err(ApiError::invalid_argument("request timeout must be at least one second"));
        }
        if self.token_expiration_minutes <= 0 {
            return Err(ApiError::invalid_argument("token expiration must be at least one minute"));
        }
        Ok(())
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// URL of the token endpoint advertised by default
    pub fn token_endpoint(&self) -> String {
        format!("{}/service/token", self.external_endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.registry_service, "harbor-registry");
        assert_eq!(config.token_issuer, "harbor-token-issuer");
        assert_eq!(config.token_expiration_minutes, 30);
        assert_eq!(config.pattern_purge_interval, Duration::from_secs(86400));
        assert_eq!(config.pattern_purge_jitter, Duration::from_secs(3600));
    }

    #[test]
    fn test_token_endpoint() {
        let config = Config { external_endpoint: "https://reg.example.com".to_string(), ..Config::default() };
        assert_eq!(config.token_endpoint(), "https://reg.example.com/service/token");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        for rate in [0.0, -5.0, f64::NAN] {
            let config = Config { registry_rate_limit: rate, ..Config::default() };
            assert!(matches!(config.validate(), Err(ApiError::InvalidArgument { .. })));
        }
        assert!(Config { request_timeout_secs: 0, ..Config::default() }.validate().is_err());
        assert!(Config { token_expiration_minutes: 0, ..Config::default() }.validate().is_err());
    }
}
