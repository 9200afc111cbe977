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

//! Registry token claims

use crate::token::scope::ResourceActions;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

const JTI_LEN: usize = 16;

/// Claims carried by a registry bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    pub iss: String,

    /// Authenticated username, empty for anonymous callers
    pub sub: String,

    /// Service the token is valid for
    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Unique token id
    pub jti: String,

    /// Granted access
    #[serde(default)]
    pub access: Vec<ResourceActions>,
}

impl Claims {
    /// Claims issued now and valid for `expires_in`
    pub fn new(issuer: &str, subject: &str, audience: &str, access: Vec<ResourceActions>, expires_in: Duration) -> Self {
        Self::issued_at(Utc::now(), issuer, subject, audience, access, expires_in)
    }

    pub fn issued_at(now: DateTime<Utc>, issuer: &str, subject: &str, audience: &str, access: Vec<ResourceActions>, expires_in: Duration) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: subject.to_string(),
            aud: audience.to_string(),
            exp: (now + expires_in).timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: generate_jti(),
            access,
        }
    }

    /// Issue time as a date
    pub fn issued_at_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or_else(Utc::now)
    }

    /// Seconds between issue and expiry
    pub fn expires_in(&self) -> i64 {
        self.exp - self.iat
    }
}

/// Random alphanumeric token id
pub fn generate_jti() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(JTI_LEN).map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_timestamps() {
        let now = Utc::now();
        let claims = Claims::issued_at(now, "harbor-token-issuer", "alice", "harbor-registry", vec![], Duration::minutes(30));
        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(claims.expires_in(), 1800);
        assert_eq!(claims.issued_at_time().timestamp(), now.timestamp());
    }

    #[test]
    fn test_jti_shape() {
        let jti = generate_jti();
        assert_eq!(jti.len(), 16);
        assert!(jti.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(jti, generate_jti());
    }

    #[test]
    fn test_access_serialization() {
        let claims = Claims::new("iss", "", "svc", vec![ResourceActions::new("repository", "library/ubuntu", &["pull"])], Duration::minutes(1));
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["access"][0]["type"], "repository");
        assert_eq!(json["access"][0]["actions"][0], "pull");
        assert_eq!(json["sub"], "");
    }
}
