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

//! Authentication of request subjects

use crate::error::{ApiError, ApiResult};
use crate::rbac::LocalUser;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, pbkdf2};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, warn};

/// Authorization scheme used by internal components
pub const SECRET_SCHEME: &str = "Harbor-Secret";

const PBKDF2_ITERATIONS: u32 = 4096;
const SALT_LEN: usize = 16;

/// Registered user
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub sysadmin: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    salt: Vec<u8>,
    password_hash: Vec<u8>,
}

impl User {
    /// Identity used for principal assembly
    pub fn as_local_user(&self) -> LocalUser {
        LocalUser { user_id: self.user_id, username: self.username.clone() }
    }

    fn verify_password(&self, password: &str) -> bool {
        pbkdf2::verify(pbkdf2::PBKDF2_HMAC_SHA256, iterations(), &self.salt, password.as_bytes(), &self.password_hash).is_ok()
    }
}

fn iterations() -> NonZeroU32 {
    NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN)
}

/// Credentials presented in the `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    None,
    Basic { username: String, password: String },
    Secret(String),
    Bearer(String),
}

impl Credentials {
    /// Parse an `Authorization` header value
    pub fn parse(header: Option<&str>) -> ApiResult<Self> {
        let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
            return Ok(Credentials::None);
        };

        let (scheme, value) = header.split_once(' ').map(|(s, v)| (s, v.trim())).unwrap_or((header, ""));
        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = STANDARD.decode(value).map_err(|_| ApiError::unauthorized("malformed basic credentials"))?;
            let decoded = String::from_utf8(decoded).map_err(|_| ApiError::unauthorized("malformed basic credentials"))?;
            let (username, password) = decoded.split_once(':').ok_or_else(|| ApiError::unauthorized("malformed basic credentials"))?;
            Ok(Credentials::Basic { username: username.to_string(), password: password.to_string() })
        } else if scheme == SECRET_SCHEME {
            Ok(Credentials::Secret(value.to_string()))
        } else if scheme.eq_ignore_ascii_case("bearer") {
            Ok(Credentials::Bearer(value.to_string()))
        } else {
            Err(ApiError::unauthorized(format!("unsupported authorization scheme: {}", scheme)))
        }
    }

    /// Render as an `Authorization` header value
    pub fn to_header(&self) -> Option<String> {
        match self {
            Credentials::None => None,
            Credentials::Basic { username, password } => Some(format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))),
            Credentials::Secret(secret) => Some(format!("{} {}", SECRET_SCHEME, secret)),
            Credentials::Bearer(token) => Some(format!("Bearer {}", token)),
        }
    }
}

/// Verifies username and password pairs
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// The user when the credentials are valid, `None` otherwise
    async fn authenticate(&self, username: &str, password: &str) -> ApiResult<Option<User>>;

    /// Look a user up by name
    async fn get_user(&self, username: &str) -> ApiResult<Option<User>>;
}

/// User directory kept in process memory
#[derive(Debug)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
    next_id: AtomicI64,
    rng: SystemRandom,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self { users: RwLock::new(HashMap::new()), next_id: AtomicI64::new(1), rng: SystemRandom::new() }
    }

    /// Register a user, returning the stored record
    pub fn add_user(&self, username: &str, password: &str, sysadmin: bool) -> ApiResult<User> {
        let mut salt = vec![0u8; SALT_LEN];
        self.rng.fill(&mut salt).map_err(|_| ApiError::internal("failed to generate password salt"))?;
        let mut password_hash = vec![0u8; digest::SHA256_OUTPUT_LEN];
        pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations(), &salt, password.as_bytes(), &mut password_hash);

        let mut users = self.users.write();
        if users.contains_key(username) {
            return Err(ApiError::conflict(format!("user {} already exists", username)));
        }

        let user = User {
            user_id: self.next_id.fetch_add(1, Ordering::SeqCst),
            username: username.to_string(),
            sysadmin,
            active: true,
            created_at: Utc::now(),
            salt,
            password_hash,
        };
        users.insert(username.to_string(), user.clone());
        debug!(user = %username, sysadmin, "Registered user");
        Ok(user)
    }
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> ApiResult<Option<User>> {
        let user = self.users.read().get(username).cloned();
        match user {
            Some(user) if user.active && user.verify_password(password) => Ok(Some(user)),
            Some(_) => {
                warn!(user = %username, "Rejected credentials");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn get_user(&self, username: &str) -> ApiResult<Option<User>> {
        Ok(self.users.read().get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credentials() {
        assert_eq!(Credentials::parse(None).unwrap(), Credentials::None);
        assert_eq!(
            Credentials::parse(Some("Basic YWxpY2U6czNjcjN0")).unwrap(),
            Credentials::Basic { username: "alice".to_string(), password: "s3cr3t".to_string() }
        );
        assert_eq!(Credentials::parse(Some("Harbor-Secret abc")).unwrap(), Credentials::Secret("abc".to_string()));
        assert_eq!(Credentials::parse(Some("Bearer xyz")).unwrap(), Credentials::Bearer("xyz".to_string()));
        assert!(Credentials::parse(Some("Basic !!!")).is_err());
        assert!(Credentials::parse(Some("Digest foo")).is_err());
    }

    #[test]
    fn test_header_round_trip() {
        let creds = Credentials::Basic { username: "bob".to_string(), password: "pw:with:colons".to_string() };
        let header = creds.to_header().unwrap();
        assert_eq!(Credentials::parse(Some(&header)).unwrap(), creds);
    }

    #[tokio::test]
    async fn test_directory_authentication() {
        let directory = InMemoryUserDirectory::new();
        let alice = directory.add_user("alice", "Harbor12345", false).unwrap();
        assert!(directory.add_user("alice", "other", false).is_err());

        let found = directory.authenticate("alice", "Harbor12345").await.unwrap().unwrap();
        assert_eq!(found.user_id, alice.user_id);
        assert!(directory.authenticate("alice", "wrong").await.unwrap().is_none());
        assert!(directory.authenticate("nobody", "x").await.unwrap().is_none());
    }
}
