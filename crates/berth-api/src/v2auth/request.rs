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

//! Classification of registry v2 requests into the access they require

use crate::rbac::Action;
use hyper::Method;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

const NAME: &str = r"[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*)*";
const TAG: &str = r"[\w][\w.-]{0,127}";
const DIGEST: &str = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";

static CATALOG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/v2/_catalog(/.*)?$").expect("static catalog pattern"));
static MANIFEST_RE: LazyLock<Regex> = LazyLock::new(|| compile(&format!(r"^/v2/(?P<name>{NAME})/manifests/(?P<reference>{TAG}|{DIGEST})$")));
static TAG_LIST_RE: LazyLock<Regex> = LazyLock::new(|| compile(&format!(r"^/v2/(?P<name>{NAME})/tags/list$")));
static BLOB_UPLOAD_RE: LazyLock<Regex> = LazyLock::new(|| compile(&format!(r"^/v2/(?P<name>{NAME})/blobs/uploads(?:/.*)?$")));
static BLOB_RE: LazyLock<Regex> = LazyLock::new(|| compile(&format!(r"^/v2/(?P<name>{NAME})/blobs/(?P<reference>{DIGEST})$")));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static v2 route pattern")
}

/// Source of a cross-repository blob mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMount {
    pub repository: String,
    pub project_name: String,
    pub digest: String,
}

/// Repository addressed by a v2 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub repository: String,
    pub project_name: String,
    pub reference: Option<String>,
    pub mount: Option<BlobMount>,
}

impl ArtifactInfo {
    fn new(repository: &str, reference: Option<&str>) -> Self {
        Self { repository: repository.to_string(), project_name: project_of(repository), reference: reference.map(str::to_string), mount: None }
    }
}

/// Project name of a repository: its first path segment
pub fn project_of(repository: &str) -> String {
    repository.split('/').next().unwrap_or_default().to_string()
}

/// What a v2 request is aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Login,
    Catalog,
    Repository(ArtifactInfo),
    Unknown,
}

impl Target {
    /// Classify a request path and query
    pub fn classify(method: &Method, path: &str, query: Option<&str>) -> Self {
        if path == "/v2/" || path == "/v2" {
            return Target::Login;
        }
        if CATALOG_RE.is_match(path) {
            return Target::Catalog;
        }

        if let Some(caps) = MANIFEST_RE.captures(path) {
            return Target::Repository(ArtifactInfo::new(&caps["name"], Some(&caps["reference"])));
        }
        if let Some(caps) = TAG_LIST_RE.captures(path) {
            return Target::Repository(ArtifactInfo::new(&caps["name"], None));
        }
        if let Some(caps) = BLOB_UPLOAD_RE.captures(path) {
            let mut info = ArtifactInfo::new(&caps["name"], None);
            if *method == Method::POST {
                info.mount = query.and_then(parse_mount);
            }
            return Target::Repository(info);
        }
        if let Some(caps) = BLOB_RE.captures(path) {
            return Target::Repository(ArtifactInfo::new(&caps["name"], Some(&caps["reference"])));
        }

        Target::Unknown
    }
}

fn parse_mount(query: &str) -> Option<BlobMount> {
    let mut digest = None;
    let mut from = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "mount" => digest = Some(value.into_owned()),
            "from" => from = Some(value.into_owned()),
            _ => {}
        }
    }

    let (digest, repository) = (digest?, from?);
    if repository.is_empty() {
        return None;
    }
    Some(BlobMount { project_name: project_of(&repository), repository, digest })
}

/// Action a v2 request needs on its repository
pub fn action_for(method: &Method) -> Option<Action> {
    match *method {
        Method::GET | Method::HEAD => Some(Action::Pull),
        Method::POST | Method::PATCH | Method::PUT => Some(Action::Push),
        Method::DELETE => Some(Action::Delete),
        _ => None,
    }
}

/// One repository access a request requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub repository: String,
    pub project_name: String,
    pub action: Action,
}

impl Access {
    /// Token scope a client should request to be granted this access
    pub fn scope(&self) -> String {
        let actions = match self.action {
            Action::Push => "pull,push",
            other => other.as_str(),
        };
        format!("repository:{}:{}", self.repository, actions)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope())
    }
}

/// Repository accesses required by a request; a blob mount also needs pull on its source
pub fn access_list(target: &Target, method: &Method) -> Vec<Access> {
    let Target::Repository(info) = target else {
        return Vec::new();
    };
    let Some(action) = action_for(method) else {
        return Vec::new();
    };

    let mut list = vec![Access { repository: info.repository.clone(), project_name: info.project_name.clone(), action }];
    if let Some(mount) = &info.mount {
        list.push(Access { repository: mount.repository.clone(), project_name: mount.project_name.clone(), action: Action::Pull });
    }
    list
}

/// Space separated scopes of an access list
pub fn scope_string(accesses: &[Access]) -> String {
    accesses.iter().map(Access::scope).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST_SAMPLE: &str = "sha256:08e4a417ff4e3913d8723a05cc34055db01c2fd165b588e049c5bad16ce6094f";

    #[test]
    fn test_classify_login_and_catalog() {
        assert_eq!(Target::classify(&Method::GET, "/v2/", None), Target::Login);
        assert_eq!(Target::classify(&Method::GET, "/v2/_catalog", None), Target::Catalog);
        assert_eq!(Target::classify(&Method::GET, "/v2/_catalog/extra", None), Target::Catalog);
        assert_eq!(Target::classify(&Method::GET, "/v2/foo", None), Target::Unknown);
    }

    #[test]
    fn test_classify_repository_paths() {
        let Target::Repository(info) = Target::classify(&Method::GET, "/v2/library/hello-world/manifests/latest", None) else {
            panic!("expected repository target");
        };
        assert_eq!(info.repository, "library/hello-world");
        assert_eq!(info.project_name, "library");
        assert_eq!(info.reference.as_deref(), Some("latest"));

        let path = format!("/v2/library/ubuntu/blobs/{}", DIGEST_SAMPLE);
        let Target::Repository(info) = Target::classify(&Method::HEAD, &path, None) else {
            panic!("expected repository target");
        };
        assert_eq!(info.reference.as_deref(), Some(DIGEST_SAMPLE));

        assert!(matches!(Target::classify(&Method::GET, "/v2/a/b/c/tags/list", None), Target::Repository(ref i) if i.repository == "a/b/c"));
        assert!(matches!(Target::classify(&Method::PATCH, "/v2/a/b/blobs/uploads/0d1c", None), Target::Repository(ref i) if i.mount.is_none()));
    }

    #[test]
    fn test_blob_mount_requires_pull_on_source() {
        let query = format!("mount={}&from=p3/img", DIGEST_SAMPLE);
        let target = Target::classify(&Method::POST, "/v2/p1/img/blobs/uploads/", Some(&query));
        let accesses = access_list(&target, &Method::POST);

        assert_eq!(accesses.len(), 2);
        assert_eq!(accesses[1].project_name, "p3");
        assert_eq!(scope_string(&accesses), "repository:p1/img:pull,push repository:p3/img:pull");
    }

    #[test]
    fn test_scope_per_method() {
        let target = Target::classify(&Method::GET, "/v2/library/ubuntu/manifests/14.04", None);
        assert_eq!(scope_string(&access_list(&target, &Method::GET)), "repository:library/ubuntu:pull");
        assert_eq!(scope_string(&access_list(&target, &Method::PUT)), "repository:library/ubuntu:pull,push");
        assert_eq!(scope_string(&access_list(&target, &Method::DELETE)), "repository:library/ubuntu:delete");
        assert!(access_list(&target, &Method::OPTIONS).is_empty());
        assert!(access_list(&Target::Catalog, &Method::GET).is_empty());
    }
}
