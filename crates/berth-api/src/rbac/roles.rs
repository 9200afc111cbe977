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

//! Static role catalog
//!
//! Templates are relative to a namespace; policies are produced per namespace on demand.

use crate::rbac::engine::Role;
use crate::rbac::namespace::Namespace;
use crate::rbac::resource::Action::{self, Create, Delete, List, Operate, Pull, Push, Read, Stop, Update};
use crate::rbac::resource::{Policy, Resource};

pub const ROLE_PROJECT_ADMIN: i64 = 1;
pub const ROLE_DEVELOPER: i64 = 2;
pub const ROLE_GUEST: i64 = 3;
pub const ROLE_MAINTAINER: i64 = 4;
pub const ROLE_LIMITED_GUEST: i64 = 5;

pub const RESOURCE_SELF: &str = "";
pub const RESOURCE_MEMBER: &str = "member";
pub const RESOURCE_METADATA: &str = "metadata";
pub const RESOURCE_LOG: &str = "log";
pub const RESOURCE_LABEL: &str = "label";
pub const RESOURCE_QUOTA: &str = "quota";
pub const RESOURCE_REPOSITORY: &str = "repository";
pub const RESOURCE_TAG_RETENTION: &str = "tag-retention";
pub const RESOURCE_IMMUTABLE_TAG: &str = "immutable-tag";
pub const RESOURCE_HELM_CHART: &str = "helm-chart";
pub const RESOURCE_HELM_CHART_VERSION: &str = "helm-chart-version";
pub const RESOURCE_HELM_CHART_VERSION_LABEL: &str = "helm-chart-version-label";
pub const RESOURCE_CONFIGURATION: &str = "configuration";
pub const RESOURCE_ROBOT: &str = "robot";
pub const RESOURCE_NOTIFICATION_POLICY: &str = "notification-policy";
pub const RESOURCE_SCAN: &str = "scan";
pub const RESOURCE_SCANNER: &str = "scanner";
pub const RESOURCE_ARTIFACT: &str = "artifact";
pub const RESOURCE_ARTIFACT_ADDITION: &str = "artifact-addition";
pub const RESOURCE_ARTIFACT_LABEL: &str = "artifact-label";
pub const RESOURCE_TAG: &str = "tag";
pub const RESOURCE_ACCESSORY: &str = "accessory";
pub const RESOURCE_PREHEAT_POLICY: &str = "preheat-policy";

pub const RESOURCE_REGISTRY: &str = "registry";
pub const RESOURCE_REPLICATION: &str = "replication";
pub const RESOURCE_REPLICATION_POLICY: &str = "replication-policy";
pub const RESOURCE_SCAN_ALL: &str = "scan-all";
pub const RESOURCE_CATALOG: &str = "catalog";

type Template = (&'static str, Action);

const PROJECT_ADMIN: &[Template] = &[
    (RESOURCE_SELF, Read),
    (RESOURCE_SELF, Update),
    (RESOURCE_SELF, Delete),
    (RESOURCE_MEMBER, Create),
    (RESOURCE_MEMBER, Read),
    (RESOURCE_MEMBER, Update),
    (RESOURCE_MEMBER, Delete),
    (RESOURCE_MEMBER, List),
    (RESOURCE_METADATA, Create),
    (RESOURCE_METADATA, Read),
    (RESOURCE_METADATA, Update),
    (RESOURCE_METADATA, Delete),
    (RESOURCE_LOG, List),
    (RESOURCE_LABEL, Create),
    (RESOURCE_LABEL, Read),
    (RESOURCE_LABEL, Update),
    (RESOURCE_LABEL, Delete),
    (RESOURCE_LABEL, List),
    (RESOURCE_QUOTA, Read),
    (RESOURCE_REPOSITORY, Create),
    (RESOURCE_REPOSITORY, Read),
    (RESOURCE_REPOSITORY, Update),
    (RESOURCE_REPOSITORY, Delete),
    (RESOURCE_REPOSITORY, List),
    (RESOURCE_REPOSITORY, Pull),
    (RESOURCE_REPOSITORY, Push),
    (RESOURCE_TAG_RETENTION, Create),
    (RESOURCE_TAG_RETENTION, Read),
    (RESOURCE_TAG_RETENTION, Update),
    (RESOURCE_TAG_RETENTION, Delete),
    (RESOURCE_TAG_RETENTION, List),
    (RESOURCE_TAG_RETENTION, Operate),
    (RESOURCE_IMMUTABLE_TAG, Create),
    (RESOURCE_IMMUTABLE_TAG, Update),
    (RESOURCE_IMMUTABLE_TAG, Delete),
    (RESOURCE_IMMUTABLE_TAG, List),
    (RESOURCE_HELM_CHART, Create),
    (RESOURCE_HELM_CHART, Read),
    (RESOURCE_HELM_CHART, Delete),
    (RESOURCE_HELM_CHART, List),
    (RESOURCE_HELM_CHART_VERSION, Create),
    (RESOURCE_HELM_CHART_VERSION, Read),
    (RESOURCE_HELM_CHART_VERSION, Delete),
    (RESOURCE_HELM_CHART_VERSION, List),
    (RESOURCE_HELM_CHART_VERSION_LABEL, Create),
    (RESOURCE_HELM_CHART_VERSION_LABEL, Delete),
    (RESOURCE_CONFIGURATION, Read),
    (RESOURCE_CONFIGURATION, Update),
    (RESOURCE_ROBOT, Create),
    (RESOURCE_ROBOT, Read),
    (RESOURCE_ROBOT, Update),
    (RESOURCE_ROBOT, Delete),
    (RESOURCE_ROBOT, List),
    (RESOURCE_NOTIFICATION_POLICY, Create),
    (RESOURCE_NOTIFICATION_POLICY, Update),
    (RESOURCE_NOTIFICATION_POLICY, Delete),
    (RESOURCE_NOTIFICATION_POLICY, List),
    (RESOURCE_NOTIFICATION_POLICY, Read),
    (RESOURCE_SCAN, Create),
    (RESOURCE_SCAN, Read),
    (RESOURCE_SCAN, Stop),
    (RESOURCE_SCANNER, Read),
    (RESOURCE_SCANNER, Create),
    (RESOURCE_ARTIFACT, Create),
    (RESOURCE_ARTIFACT, Read),
    (RESOURCE_ARTIFACT, Delete),
    (RESOURCE_ARTIFACT, List),
    (RESOURCE_ARTIFACT_ADDITION, Read),
    (RESOURCE_TAG, List),
    (RESOURCE_TAG, Create),
    (RESOURCE_TAG, Delete),
    (RESOURCE_ACCESSORY, List),
    (RESOURCE_ARTIFACT_LABEL, Create),
    (RESOURCE_ARTIFACT_LABEL, Delete),
    (RESOURCE_PREHEAT_POLICY, Create),
    (RESOURCE_PREHEAT_POLICY, Read),
    (RESOURCE_PREHEAT_POLICY, Update),
    (RESOURCE_PREHEAT_POLICY, Delete),
    (RESOURCE_PREHEAT_POLICY, List),
];

const MAINTAINER: &[Template] = &[
    (RESOURCE_SELF, Read),
    (RESOURCE_MEMBER, Read),
    (RESOURCE_MEMBER, List),
    (RESOURCE_METADATA, Create),
    (RESOURCE_METADATA, Read),
    (RESOURCE_METADATA, Update),
    (RESOURCE_METADATA, Delete),
    (RESOURCE_LOG, List),
    (RESOURCE_QUOTA, Read),
    (RESOURCE_LABEL, Create),
    (RESOURCE_LABEL, Read),
    (RESOURCE_LABEL, Update),
    (RESOURCE_LABEL, Delete),
    (RESOURCE_LABEL, List),
    (RESOURCE_REPOSITORY, Create),
    (RESOURCE_REPOSITORY, Read),
    (RESOURCE_REPOSITORY, Update),
    (RESOURCE_REPOSITORY, Delete),
    (RESOURCE_REPOSITORY, List),
    (RESOURCE_REPOSITORY, Push),
    (RESOURCE_REPOSITORY, Pull),
    (RESOURCE_TAG_RETENTION, Create),
    (RESOURCE_TAG_RETENTION, Read),
    (RESOURCE_TAG_RETENTION, Update),
    (RESOURCE_TAG_RETENTION, Delete),
    (RESOURCE_TAG_RETENTION, List),
    (RESOURCE_TAG_RETENTION, Operate),
    (RESOURCE_ACCESSORY, List),
    (RESOURCE_IMMUTABLE_TAG, Create),
    (RESOURCE_IMMUTABLE_TAG, Update),
    (RESOURCE_IMMUTABLE_TAG, Delete),
    (RESOURCE_IMMUTABLE_TAG, List),
    (RESOURCE_HELM_CHART, Create),
    (RESOURCE_HELM_CHART, Read),
    (RESOURCE_HELM_CHART, Delete),
    (RESOURCE_HELM_CHART, List),
    (RESOURCE_HELM_CHART_VERSION, Create),
    (RESOURCE_HELM_CHART_VERSION, Read),
    (RESOURCE_HELM_CHART_VERSION, Delete),
    (RESOURCE_HELM_CHART_VERSION, List),
    (RESOURCE_HELM_CHART_VERSION_LABEL, Create),
    (RESOURCE_HELM_CHART_VERSION_LABEL, Delete),
    (RESOURCE_CONFIGURATION, Read),
    (RESOURCE_ROBOT, Read),
    (RESOURCE_ROBOT, List),
    (RESOURCE_NOTIFICATION_POLICY, List),
    (RESOURCE_SCAN, Create),
    (RESOURCE_SCAN, Read),
    (RESOURCE_SCAN, Stop),
    (RESOURCE_SCANNER, Read),
    (RESOURCE_ARTIFACT, Create),
    (RESOURCE_ARTIFACT, Read),
    (RESOURCE_ARTIFACT, Delete),
    (RESOURCE_ARTIFACT, List),
    (RESOURCE_ARTIFACT_ADDITION, Read),
    (RESOURCE_TAG, List),
    (RESOURCE_TAG, Create),
    (RESOURCE_TAG, Delete),
    (RESOURCE_ARTIFACT_LABEL, Create),
    (RESOURCE_ARTIFACT_LABEL, Delete),
];

const DEVELOPER: &[Template] = &[
    (RESOURCE_SELF, Read),
    (RESOURCE_MEMBER, Read),
    (RESOURCE_MEMBER, List),
    (RESOURCE_LOG, List),
    (RESOURCE_LABEL, Read),
    (RESOURCE_LABEL, List),
    (RESOURCE_QUOTA, Read),
    (RESOURCE_REPOSITORY, Create),
    (RESOURCE_REPOSITORY, Read),
    (RESOURCE_REPOSITORY, Update),
    (RESOURCE_REPOSITORY, List),
    (RESOURCE_REPOSITORY, Push),
    (RESOURCE_REPOSITORY, Pull),
    (RESOURCE_HELM_CHART, Create),
    (RESOURCE_HELM_CHART, Read),
    (RESOURCE_HELM_CHART, List),
    (RESOURCE_HELM_CHART_VERSION, Create),
    (RESOURCE_HELM_CHART_VERSION, Read),
    (RESOURCE_HELM_CHART_VERSION, List),
    (RESOURCE_HELM_CHART_VERSION_LABEL, Create),
    (RESOURCE_HELM_CHART_VERSION_LABEL, Delete),
    (RESOURCE_CONFIGURATION, Read),
    (RESOURCE_ROBOT, Read),
    (RESOURCE_ROBOT, List),
    (RESOURCE_SCAN, Read),
    (RESOURCE_SCANNER, Read),
    (RESOURCE_ARTIFACT, Create),
    (RESOURCE_ARTIFACT, Read),
    (RESOURCE_ARTIFACT, List),
    (RESOURCE_ARTIFACT_ADDITION, Read),
    (RESOURCE_TAG, List),
    (RESOURCE_TAG, Create),
    (RESOURCE_ACCESSORY, List),
    (RESOURCE_ARTIFACT_LABEL, Create),
    (RESOURCE_ARTIFACT_LABEL, Delete),
];

const GUEST: &[Template] = &[
    (RESOURCE_SELF, Read),
    (RESOURCE_MEMBER, Read),
    (RESOURCE_MEMBER, List),
    (RESOURCE_LOG, List),
    (RESOURCE_LABEL, Read),
    (RESOURCE_LABEL, List),
    (RESOURCE_QUOTA, Read),
    (RESOURCE_REPOSITORY, Read),
    (RESOURCE_REPOSITORY, List),
    (RESOURCE_REPOSITORY, Pull),
    (RESOURCE_HELM_CHART, Read),
    (RESOURCE_HELM_CHART, List),
    (RESOURCE_HELM_CHART_VERSION, Read),
    (RESOURCE_HELM_CHART_VERSION, List),
    (RESOURCE_CONFIGURATION, Read),
    (RESOURCE_ROBOT, Read),
    (RESOURCE_ROBOT, List),
    (RESOURCE_SCAN, Read),
    (RESOURCE_SCANNER, Read),
    (RESOURCE_TAG, List),
    (RESOURCE_ACCESSORY, List),
    (RESOURCE_ARTIFACT, Read),
    (RESOURCE_ARTIFACT, List),
    (RESOURCE_ARTIFACT_ADDITION, Read),
];

const LIMITED_GUEST: &[Template] = &[
    (RESOURCE_SELF, Read),
    (RESOURCE_QUOTA, Read),
    (RESOURCE_REPOSITORY, List),
    (RESOURCE_REPOSITORY, Pull),
    (RESOURCE_HELM_CHART, Read),
    (RESOURCE_HELM_CHART, List),
    (RESOURCE_HELM_CHART_VERSION, Read),
    (RESOURCE_HELM_CHART_VERSION, List),
    (RESOURCE_CONFIGURATION, Read),
    (RESOURCE_SCAN, Read),
    (RESOURCE_SCANNER, Read),
    (RESOURCE_TAG, List),
    (RESOURCE_ACCESSORY, List),
    (RESOURCE_ARTIFACT, Read),
    (RESOURCE_ARTIFACT, List),
    (RESOURCE_ARTIFACT_ADDITION, Read),
];

/// Granted to everyone, anonymous callers included, in a public project
const PUBLIC_PROJECT: &[Template] = &[
    (RESOURCE_SELF, Read),
    (RESOURCE_REPOSITORY, List),
    (RESOURCE_REPOSITORY, Pull),
    (RESOURCE_HELM_CHART, Read),
    (RESOURCE_HELM_CHART, List),
    (RESOURCE_HELM_CHART_VERSION, Read),
    (RESOURCE_HELM_CHART_VERSION, List),
    (RESOURCE_TAG, List),
    (RESOURCE_ARTIFACT, Read),
    (RESOURCE_ARTIFACT, List),
    (RESOURCE_SCAN, Read),
];

/// Policies handed to the system principal
const SYSTEM: &[Template] = &[
    (RESOURCE_REGISTRY, Read),
    (RESOURCE_REGISTRY, List),
    (RESOURCE_REPLICATION, Read),
    (RESOURCE_REPLICATION, List),
    (RESOURCE_REPLICATION_POLICY, Read),
    (RESOURCE_REPLICATION_POLICY, List),
    (RESOURCE_SCAN_ALL, Read),
    (RESOURCE_CATALOG, Read),
];

/// Name of a project role id; unknown ids map to the empty name
pub fn role_name(role_id: i64) -> &'static str {
    match role_id {
        ROLE_PROJECT_ADMIN => "projectAdmin",
        ROLE_DEVELOPER => "developer",
        ROLE_GUEST => "guest",
        ROLE_MAINTAINER => "maintainer",
        ROLE_LIMITED_GUEST => "limitedGuest",
        _ => "",
    }
}

/// Role id for a role name, accepting the legacy `master` alias
pub fn role_id(name: &str) -> Option<i64> {
    match name {
        "projectAdmin" => Some(ROLE_PROJECT_ADMIN),
        "developer" => Some(ROLE_DEVELOPER),
        "guest" => Some(ROLE_GUEST),
        "maintainer" | "master" => Some(ROLE_MAINTAINER),
        "limitedGuest" => Some(ROLE_LIMITED_GUEST),
        _ => None,
    }
}

fn templates(role_name: &str) -> &'static [Template] {
    match role_name {
        "projectAdmin" => PROJECT_ADMIN,
        "maintainer" | "master" => MAINTAINER,
        "developer" => DEVELOPER,
        "guest" => GUEST,
        "limitedGuest" => LIMITED_GUEST,
        _ => &[],
    }
}

fn expand(namespace: &Namespace, templates: &[Template]) -> Vec<Policy> {
    templates.iter().map(|(resource, action)| Policy::new(namespace.resource(&[*resource]), *action)).collect()
}

/// Role with its templates scoped into `namespace`
pub fn project_role(namespace: &Namespace, role_id: i64) -> Role {
    let name = role_name(role_id);
    Role::new(name, expand(namespace, templates(name)))
}

/// Policies every caller gets in a public project
pub fn public_policies(namespace: &Namespace) -> Vec<Policy> {
    expand(namespace, PUBLIC_PROJECT)
}

/// Policies of the system principal
pub fn system_policies() -> Vec<Policy> {
    expand(&Namespace::system(), SYSTEM)
}

/// Whether the named role grants `action` on a relative resource template
pub fn role_allows(role_name: &str, resource: &str, action: Action) -> bool {
    templates(role_name).iter().any(|(r, a)| *r == resource && a.covers(action))
}

/// Resource of a project-level object
pub fn project_resource(project_id: i64, subresource: &str) -> Resource {
    Namespace::project(project_id).resource(&[subresource])
}
