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

//! Berth registry gateway
//!
//! Authorization and replication core of a container registry: RBAC evaluation, bearer token
//! issuance, access checks on registry v2 traffic and orchestration of replication between
//! registries.

pub mod auth;
pub mod body;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limiting;
pub mod rbac;
pub mod replication;
pub mod retry;
pub mod router;
pub mod security;
pub mod server;
pub mod token;
pub mod v2auth;
