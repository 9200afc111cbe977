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

//! Registry bearer tokens
//!
//! Callers request scopes such as `repository:library/ubuntu:pull,push`; each scope is narrowed by
//! a per-type filter to what the caller's evaluator permits, and the result is signed into an
//! RS256 token the registry trusts.

pub mod claims;
pub mod filter;
pub mod scope;
pub mod service;
pub mod signer;

pub use claims::Claims;
pub use filter::{AccessFilter, RegistryFilter, RepositoryFilter};
pub use scope::{ResourceActions, parse_scopes};
pub use service::{TokenResponse, TokenService};
pub use signer::TokenSigner;
