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

//! Registry v2 gateway authorization
//!
//! Every `/v2/` request is classified into a login check, a catalog listing or a repository
//! operation, mapped to the repository accesses it needs and checked against the caller's
//! security context. Denied requests get a 401 with a challenge pointing at the token service.

pub mod challenge;
pub mod middleware;
pub mod request;

pub use challenge::{ChallengeConfig, host_matches};
pub use middleware::{RequestChecker, V2AuthLayer, V2AuthMiddleware, unauthorized_response};
pub use request::{Access, ArtifactInfo, BlobMount, Target, access_list, scope_string};
