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

//! Role-based access control
//!
//! Resources are hierarchical paths partitioned into namespaces. A principal is assembled per
//! namespace from the authenticated subject, and evaluators decide allow or deny by matching the
//! principal's policy lines against the requested resource and action.

pub mod engine;
pub mod evaluator;
pub mod matcher;
pub mod namespace;
pub mod principal;
pub mod project;
pub mod resource;
pub mod roles;
pub mod system;

pub use engine::{RbacEngine, RbacUser, Role};
pub use evaluator::{AdminEvaluator, Evaluator, EvaluatorSet, LazyEvaluator, NamespaceEvaluator};
pub use matcher::PatternStore;
pub use namespace::{Namespace, NamespaceRegistry};
pub use principal::{LocalUser, LocalUserBuilder, PrincipalBuilder, StaticPoliciesBuilder, SystemBuilder};
pub use project::{InMemoryProjectController, Project, ProjectController};
pub use resource::{Action, Effect, Policy, Resource};
pub use system::RbacSystem;
