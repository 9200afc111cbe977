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

//! Replication of repositories between registries

pub mod adapter;
pub mod controller;
pub mod execution;
pub mod filter;
pub mod flow;
pub mod health;
pub mod model;
pub mod native;
pub mod scheduler;
pub mod store;
pub mod trigger;

pub use adapter::{Adapter, AdapterInfo, AdapterRegistry, HealthStatus, ImageRegistry};
pub use controller::{ReplicationController, local_registry};
pub use execution::{ExecutionManager, InMemoryExecutionManager};
pub use model::{Execution, ExecutionStatus, Registry, ReplicationPolicy, Resource, Task, TaskStatus, TriggerType};
pub use scheduler::{HttpJobSubmitter, JobSubmitter, Scheduler};
pub use store::{InMemoryPolicyManager, InMemoryRegistryManager, PolicyManager, RegistryManager};
pub use trigger::{EventOperation, ReplicationEvent, TriggerManager};
