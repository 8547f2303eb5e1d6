// ABOUTME: Capability traits for the cloud services the orchestrator calls.
// ABOUTME: Defines ObjectStore, FleetApi, and both load-balancer health APIs.

mod fleet;
mod health;
mod memory;
mod store;

pub use fleet::{FleetApi, FleetError, FleetGroup, FleetInstance, GroupSpec, LifecycleState};
pub use health::{
    HealthError, HealthState, InstanceHealth, InstanceHealthApi, TargetHealth, TargetHealthApi,
};
pub use memory::MemoryStore;
pub use store::{ObjectStore, StoreError};
