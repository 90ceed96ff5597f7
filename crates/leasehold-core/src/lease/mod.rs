//! Profile ownership: the durable lease registry and the actor view over it.

pub mod actor;
pub mod registry;

pub use actor::{ActorContext, ProfileActorScheduler};
pub use registry::{ProfileLeaseState, ProfileRegistry, MIN_LEASE_SECS};
