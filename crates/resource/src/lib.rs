//! `vda-resource` - Brokering of scarce hardware units between decode clients.
//!
//! The platform exposes a small number of fixed-function units (video
//! decoders, scalers). A [`ResourceManager`] sits between the platform broker
//! and the decoders that want those units:
//!
//! - [`ResourceManager::allocate_resources`] performs a blocking round trip to
//!   the broker and records ownership per client. Allocation is all-or-nothing.
//! - [`ResourceManager::release_resources`] returns units to the broker.
//! - When the broker reclaims units (preemption), the manager groups the ids
//!   by owning client and calls [`ResourceClient::on_resource_conflict`],
//!   blocking the broker's thread on a [`Waitable`] until the client has
//!   released its hardware.
//!
//! ## Module Overview
//!
//! - [`broker`] - the platform broker interface
//! - [`manager`] - ownership table and preemption fan-out
//! - [`fake`] - in-process broker used by tests and the simulator
//! - [`waitable`] - one-shot completion signal for preemption round trips

pub mod broker;
pub mod error;
pub mod fake;
pub mod manager;
pub mod types;
pub mod waitable;

pub use broker::{ConflictHandler, GrantedResource, ResourceBroker};
pub use error::ResourceError;
pub use fake::FakeBroker;
pub use manager::{ResourceClient, ResourceManager, MAX_RESOURCE_REQUESTS};
pub use types::{
    AllocatedResource, CapabilityFingerprint, ClientId, ConflictType, ExclusivityMode,
    ResourceCategory, ResourceId, ResourceRequest,
};
pub use waitable::Waitable;
