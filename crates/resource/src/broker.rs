//! Platform resource broker interface.
//!
//! The broker is a platform daemon reached through blocking IPC. Its wire
//! format is platform-owned; this trait captures only the round trips the
//! manager needs.

use std::sync::Arc;

use crate::error::ResourceError;
use crate::types::{ConflictType, ResourceCategory, ResourceId, ResourceRequest};

/// A unit granted by the broker, before the manager binds it to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantedResource {
    pub id: ResourceId,
    pub category: ResourceCategory,
    pub component_name: String,
}

/// Callback the broker invokes, on its own thread, when it reclaims units.
pub type ConflictHandler = Arc<dyn Fn(ConflictType, &[ResourceId]) + Send + Sync>;

pub trait ResourceBroker: Send + Sync {
    /// Blocking allocation round trip. The broker may grant fewer units than
    /// requested; callers must check the count.
    fn allocate(&self, requests: &[ResourceRequest]) -> Result<Vec<GrantedResource>, ResourceError>;

    /// Blocking release of one unit.
    fn release(&self, id: ResourceId) -> Result<(), ResourceError>;

    /// Install the preemption callback. Replaces any previous handler.
    fn set_conflict_handler(&self, handler: ConflictHandler);
}
