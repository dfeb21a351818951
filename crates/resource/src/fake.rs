//! In-process resource broker.
//!
//! Stands in for the platform daemon in tests and in the simulator. It keeps
//! a per-category capacity, recycles released ids, and can be switched into
//! denial or under-grant modes. [`FakeBroker::trigger_conflict`] replays a
//! platform preemption on a dedicated thread, the way the real daemon calls
//! back from its private IPC thread.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::broker::{ConflictHandler, GrantedResource, ResourceBroker};
use crate::error::ResourceError;
use crate::types::{ConflictType, ResourceCategory, ResourceId, ResourceRequest};

struct FakeInner {
    capacity: HashMap<ResourceCategory, usize>,
    granted: HashMap<ResourceId, ResourceCategory>,
    recycled: Vec<u32>,
    next_id: u32,
    deny: bool,
    under_grant: bool,
    allocate_calls: u64,
    release_calls: u64,
}

pub struct FakeBroker {
    inner: Mutex<FakeInner>,
    handler: Mutex<Option<ConflictHandler>>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBroker {
    /// One video decoder and one scaler.
    pub fn new() -> Self {
        let mut capacity = HashMap::new();
        capacity.insert(ResourceCategory::VideoDecoder, 1);
        capacity.insert(ResourceCategory::Scaler, 1);
        Self {
            inner: Mutex::new(FakeInner {
                capacity,
                granted: HashMap::new(),
                recycled: Vec::new(),
                next_id: 1,
                deny: false,
                under_grant: false,
                allocate_calls: 0,
                release_calls: 0,
            }),
            handler: Mutex::new(None),
        }
    }

    pub fn with_capacity(self, category: ResourceCategory, units: usize) -> Self {
        self.inner.lock().capacity.insert(category, units);
        self
    }

    /// Refuse every allocation.
    pub fn set_deny(&self, deny: bool) {
        self.inner.lock().deny = deny;
    }

    /// Grant one unit fewer than requested (platform misbehavior).
    pub fn set_under_grant(&self, under_grant: bool) {
        self.inner.lock().under_grant = under_grant;
    }

    pub fn granted_count(&self) -> usize {
        self.inner.lock().granted.len()
    }

    pub fn granted_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.inner.lock().granted.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn allocate_calls(&self) -> u64 {
        self.inner.lock().allocate_calls
    }

    pub fn release_calls(&self) -> u64 {
        self.inner.lock().release_calls
    }

    /// Reclaim `ids` the way the platform does: the conflict handler runs on
    /// a separate thread, which the returned handle joins once every owner has
    /// signaled completion. The reclaimed ids become free again afterwards.
    pub fn trigger_conflict(
        &self,
        conflict: ConflictType,
        ids: Vec<ResourceId>,
    ) -> std::io::Result<JoinHandle<()>> {
        let handler = self.handler.lock().clone();
        info!(?conflict, ?ids, "Broker reclaiming resources");
        thread::Builder::new()
            .name("rm-conflict".to_string())
            .spawn(move || {
                if let Some(handler) = handler {
                    handler(conflict, &ids);
                }
            })
    }

    fn component_name(request: &ResourceRequest) -> String {
        match (request.category, request.capability.codec) {
            (ResourceCategory::VideoDecoder, Some(codec)) => {
                format!("OMX.SEC.{}.dec", codec.omx_role())
            }
            (ResourceCategory::VideoDecoder, None) => "OMX.SEC.video.dec".to_string(),
            (ResourceCategory::Scaler, _) => "OMX.SEC.scaler".to_string(),
        }
    }
}

impl ResourceBroker for FakeBroker {
    fn allocate(&self, requests: &[ResourceRequest]) -> Result<Vec<GrantedResource>, ResourceError> {
        let mut inner = self.inner.lock();
        inner.allocate_calls += 1;
        if inner.deny {
            return Err(ResourceError::Denied("broker is denying requests".to_string()));
        }

        let grant_limit = if inner.under_grant {
            requests.len().saturating_sub(1)
        } else {
            requests.len()
        };

        let mut granted = Vec::with_capacity(requests.len());
        for request in requests.iter().take(grant_limit) {
            let in_use = inner
                .granted
                .values()
                .filter(|c| **c == request.category)
                .count();
            let capacity = inner.capacity.get(&request.category).copied().unwrap_or(0);
            if in_use >= capacity {
                // Roll back what this batch already took.
                for g in &granted {
                    let GrantedResource { id, .. } = g;
                    inner.granted.remove(id);
                    inner.recycled.push(id.0);
                }
                return Err(ResourceError::Denied(format!(
                    "no free {:?} ({in_use}/{capacity} in use)",
                    request.category
                )));
            }

            let raw = match inner.recycled.pop() {
                Some(raw) => raw,
                None => {
                    let raw = inner.next_id;
                    inner.next_id += 1;
                    raw
                }
            };
            let id = ResourceId(raw);
            inner.granted.insert(id, request.category);
            granted.push(GrantedResource {
                id,
                category: request.category,
                component_name: Self::component_name(request),
            });
        }

        debug!(count = granted.len(), "Fake broker granted resources");
        Ok(granted)
    }

    fn release(&self, id: ResourceId) -> Result<(), ResourceError> {
        let mut inner = self.inner.lock();
        inner.release_calls += 1;
        if inner.granted.remove(&id).is_none() {
            return Err(ResourceError::UnknownResource(id));
        }
        inner.recycled.push(id.0);
        Ok(())
    }

    fn set_conflict_handler(&self, handler: ConflictHandler) {
        *self.handler.lock() = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vda_common::Resolution;

    #[test]
    fn capacity_is_enforced_and_ids_recycled() {
        let broker = FakeBroker::new();
        let req = ResourceRequest::scaler(Resolution::FHD);
        let first = broker.allocate(&[req]).unwrap();
        assert!(broker.allocate(&[req]).is_err());
        broker.release(first[0].id).unwrap();
        let second = broker.allocate(&[req]).unwrap();
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].component_name, "OMX.SEC.scaler");
    }

    #[test]
    fn failed_batch_rolls_back() {
        let broker = FakeBroker::new().with_capacity(ResourceCategory::Scaler, 1);
        let req = ResourceRequest::scaler(Resolution::FHD);
        assert!(broker.allocate(&[req, req]).is_err());
        assert_eq!(broker.granted_count(), 0);
    }

    #[test]
    fn under_grant_returns_short_batch() {
        let broker = FakeBroker::new().with_capacity(ResourceCategory::Scaler, 4);
        broker.set_under_grant(true);
        let req = ResourceRequest::scaler(Resolution::FHD);
        assert_eq!(broker.allocate(&[req, req]).unwrap().len(), 1);
    }

    #[test]
    fn release_of_unknown_id_fails() {
        let broker = FakeBroker::new();
        assert_eq!(
            broker.release(ResourceId(77)),
            Err(ResourceError::UnknownResource(ResourceId(77)))
        );
    }
}
