//! Resource Manager - ownership table and preemption fan-out.
//!
//! The manager is injected into every decoder instead of living in a global.
//! It owns the only handle to the platform broker and records which client
//! holds each granted unit, so that preemption callbacks naming raw resource
//! ids can be routed back to the client that must give them up.
//!
//! ## Preemption round trip
//!
//! ```text
//! broker thread                 manager                    client
//!      │ conflict(ids) ───────► group ids by owner
//!      │                        on_resource_conflict ────► tear down hw
//!      │                          returns false            release_resources
//!      │                        waitable.wait() ◄───────── waitable.signal()
//!      │ ◄────────────────────── return
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::broker::{GrantedResource, ResourceBroker};
use crate::error::ResourceError;
use crate::types::{AllocatedResource, ClientId, ConflictType, ResourceId, ResourceRequest};
use crate::waitable::Waitable;

/// Largest allocation batch accepted in one round trip.
pub const MAX_RESOURCE_REQUESTS: usize = 10;

/// Implemented by anything that holds broker resources.
pub trait ResourceClient: Send + Sync {
    /// Called on the broker's thread when `ids` are being reclaimed.
    ///
    /// Return `true` if the resources are already released. Return `false`
    /// to make the caller block on `waitable` until the client signals it
    /// after releasing them.
    fn on_resource_conflict(&self, waitable: Waitable, conflict: ConflictType, ids: &[ResourceId])
        -> bool;
}

struct Ownership {
    client: ClientId,
    resource: AllocatedResource,
}

#[derive(Default)]
struct ManagerInner {
    clients: HashMap<ClientId, Weak<dyn ResourceClient>>,
    owned: HashMap<ResourceId, Ownership>,
    next_client: u64,
}

pub struct ResourceManager {
    broker: Arc<dyn ResourceBroker>,
    inner: Mutex<ManagerInner>,
}

impl ResourceManager {
    /// Create a manager and install its preemption handler on `broker`.
    pub fn new(broker: Arc<dyn ResourceBroker>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ResourceManager>| {
            let weak = weak.clone();
            broker.set_conflict_handler(Arc::new(move |conflict, ids| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_conflict(conflict, ids);
                } else {
                    warn!(?ids, "Conflict callback after resource manager was dropped");
                }
            }));
            Self {
                broker,
                inner: Mutex::new(ManagerInner::default()),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Clients
    // -----------------------------------------------------------------------

    pub fn register_client(&self, client: Weak<dyn ResourceClient>) -> ClientId {
        let mut inner = self.inner.lock();
        inner.next_client += 1;
        let id = ClientId(inner.next_client);
        inner.clients.insert(id, client);
        debug!(%id, "Resource client registered");
        id
    }

    /// Forget a client, force-releasing anything it still holds.
    pub fn unregister_client(&self, client: ClientId) {
        let leaked: Vec<ResourceId> = {
            let mut inner = self.inner.lock();
            inner.clients.remove(&client);
            let ids: Vec<ResourceId> = inner
                .owned
                .iter()
                .filter(|(_, o)| o.client == client)
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                inner.owned.remove(id);
            }
            ids
        };

        if !leaked.is_empty() {
            warn!(%client, count = leaked.len(), "Client unregistered while holding resources");
            self.force_release(&leaked);
        }
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Allocate every resource in `requests` for `client`, or none of them.
    pub fn allocate_resources(
        &self,
        client: ClientId,
        requests: &[ResourceRequest],
    ) -> Result<Vec<AllocatedResource>, ResourceError> {
        if requests.is_empty() {
            return Err(ResourceError::EmptyRequest);
        }
        if requests.len() > MAX_RESOURCE_REQUESTS {
            return Err(ResourceError::TooManyRequests {
                requested: requests.len(),
                max: MAX_RESOURCE_REQUESTS,
            });
        }
        if !self.inner.lock().clients.contains_key(&client) {
            return Err(ResourceError::UnknownClient(client));
        }

        // The broker round trip blocks; never hold the table lock across it.
        let granted = self.broker.allocate(requests).map_err(|e| {
            error!(%client, error = %e, "Resource allocation denied");
            e
        })?;

        if granted.len() != requests.len() {
            error!(
                %client,
                requested = requests.len(),
                granted = granted.len(),
                "Broker under-allocated, returning partial grant"
            );
            let ids: Vec<ResourceId> = granted.iter().map(|g| g.id).collect();
            self.force_release(&ids);
            return Err(ResourceError::UnderAllocated {
                requested: requests.len(),
                granted: granted.len(),
            });
        }

        let mut inner = self.inner.lock();
        let allocated: Vec<AllocatedResource> = granted
            .into_iter()
            .map(|GrantedResource { id, category, component_name }| AllocatedResource {
                id,
                category,
                component_name,
                owner: client,
            })
            .collect();
        for resource in &allocated {
            inner.owned.insert(
                resource.id,
                Ownership {
                    client,
                    resource: resource.clone(),
                },
            );
        }

        info!(
            %client,
            ids = ?allocated.iter().map(|r| r.id).collect::<Vec<_>>(),
            "Resources allocated"
        );
        Ok(allocated)
    }

    /// Release resources previously granted to `client`.
    ///
    /// Unknown ids and ids owned by another client are logged and skipped.
    /// Returns `true` only if every id was released.
    pub fn release_resources(&self, client: ClientId, ids: &[ResourceId]) -> bool {
        let mut all_released = true;
        let mut to_release = Vec::with_capacity(ids.len());
        {
            let mut inner = self.inner.lock();
            for id in ids {
                match inner.owned.get(id) {
                    Some(o) if o.client == client => {
                        inner.owned.remove(id);
                        to_release.push(*id);
                    }
                    Some(o) => {
                        warn!(%id, %client, owner = %o.client, "Release of resource owned by another client");
                        all_released = false;
                    }
                    None => {
                        warn!(%id, %client, "Release of unknown resource");
                        all_released = false;
                    }
                }
            }
        }

        for id in to_release {
            if let Err(e) = self.broker.release(id) {
                error!(%id, %client, error = %e, "Broker failed to release resource");
                all_released = false;
            } else {
                debug!(%id, %client, "Resource released");
            }
        }
        all_released
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Number of resources currently recorded as owned by any client.
    pub fn owned_count(&self) -> usize {
        self.inner.lock().owned.len()
    }

    /// Resources currently owned by `client`, sorted by id.
    pub fn owned_by(&self, client: ClientId) -> Vec<AllocatedResource> {
        let inner = self.inner.lock();
        let mut owned: Vec<AllocatedResource> = inner
            .owned
            .values()
            .filter(|o| o.client == client)
            .map(|o| o.resource.clone())
            .collect();
        owned.sort_by_key(|r| r.id);
        owned
    }

    // -----------------------------------------------------------------------
    // Preemption
    // -----------------------------------------------------------------------

    /// Fan a broker conflict out to the owning clients. Runs on the broker's
    /// thread and blocks it until every client has released.
    pub fn handle_conflict(&self, conflict: ConflictType, ids: &[ResourceId]) {
        let mut by_client: HashMap<ClientId, (Arc<dyn ResourceClient>, Vec<ResourceId>)> =
            HashMap::new();
        let mut orphans = Vec::new();
        {
            let mut inner = self.inner.lock();
            for id in ids {
                let owner = inner.owned.get(id).map(|o| o.client);
                let client = owner.and_then(|c| inner.clients.get(&c).and_then(Weak::upgrade).map(|cb| (c, cb)));
                match client {
                    Some((client_id, callback)) => {
                        by_client
                            .entry(client_id)
                            .or_insert_with(|| (callback, Vec::new()))
                            .1
                            .push(*id);
                    }
                    None => {
                        inner.owned.remove(id);
                        orphans.push(*id);
                    }
                }
            }
        }

        if !orphans.is_empty() {
            warn!(ids = ?orphans, "Conflict on resources with no live owner, force releasing");
            self.force_release(&orphans);
        }

        for (client, (callback, ids)) in by_client {
            info!(%client, ?conflict, ?ids, "Dispatching resource conflict");
            let waitable = Waitable::new();
            if callback.on_resource_conflict(waitable.clone(), conflict, &ids) {
                debug!(%client, "Client released resources synchronously");
            } else {
                waitable.wait();
                debug!(%client, "Client signaled release completion");
            }
        }
    }

    fn force_release(&self, ids: &[ResourceId]) {
        for id in ids {
            if let Err(e) = self.broker.release(*id) {
                error!(%id, error = %e, "Forced release failed");
            }
        }
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResourceManager")
            .field("clients", &inner.clients.len())
            .field("owned", &inner.owned.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBroker;
    use crate::types::ResourceCategory;
    use vda_common::{DecoderConfig, Resolution, VideoCodecProfile};

    struct NullClient;

    impl ResourceClient for NullClient {
        fn on_resource_conflict(&self, _: Waitable, _: ConflictType, _: &[ResourceId]) -> bool {
            true
        }
    }

    fn decoder_request() -> ResourceRequest {
        ResourceRequest::video_decoder(&DecoderConfig::new(VideoCodecProfile::H264Main, Resolution::FHD))
    }

    fn setup() -> (Arc<FakeBroker>, Arc<ResourceManager>, Arc<dyn ResourceClient>, ClientId) {
        let broker = Arc::new(FakeBroker::new());
        let manager = ResourceManager::new(broker.clone());
        let client: Arc<dyn ResourceClient> = Arc::new(NullClient);
        let id = manager.register_client(Arc::downgrade(&client));
        (broker, manager, client, id)
    }

    #[test]
    fn allocate_then_release_empties_table() {
        let (broker, manager, _client, id) = setup();
        let granted = manager.allocate_resources(id, &[decoder_request()]).unwrap();
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].category, ResourceCategory::VideoDecoder);
        assert_eq!(manager.owned_count(), 1);

        let ids: Vec<ResourceId> = granted.iter().map(|r| r.id).collect();
        assert!(manager.release_resources(id, &ids));
        assert_eq!(manager.owned_count(), 0);
        assert_eq!(broker.granted_count(), 0);

        // Second release is a reported failure, not a crash.
        assert!(!manager.release_resources(id, &ids));
    }

    #[test]
    fn batch_limits() {
        let (_broker, manager, _client, id) = setup();
        assert_eq!(
            manager.allocate_resources(id, &[]),
            Err(ResourceError::EmptyRequest)
        );
        let too_many = vec![decoder_request(); MAX_RESOURCE_REQUESTS + 1];
        assert!(matches!(
            manager.allocate_resources(id, &too_many),
            Err(ResourceError::TooManyRequests { .. })
        ));
    }

    #[test]
    fn unregistered_client_cannot_allocate() {
        let (_broker, manager, _client, _id) = setup();
        assert_eq!(
            manager.allocate_resources(ClientId(999), &[decoder_request()]),
            Err(ResourceError::UnknownClient(ClientId(999)))
        );
    }

    #[test]
    fn release_by_non_owner_is_refused() {
        let (_broker, manager, _client, owner) = setup();
        let other_client: Arc<dyn ResourceClient> = Arc::new(NullClient);
        let other = manager.register_client(Arc::downgrade(&other_client));
        let granted = manager.allocate_resources(owner, &[decoder_request()]).unwrap();
        assert!(!manager.release_resources(other, &[granted[0].id]));
        assert_eq!(manager.owned_by(owner).len(), 1);
    }

    #[test]
    fn unregister_force_releases() {
        let (broker, manager, _client, id) = setup();
        manager.allocate_resources(id, &[decoder_request()]).unwrap();
        manager.unregister_client(id);
        assert_eq!(manager.owned_count(), 0);
        assert_eq!(broker.granted_count(), 0);
    }
}
