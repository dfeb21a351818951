//! Integration tests for the preemption round trip between the broker, the
//! resource manager, and its clients.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use vda_common::{DecoderConfig, Resolution, VideoCodecProfile};
use vda_resource::{
    ClientId, ConflictType, FakeBroker, ResourceCategory, ResourceClient, ResourceId,
    ResourceManager, ResourceRequest, Waitable,
};

// ---------------------------------------------------------------------------
// Helper clients
// ---------------------------------------------------------------------------

/// Releases asynchronously on a worker thread, then signals the waitable.
struct DeferredReleaser {
    manager: Mutex<Option<Arc<ResourceManager>>>,
    id: Mutex<Option<ClientId>>,
    seen: Mutex<Vec<(ConflictType, Vec<ResourceId>)>>,
}

impl DeferredReleaser {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            manager: Mutex::new(None),
            id: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl ResourceClient for DeferredReleaser {
    fn on_resource_conflict(&self, waitable: Waitable, conflict: ConflictType, ids: &[ResourceId]) -> bool {
        self.seen.lock().push((conflict, ids.to_vec()));
        let manager = self.manager.lock().clone().expect("manager set");
        let client = self.id.lock().expect("client registered");
        let ids = ids.to_vec();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            assert!(manager.release_resources(client, &ids));
            waitable.signal();
        });
        false
    }
}

/// Releases synchronously inside the callback.
struct ImmediateReleaser {
    manager: Arc<ResourceManager>,
    id: Mutex<Option<ClientId>>,
}

impl ResourceClient for ImmediateReleaser {
    fn on_resource_conflict(&self, _waitable: Waitable, _conflict: ConflictType, ids: &[ResourceId]) -> bool {
        let client = self.id.lock().expect("client registered");
        self.manager.release_resources(client, ids)
    }
}

fn decoder_request() -> ResourceRequest {
    ResourceRequest::video_decoder(&DecoderConfig::new(
        VideoCodecProfile::H264High,
        Resolution::FHD,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn conflict_blocks_broker_until_client_signals() {
    let broker = Arc::new(FakeBroker::new());
    let manager = ResourceManager::new(broker.clone());

    let client = DeferredReleaser::new();
    *client.manager.lock() = Some(manager.clone());
    let weak: std::sync::Weak<dyn ResourceClient> = Arc::downgrade(&(client.clone() as Arc<dyn ResourceClient>));
    let id = manager.register_client(weak);
    *client.id.lock() = Some(id);

    let granted = manager.allocate_resources(id, &[decoder_request()]).unwrap();
    assert_eq!(granted[0].component_name, "OMX.SEC.avc.dec");

    let handle = broker
        .trigger_conflict(ConflictType::Conflict, vec![granted[0].id])
        .unwrap();
    handle.join().unwrap();

    // The broker thread only returns after the deferred release completed.
    assert_eq!(manager.owned_count(), 0);
    assert_eq!(broker.granted_count(), 0);
    let seen = client.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], (ConflictType::Conflict, vec![granted[0].id]));
}

#[test]
fn synchronous_release_returns_immediately() {
    let broker = Arc::new(FakeBroker::new());
    let manager = ResourceManager::new(broker.clone());
    let client = Arc::new(ImmediateReleaser {
        manager: manager.clone(),
        id: Mutex::new(None),
    });
    let as_dyn: Arc<dyn ResourceClient> = client.clone();
    let id = manager.register_client(Arc::downgrade(&as_dyn));
    *client.id.lock() = Some(id);

    let granted = manager.allocate_resources(id, &[decoder_request()]).unwrap();
    broker
        .trigger_conflict(ConflictType::UserRequested, vec![granted[0].id])
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(manager.owned_count(), 0);
}

#[test]
fn conflict_for_dead_client_is_force_released() {
    let broker = Arc::new(FakeBroker::new());
    let manager = ResourceManager::new(broker.clone());
    let id = {
        let client: Arc<dyn ResourceClient> = DeferredReleaser::new();
        let id = manager.register_client(Arc::downgrade(&client));
        manager.allocate_resources(id, &[decoder_request()]).unwrap();
        id
    };
    assert_eq!(manager.owned_by(id).len(), 1);

    let ids = broker.granted_ids();
    broker
        .trigger_conflict(ConflictType::Conflict, ids)
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(manager.owned_count(), 0);
    assert_eq!(broker.granted_count(), 0);
}

#[test]
fn under_allocation_fails_atomically() {
    let broker = Arc::new(FakeBroker::new().with_capacity(ResourceCategory::Scaler, 2));
    broker.set_under_grant(true);
    let manager = ResourceManager::new(broker.clone());
    let client: Arc<dyn ResourceClient> = DeferredReleaser::new();
    let id = manager.register_client(Arc::downgrade(&client));

    let scaler = ResourceRequest::scaler(Resolution::FHD);
    assert!(manager.allocate_resources(id, &[scaler, scaler]).is_err());
    assert_eq!(manager.owned_count(), 0);
    assert_eq!(broker.granted_count(), 0);
}

#[test]
fn denial_surfaces_as_error() {
    let broker = Arc::new(FakeBroker::new());
    broker.set_deny(true);
    let manager = ResourceManager::new(broker.clone());
    let client: Arc<dyn ResourceClient> = DeferredReleaser::new();
    let id = manager.register_client(Arc::downgrade(&client));
    assert!(manager.allocate_resources(id, &[decoder_request()]).is_err());
    assert_eq!(broker.allocate_calls(), 1);
}
