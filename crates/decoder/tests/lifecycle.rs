//! Bring-up failures, preemption, hardware faults, and teardown of the
//! accelerator against the simulated hardware.

mod common;

use std::time::{Duration, Instant};

use vda_common::{
    AcceleratorConfig, BitstreamBuffer, BitstreamId, ErrorKind, MapError, MappableRegion,
    VideoCodecProfile,
};
use vda_decoder::sim::SimScript;
use vda_decoder::{DecoderState, OmxState, VdaEvent};
use vda_resource::ConflictType;

use common::Rig;

const CHUNK: usize = 4096;

fn is_error(e: &VdaEvent) -> bool {
    matches!(e, VdaEvent::NotifyError(_))
}

fn error_count(log: &[VdaEvent]) -> usize {
    log.iter().filter(|e| is_error(e)).count()
}

/// A region the client revoked before the decoder got to it.
struct Revoked;

impl MappableRegion for Revoked {
    fn map(&self) -> Result<&[u8], MapError> {
        Err(MapError("region revoked".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Initialization failures
// ---------------------------------------------------------------------------

#[test]
fn denied_resources_fail_initialize_cleanly() {
    let mut rig = Rig::new(SimScript::default(), AcceleratorConfig::default());
    rig.broker.set_deny(true);
    let err = rig
        .initialize(VideoCodecProfile::H264Main)
        .expect_err("broker denies");
    assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
    assert_eq!(rig.vda.state(), DecoderState::Uninitialized);
    assert!(rig.core.opened_components().is_empty());
    assert_eq!(rig.manager.owned_count(), 0);

    // The same accelerator can be initialized once the hardware is there.
    rig.broker.set_deny(false);
    let mut s = rig.start();
    s.decode(1, 0, CHUNK);
    s.run_until(|e| matches!(e, VdaEvent::PictureReady(_)));
    let (left, _) = s.destroy();
    left.assert_released();
}

#[test]
fn component_open_failure_releases_the_grant() {
    let mut rig = Rig::new(SimScript::default().fail_open(), AcceleratorConfig::default());
    let err = rig
        .initialize(VideoCodecProfile::H264Main)
        .expect_err("open fails");
    assert_eq!(err.kind(), ErrorKind::PlatformFailure);
    assert_eq!(rig.broker.granted_count(), 0);
    assert_eq!(rig.manager.owned_count(), 0);
    assert_eq!(rig.broker.release_calls(), 1);
    assert_eq!(rig.vda.state(), DecoderState::Uninitialized);
}

#[test]
fn unsupported_profile_never_reaches_the_broker() {
    let mut rig = Rig::new(SimScript::default(), AcceleratorConfig::default());
    let err = rig
        .initialize(VideoCodecProfile::HevcMain10)
        .expect_err("mfc decodes 8-bit only");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(rig.broker.allocate_calls(), 0);
}

#[test]
fn component_name_follows_the_grant() {
    let s = Rig::new(SimScript::default(), AcceleratorConfig::default()).start();
    assert_eq!(
        s.rig.core.opened_components(),
        vec!["OMX.SEC.avc.dec".to_string()]
    );
    assert_eq!(s.rig.broker.granted_count(), 1);
    s.destroy();
}

// ---------------------------------------------------------------------------
// Client errors
// ---------------------------------------------------------------------------

#[test]
fn unreadable_chunk_is_reported() {
    let mut s = Rig::new(SimScript::default(), AcceleratorConfig::default()).start();
    s.vda()
        .decode(BitstreamBuffer::new(BitstreamId(1), 0, Revoked));
    let event = s.run_until(is_error);
    assert_eq!(event, VdaEvent::NotifyError(ErrorKind::UnreadableInput));
    s.destroy();
}

#[test]
fn oversized_chunk_is_an_invalid_argument() {
    let mut s = Rig::new(SimScript::default(), AcceleratorConfig::default()).start();
    // MFC input buffers hold 2 MiB at VGA.
    s.decode(1, 0, 3 << 20);
    let event = s.run_until(is_error);
    assert_eq!(event, VdaEvent::NotifyError(ErrorKind::InvalidArgument));

    // Requests after an error are ignored.
    s.decode(2, 1, CHUNK);
    s.vda().flush();
    s.settle(Duration::from_millis(100));
    assert!(!s
        .log
        .iter()
        .any(|e| matches!(e, VdaEvent::NotifyFlushDone | VdaEvent::PictureReady(_))));
    let (left, log) = s.destroy();
    assert_eq!(error_count(&log), 1);
    left.assert_released();
}

#[test]
fn reset_before_initialization_completes_is_an_error() {
    let config = AcceleratorConfig {
        teardown_timeout_ms: 100,
        ..AcceleratorConfig::default()
    };
    let mut s = Rig::new(SimScript::default().stall_on(OmxState::Executing), config).start();
    assert_eq!(s.vda().state(), DecoderState::Initializing);
    s.vda().reset();
    let event = s.run_until(is_error);
    assert_eq!(event, VdaEvent::NotifyError(ErrorKind::InvalidArgument));
    s.destroy();
}

// ---------------------------------------------------------------------------
// Hardware faults and preemption
// ---------------------------------------------------------------------------

#[test]
fn hardware_fault_is_a_platform_failure() {
    let mut s = Rig::new(
        SimScript::default().fault_after(2),
        AcceleratorConfig::default(),
    )
    .start();
    for i in 1..=5 {
        s.decode(i, i64::from(i), CHUNK);
    }
    let event = s.run_until(is_error);
    assert_eq!(event, VdaEvent::NotifyError(ErrorKind::PlatformFailure));
    assert_eq!(s.vda().state(), DecoderState::Error);
    assert!(s.pictures().len() <= 2);

    let (left, log) = s.destroy();
    assert_eq!(error_count(&log), 1);
    left.assert_released();
}

#[test]
fn preemption_releases_hardware_and_reports_once() {
    let mut s = Rig::new(SimScript::default(), AcceleratorConfig::default()).start();
    for i in 1..=3 {
        s.decode(i, i64::from(i), CHUNK);
    }
    s.run_until(|e| matches!(e, VdaEvent::PictureReady(_)));

    let granted = s.rig.broker.granted_ids();
    assert_eq!(granted.len(), 1);
    s.rig
        .broker
        .trigger_conflict(ConflictType::Conflict, granted)
        .expect("spawn conflict thread")
        .join()
        .expect("conflict thread");

    // The broker only returns once the component is gone.
    assert_eq!(s.rig.broker.granted_count(), 0);
    assert_eq!(s.rig.manager.owned_count(), 0);
    assert_eq!(s.rig.core.live_components(), 0);
    assert_eq!(s.vda().state(), DecoderState::Error);

    // Client calls after preemption are no-ops.
    s.decode(9, 9, CHUNK);
    s.vda().reset();
    s.settle(Duration::from_millis(100));
    assert_eq!(s.errors(), vec![ErrorKind::PlatformFailure]);
    assert!(!s
        .log
        .iter()
        .any(|e| matches!(e, VdaEvent::NotifyResetDone)));

    let started = Instant::now();
    let (left, log) = s.destroy();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(error_count(&log), 1);
    left.assert_released();
}

#[test]
fn preemption_unblocks_a_pending_picture_request() {
    let mut s = Rig::new(SimScript::default(), AcceleratorConfig::default()).start();
    s.answer_requests = false;
    s.decode(1, 0, CHUNK);
    s.run_until(|e| matches!(e, VdaEvent::ProvidePictureBuffers { .. }));

    let granted = s.rig.broker.granted_ids();
    s.rig
        .broker
        .trigger_conflict(ConflictType::UserRequested, granted)
        .expect("spawn conflict thread")
        .join()
        .expect("conflict thread");
    assert_eq!(s.rig.core.live_components(), 0);

    let (left, log) = s.destroy();
    assert_eq!(error_count(&log), 1);
    left.assert_released();
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[test]
fn destroy_while_waiting_for_picture_buffers() {
    let mut s = Rig::new(SimScript::default(), AcceleratorConfig::default()).start();
    s.answer_requests = false;
    s.decode(1, 0, CHUNK);
    s.run_until(|e| matches!(e, VdaEvent::ProvidePictureBuffers { .. }));
    let (left, log) = s.destroy();
    assert_eq!(error_count(&log), 0);
    left.assert_released();
}

#[test]
fn unresponsive_hardware_is_torn_down_after_the_timeout() {
    let config = AcceleratorConfig {
        teardown_timeout_ms: 50,
        ..AcceleratorConfig::default()
    };
    let mut s = Rig::new(SimScript::default().stall_on(OmxState::Loaded), config).start();
    s.decode(1, 0, CHUNK);
    s.run_until(|e| matches!(e, VdaEvent::PictureReady(_)));

    let started = Instant::now();
    let (left, log) = s.destroy();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert_eq!(error_count(&log), 0);
    left.assert_released();
}

#[test]
fn dropping_the_accelerator_tears_it_down() {
    let s = Rig::new(SimScript::default(), AcceleratorConfig::default()).start();
    let broker = s.rig.broker.clone();
    let core = s.rig.core.clone();
    drop(s);
    assert_eq!(broker.granted_count(), 0);
    assert_eq!(core.live_components(), 0);
}
