//! Shared harness for the accelerator integration tests: a simulated core,
//! a fake broker, and a client that answers picture buffer requests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::RecvTimeoutError;

use vda_common::{
    AcceleratorConfig, BitstreamBuffer, BitstreamId, DecoderConfig, ErrorKind, Picture,
    PictureBuffer, PictureBufferId, Resolution, TextureId, VdaResult, VideoCodecProfile,
};
use vda_decoder::sim::{RecordingSurface, SimScript, SimulatedCore};
use vda_decoder::{EventReceiver, OmxVideoDecodeAccelerator, VdaEvent};
use vda_resource::{FakeBroker, ResourceManager};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Rig {
    pub broker: Arc<FakeBroker>,
    pub manager: Arc<ResourceManager>,
    pub core: Arc<SimulatedCore>,
    pub surface: Arc<RecordingSurface>,
    pub vda: OmxVideoDecodeAccelerator,
}

impl Rig {
    pub fn new(script: SimScript, config: AcceleratorConfig) -> Self {
        let broker = Arc::new(FakeBroker::new());
        let manager = ResourceManager::new(broker.clone());
        let core = Arc::new(SimulatedCore::new(script));
        let surface = Arc::new(RecordingSurface::new());
        let vda = OmxVideoDecodeAccelerator::new(
            core.clone(),
            manager.clone(),
            surface.clone(),
            config,
        );
        Self {
            broker,
            manager,
            core,
            surface,
            vda,
        }
    }

    pub fn initialize(&mut self, profile: VideoCodecProfile) -> VdaResult<EventReceiver> {
        self.vda
            .initialize(&DecoderConfig::new(profile, Resolution::VGA))
    }

    /// Initialize for H.264 and wrap the result in a [`Session`].
    pub fn start(mut self) -> Session {
        let events = self
            .initialize(VideoCodecProfile::H264Main)
            .expect("initialize");
        Session {
            rig: self,
            events,
            log: Vec::new(),
            held: Vec::new(),
            answer_requests: true,
            auto_reuse: true,
            next_picture: 0,
        }
    }
}

pub struct Session {
    pub rig: Rig,
    pub events: EventReceiver,
    pub log: Vec<VdaEvent>,
    /// Pictures delivered and not yet returned (when `auto_reuse` is off).
    pub held: Vec<PictureBufferId>,
    pub answer_requests: bool,
    pub auto_reuse: bool,
    next_picture: i32,
}

impl Session {
    pub fn vda(&self) -> &OmxVideoDecodeAccelerator {
        &self.rig.vda
    }

    pub fn decode(&self, id: i32, timestamp: i64, len: usize) {
        self.rig
            .vda
            .decode(BitstreamBuffer::from_bytes(id, timestamp, vec![0xA5; len]));
    }

    /// Picture buffers matching a `ProvidePictureBuffers` request.
    pub fn buffers_for(&mut self, count: u32, size: Resolution) -> Vec<PictureBuffer> {
        (0..count)
            .map(|_| {
                self.next_picture += 1;
                PictureBuffer {
                    id: PictureBufferId(self.next_picture),
                    texture: TextureId(1000 + self.next_picture as u32),
                    size,
                }
            })
            .collect()
    }

    /// Receive and react to the next event.
    pub fn step(&mut self) -> VdaEvent {
        let event = self.events.recv_timeout(WAIT).expect("event before timeout");
        self.react(&event);
        self.log.push(event.clone());
        event
    }

    fn react(&mut self, event: &VdaEvent) {
        match event {
            VdaEvent::ProvidePictureBuffers { count, size, .. } if self.answer_requests => {
                let buffers = self.buffers_for(*count, *size);
                self.rig.vda.assign_picture_buffers(buffers);
            }
            VdaEvent::PictureReady(picture) => {
                if self.auto_reuse {
                    self.rig
                        .vda
                        .reuse_picture_buffer(picture.picture_buffer_id, None);
                } else {
                    self.held.push(picture.picture_buffer_id);
                }
            }
            _ => {}
        }
    }

    /// Step until `done` matches an event; returns that event.
    pub fn run_until(&mut self, mut done: impl FnMut(&VdaEvent) -> bool) -> VdaEvent {
        loop {
            let event = self.step();
            if done(&event) {
                return event;
            }
        }
    }

    /// Step through whatever arrives within `quiet`.
    pub fn settle(&mut self, quiet: Duration) {
        loop {
            match self.events.recv_timeout(quiet) {
                Ok(event) => {
                    self.react(&event);
                    self.log.push(event);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    pub fn pictures(&self) -> Vec<Picture> {
        self.log
            .iter()
            .filter_map(|e| match e {
                VdaEvent::PictureReady(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn finished_bitstreams(&self) -> Vec<BitstreamId> {
        self.log
            .iter()
            .filter_map(|e| match e {
                VdaEvent::NotifyEndOfBitstreamBuffer(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorKind> {
        self.log
            .iter()
            .filter_map(|e| match e {
                VdaEvent::NotifyError(kind) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&VdaEvent) -> bool) -> usize {
        self.log.iter().filter(|e| pred(e)).count()
    }

    /// Destroy the accelerator and collect every event still queued.
    pub fn destroy(self) -> (Leftovers, Vec<VdaEvent>) {
        let Session {
            rig,
            events,
            mut log,
            ..
        } = self;
        let Rig {
            broker,
            manager,
            core,
            surface,
            vda,
        } = rig;
        vda.destroy();
        log.extend(events.try_iter());
        (
            Leftovers {
                broker,
                manager,
                core,
                surface,
            },
            log,
        )
    }
}

/// What is left to inspect after a destroy.
pub struct Leftovers {
    pub broker: Arc<FakeBroker>,
    pub manager: Arc<ResourceManager>,
    pub core: Arc<SimulatedCore>,
    pub surface: Arc<RecordingSurface>,
}

impl Leftovers {
    /// Nothing is held at the broker, the manager, or the hardware.
    pub fn assert_released(&self) {
        assert_eq!(self.broker.granted_count(), 0);
        assert_eq!(self.manager.owned_count(), 0);
        assert_eq!(self.core.live_components(), 0);
        assert_eq!(self.surface.bound_count(), 0);
    }
}

pub fn ids(raw: &[i32]) -> Vec<BitstreamId> {
    raw.iter().copied().map(BitstreamId).collect()
}
