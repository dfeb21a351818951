//! Client notifications.
//!
//! Every notification the accelerator produces travels through one crossbeam
//! channel as a [`VdaEvent`]. Clients either drain the [`EventReceiver`]
//! directly or implement [`VdaClient`] and call [`VdaEvent::dispatch`].

use crossbeam::channel::{Receiver, Sender};
use tracing::trace;

use vda_common::{
    BitstreamId, ErrorKind, Picture, PictureBufferId, PixelFormat, Resolution, TextureTarget,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VdaEvent {
    /// Allocate `count` textures of `size` and hand them back through
    /// `assign_picture_buffers`.
    ProvidePictureBuffers {
        count: u32,
        format: PixelFormat,
        planes: u32,
        size: Resolution,
        target: TextureTarget,
    },
    /// The picture buffer will not be used again; its texture may be deleted.
    DismissPictureBuffer(PictureBufferId),
    PictureReady(Picture),
    /// The bitstream buffer has been consumed and may be reused.
    NotifyEndOfBitstreamBuffer(BitstreamId),
    NotifyFlushDone,
    NotifyResetDone,
    NotifyError(ErrorKind),
}

pub type EventReceiver = Receiver<VdaEvent>;

/// Callback-style view of the event stream.
pub trait VdaClient {
    fn provide_picture_buffers(
        &mut self,
        count: u32,
        format: PixelFormat,
        planes: u32,
        size: Resolution,
        target: TextureTarget,
    );
    fn dismiss_picture_buffer(&mut self, id: PictureBufferId);
    fn picture_ready(&mut self, picture: Picture);
    fn notify_end_of_bitstream_buffer(&mut self, id: BitstreamId);
    fn notify_flush_done(&mut self);
    fn notify_reset_done(&mut self);
    fn notify_error(&mut self, kind: ErrorKind);
}

impl VdaEvent {
    pub fn dispatch(self, client: &mut dyn VdaClient) {
        match self {
            Self::ProvidePictureBuffers {
                count,
                format,
                planes,
                size,
                target,
            } => client.provide_picture_buffers(count, format, planes, size, target),
            Self::DismissPictureBuffer(id) => client.dismiss_picture_buffer(id),
            Self::PictureReady(picture) => client.picture_ready(picture),
            Self::NotifyEndOfBitstreamBuffer(id) => client.notify_end_of_bitstream_buffer(id),
            Self::NotifyFlushDone => client.notify_flush_done(),
            Self::NotifyResetDone => client.notify_reset_done(),
            Self::NotifyError(kind) => client.notify_error(kind),
        }
    }
}

/// Sending half of the event channel. A client that dropped its receiver
/// just stops hearing from us.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: Sender<VdaEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<VdaEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: VdaEvent) {
        trace!(?event, "Client event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl VdaClient for Recorder {
        fn provide_picture_buffers(
            &mut self,
            count: u32,
            _format: PixelFormat,
            _planes: u32,
            size: Resolution,
            _target: TextureTarget,
        ) {
            self.calls.push(format!("provide {count} {size}"));
        }
        fn dismiss_picture_buffer(&mut self, id: PictureBufferId) {
            self.calls.push(format!("dismiss {}", id.0));
        }
        fn picture_ready(&mut self, picture: Picture) {
            self.calls.push(format!("ready {}", picture.picture_buffer_id.0));
        }
        fn notify_end_of_bitstream_buffer(&mut self, id: BitstreamId) {
            self.calls.push(format!("eobb {}", id.0));
        }
        fn notify_flush_done(&mut self) {
            self.calls.push("flush".into());
        }
        fn notify_reset_done(&mut self) {
            self.calls.push("reset".into());
        }
        fn notify_error(&mut self, kind: ErrorKind) {
            self.calls.push(format!("error {kind:?}"));
        }
    }

    #[test]
    fn dispatch_routes_each_event() {
        let (tx, rx) = unbounded();
        let sink = EventSink::new(tx);
        sink.emit(VdaEvent::ProvidePictureBuffers {
            count: 4,
            format: PixelFormat::Nv12,
            planes: 2,
            size: Resolution::VGA,
            target: TextureTarget::Texture2D,
        });
        sink.emit(VdaEvent::NotifyEndOfBitstreamBuffer(BitstreamId(3)));
        sink.emit(VdaEvent::DismissPictureBuffer(PictureBufferId(1)));
        sink.emit(VdaEvent::NotifyFlushDone);
        sink.emit(VdaEvent::NotifyError(ErrorKind::PlatformFailure));
        drop(sink);

        let mut client = Recorder::default();
        for event in rx.iter() {
            event.dispatch(&mut client);
        }
        assert_eq!(
            client.calls,
            vec![
                "provide 4 640x480",
                "eobb 3",
                "dismiss 1",
                "flush",
                "error PlatformFailure"
            ]
        );
    }

    #[test]
    fn emitting_after_receiver_dropped_is_harmless() {
        let (tx, rx) = unbounded();
        drop(rx);
        EventSink::new(tx).emit(VdaEvent::NotifyResetDone);
    }
}
