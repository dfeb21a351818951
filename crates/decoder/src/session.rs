//! State shared by the client façade, the decoder thread and the output
//! thread of one accelerator session.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{error, warn};

use vda_common::VdaError;

use crate::event::{EventSink, VdaEvent};
use crate::input::InputPool;
use crate::output::OutputContext;
use crate::state::{DecoderState, StateCell, StatsCounters};

pub(crate) struct Session {
    state: StateCell,
    errored: AtomicBool,
    events: EventSink,
    pub(crate) stats: StatsCounters,
    pub(crate) input: Mutex<InputPool>,
    pub(crate) output: OutputContext,
}

impl Session {
    pub(crate) fn new(events: EventSink) -> Self {
        Self {
            state: StateCell::new(),
            errored: AtomicBool::new(false),
            events,
            stats: StatsCounters::default(),
            input: Mutex::new(InputPool::new()),
            output: OutputContext::new(),
        }
    }

    pub(crate) fn state(&self) -> DecoderState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, next: DecoderState) {
        let from = self.state.get();
        if !self.state.set(next) {
            warn!(%from, to = %next, "Ignoring state transition");
        }
    }

    pub(crate) fn is_error(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    pub(crate) fn emit(&self, event: VdaEvent) {
        self.events.emit(event);
    }

    /// Enter the Error state. Only the first caller notifies the client;
    /// later errors are logged and swallowed. Any grow wait is failed.
    pub(crate) fn fail(&self, err: &VdaError) -> bool {
        if self.errored.swap(true, Ordering::AcqRel) {
            warn!(error = %err, "Further error after entering Error state");
            return false;
        }
        error!(error = %err, kind = ?err.kind(), "Decoder entering Error state");
        self.state.set(DecoderState::Error);
        self.output.abort();
        self.events.emit(VdaEvent::NotifyError(err.kind()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use vda_common::ErrorKind;

    #[test]
    fn only_first_error_is_notified() {
        let (tx, rx) = unbounded();
        let session = Session::new(EventSink::new(tx));
        session.set_state(DecoderState::Decoding);

        assert!(session.fail(&VdaError::PlatformFailure("boom".into())));
        assert!(!session.fail(&VdaError::InvalidArgument("again".into())));
        assert!(session.is_error());
        assert_eq!(session.state(), DecoderState::Error);

        let events: Vec<VdaEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![VdaEvent::NotifyError(ErrorKind::PlatformFailure)]
        );
        assert!(session.output.lock().dropping);
    }

    #[test]
    fn error_state_survives_later_transitions() {
        let (tx, _rx) = unbounded();
        let session = Session::new(EventSink::new(tx));
        session.fail(&VdaError::PlatformFailure("boom".into()));
        session.set_state(DecoderState::AfterReset);
        assert_eq!(session.state(), DecoderState::Error);
        session.set_state(DecoderState::Destroying);
        assert_eq!(session.state(), DecoderState::Destroying);
    }
}
