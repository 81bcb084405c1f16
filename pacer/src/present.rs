//! Coalescing of ticks into presented frames.
//!
//! The scheduler may tick many times between two refreshes of the
//! host's display.  Only one presentation request is ever outstanding;
//! ticks which happen while it is outstanding don't make another.
use std::time::Duration;

use tracing::{event, Level};

use super::machine::VirtualMachine;
use super::sinks::RenderSink;

/// Identifies an outstanding presentation request.  The host hands it
/// back when its frame callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameToken(u64);

#[derive(Debug, Default)]
pub struct FramePresenter {
    pending: Option<FrameToken>,
    issued: u64,
}

impl FramePresenter {
    pub fn new() -> FramePresenter {
        FramePresenter::default()
    }

    /// True iff a presentation callback is outstanding.
    pub fn is_queued(&self) -> bool {
        self.pending.is_some()
    }

    /// Asks for a frame to be presented.  Returns `None` when one is
    /// already outstanding; otherwise the caller must register the
    /// returned token with the host's frame callback.
    pub fn request(&mut self) -> Option<FrameToken> {
        if self.pending.is_some() {
            return None;
        }
        self.issued += 1;
        let token = FrameToken(self.issued);
        self.pending = Some(token);
        Some(token)
    }

    /// True iff `token` is the outstanding request.
    pub fn is_outstanding(&self, token: FrameToken) -> bool {
        self.pending == Some(token)
    }

    fn take(&mut self, token: FrameToken) -> bool {
        if self.pending == Some(token) {
            self.pending = None;
            true
        } else {
            event!(
                Level::WARN,
                "ignoring frame callback for {token:?}; outstanding request is {:?}",
                self.pending
            );
            false
        }
    }

    /// Clears the outstanding request without drawing anything.
    pub fn discard(&mut self, token: FrameToken) -> bool {
        self.take(token)
    }

    /// The host's frame callback: draws the current screen of `vm`
    /// and clears the outstanding request.  Returns false (and does
    /// nothing) when `token` is not the outstanding request.
    pub fn present<M: VirtualMachine + ?Sized>(
        &mut self,
        token: FrameToken,
        vm: &mut M,
        sink: &mut dyn RenderSink,
        now: Duration,
    ) -> bool {
        if !self.take(token) {
            return false;
        }
        sink.render(&vm.display_memory(), vm.video_mode(), now);
        vm.mark_frame();
        true
    }
}
