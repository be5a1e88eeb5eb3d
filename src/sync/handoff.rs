//! Transfer to graphics queue handoff.
//!
//! Fences only order the GPU against the CPU. When an upload on the transfer queue needs graphics work afterwards
//! (ownership acquisition, layout transitions, mipmap generation), the two queues are ordered through a semaphore the
//! transfer submission signals and the follow-up submission waits on. The follow-up is an explicit work item so the
//! cross-queue protocol can be inspected and tested.

use std::sync::Arc;
use std::thread::ThreadId;

use crossbeam_channel::{Receiver, Sender};

use crate::sync::payload::{ImageBarrier, ImageResource};
use crate::sync::pool::PooledSemaphore;
use crate::sync::ticket::SubmissionTicket;

/// Graphics queue work that has to run after a transfer submission completed on the GPU.
#[derive(Debug)]
pub struct GraphicsFollowUp {
    /// Signaled by the transfer submission. The follow-up submission waits on it.
    pub semaphore: PooledSemaphore,
    /// Images that become ready once the follow-up completed. Mip chains are generated for those that need them.
    pub images: Vec<Arc<ImageResource>>,
    /// Queue family ownership acquire barriers, matching the release barriers of the transfer submission.
    pub barriers: Vec<ImageBarrier>,
    /// Completes with the follow-up submission.
    pub ticket: SubmissionTicket,
    /// Thread that made the transfer submission.
    pub origin: ThreadId,
}

/// FIFO of pending follow-ups, drained by the owner thread.
#[derive(Debug)]
pub struct HandoffQueue {
    sender: Sender<GraphicsFollowUp>,
    receiver: Receiver<GraphicsFollowUp>,
}

impl Default for HandoffQueue {
    fn default() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
        }
    }
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, follow_up: GraphicsFollowUp) {
        trace!(
            "Queued graphics follow-up for {} image(s) from thread {:?}",
            follow_up.images.len(),
            follow_up.origin
        );
        // Both ends live in self, so the channel can never be disconnected.
        let _ = self.sender.send(follow_up);
    }

    /// Take every follow-up queued so far, oldest first.
    pub fn drain(&self) -> Vec<GraphicsFollowUp> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
