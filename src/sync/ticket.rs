//! Completion handle for asynchronous single-time submissions.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;

#[derive(Debug, Default)]
struct TicketState {
    complete: AtomicBool,
    waker: AtomicWaker,
}

/// Handed out for every single-time submission. It completes once the fence guarding the submission signaled and the
/// resources it held were released.
///
/// Submissions made on the owner thread are reclaimed by [`SyncHub::run_graphics_callbacks`](crate::SyncHub::run_graphics_callbacks),
/// so a ticket obtained there only completes after a later sweep. Tickets can be awaited, like any future.
/// # Example
/// ```
/// # use quay::*;
/// # use futures::FutureExt;
/// let ticket = SubmissionTicket::completed();
/// assert!(ticket.is_complete());
/// assert_eq!(ticket.now_or_never(), Some(()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SubmissionTicket {
    state: Arc<TicketState>,
}

impl SubmissionTicket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A ticket for work that already completed.
    pub fn completed() -> Self {
        let ticket = Self::new();
        ticket.complete();
        ticket
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self) -> bool {
        self.state.complete.load(Ordering::Acquire)
    }

    pub(crate) fn complete(&self) {
        self.state.complete.store(true, Ordering::Release);
        self.state.waker.wake();
    }
}

impl Future for SubmissionTicket {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.is_complete() {
            return Poll::Ready(());
        }
        self.state.waker.register(cx.waker());
        // Completion may have raced with registering the waker.
        if self.is_complete() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    #[test]
    fn pending_until_completed() {
        let ticket = SubmissionTicket::new();
        let observer = ticket.clone();
        assert!(observer.clone().now_or_never().is_none());
        ticket.complete();
        assert!(observer.is_complete());
        assert_eq!(observer.now_or_never(), Some(()));
    }

    #[test]
    fn completion_wakes_a_blocked_executor() {
        let ticket = SubmissionTicket::new();
        let completer = ticket.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            completer.complete();
        });
        futures::executor::block_on(ticket);
        handle.join().unwrap();
    }
}
