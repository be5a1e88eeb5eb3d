use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::ThreadId;

use anyhow::Result;
use ash::vk;

use crate::core::device::DeviceContext;
use crate::Error;

/// Number of state changes kept in a semaphore's causality trace.
const TRACE_LENGTH: usize = 16;

/// State change recorded in a semaphore's causality trace.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SemaphoreEvent {
    BeginSignaling,
    BeginWaiting,
    CancelWaiting,
    FinishWaiting,
    Reset,
}

/// Wrapper around a binary [`VkSemaphore`](vk::Semaphore) object. Semaphores are used for GPU-GPU sync.
///
/// The GPU does not let us observe a binary semaphore, so its state is tracked on the CPU:
/// - idle: free to be handed out for signaling.
/// - signaling: a submission signals it, nothing has been submitted that waits on it yet.
/// - waiting: a submission waits on it. It becomes idle once the fence of that submission signaled.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Semaphore {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn DeviceContext>,
    handle: vk::Semaphore,
    waiting: bool,
    signaling: bool,
    trace: Option<VecDeque<(SemaphoreEvent, ThreadId)>>,
}

impl Semaphore {
    /// Create a new `VkSemaphore` object.
    pub fn new(device: Arc<dyn DeviceContext>, trace: bool) -> Result<Self> {
        let handle = device.create_semaphore()?;
        #[cfg(feature = "log-objects")]
        trace!("Created new VkSemaphore {handle:?}");
        Ok(Semaphore {
            device,
            handle,
            waiting: false,
            signaling: false,
            trace: trace.then(VecDeque::new),
        })
    }

    /// Get unsafe access to the underlying `VkSemaphore` handle.
    /// # Safety
    /// * The caller must not destroy the semaphore, and must not use it outside of the submission it was handed out for.
    pub unsafe fn handle(&self) -> vk::Semaphore {
        self.handle
    }

    pub fn is_idle(&self) -> bool {
        !(self.waiting || self.signaling)
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn is_signaling(&self) -> bool {
        self.signaling
    }

    /// Hand the semaphore out to a submission that will signal it.
    pub fn begin_signaling(&mut self) -> Result<()> {
        if !self.is_idle() {
            return Err(Error::ProtocolViolation("semaphore armed for signaling while not idle").into());
        }
        self.signaling = true;
        self.record(SemaphoreEvent::BeginSignaling);
        Ok(())
    }

    /// A submission waiting on this semaphore was made. The pending signal is consumed by that wait.
    pub fn begin_waiting(&mut self) -> Result<()> {
        if self.waiting {
            return Err(Error::ProtocolViolation("semaphore armed for waiting twice").into());
        }
        if !self.signaling {
            return Err(Error::ProtocolViolation("wait on a semaphore that nothing signals").into());
        }
        self.signaling = false;
        self.waiting = true;
        self.record(SemaphoreEvent::BeginWaiting);
        Ok(())
    }

    /// The submission that would have waited on this semaphore never reached the GPU. The signal it would have
    /// consumed is still pending, so the semaphore goes back to signaling.
    pub fn cancel_waiting(&mut self) -> Result<()> {
        if !self.waiting {
            return Err(Error::ProtocolViolation("cancelled a semaphore wait that never began").into());
        }
        self.waiting = false;
        self.signaling = true;
        self.record(SemaphoreEvent::CancelWaiting);
        Ok(())
    }

    /// The submission waiting on this semaphore completed.
    pub fn finish_waiting(&mut self) -> Result<()> {
        if !self.waiting {
            return Err(Error::ProtocolViolation("finished a semaphore wait that never began").into());
        }
        self.waiting = false;
        self.record(SemaphoreEvent::FinishWaiting);
        Ok(())
    }

    /// Force the semaphore back to idle. Only valid when the GPU cannot reference it anymore,
    /// such as after a failed submission or at teardown.
    pub fn reset(&mut self) {
        self.waiting = false;
        self.signaling = false;
        self.record(SemaphoreEvent::Reset);
    }

    /// Causality trace, oldest first. Empty if tracing is disabled.
    pub fn trace(&self) -> Vec<(SemaphoreEvent, ThreadId)> {
        self.trace
            .as_ref()
            .map(|trace| trace.iter().copied().collect())
            .unwrap_or_default()
    }

    fn record(&mut self, event: SemaphoreEvent) {
        if let Some(trace) = &mut self.trace {
            if trace.len() == TRACE_LENGTH {
                trace.pop_front();
            }
            trace.push_back((event, std::thread::current().id()));
        }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkSemaphore {:?}", self.handle);
        self.device.destroy_semaphore(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::headless::{Completion, HeadlessDevice};

    fn semaphore() -> Semaphore {
        let device: Arc<dyn DeviceContext> = Arc::new(HeadlessDevice::single_queue(Completion::Immediate));
        Semaphore::new(device, true).unwrap()
    }

    fn idle_matches_flags(semaphore: &Semaphore) -> bool {
        semaphore.is_idle() == !(semaphore.is_waiting() || semaphore.is_signaling())
    }

    #[test]
    fn full_cycle() {
        let mut semaphore = semaphore();
        assert!(semaphore.is_idle());
        semaphore.begin_signaling().unwrap();
        assert!(semaphore.is_signaling() && !semaphore.is_idle());
        semaphore.begin_waiting().unwrap();
        assert!(semaphore.is_waiting() && !semaphore.is_signaling());
        semaphore.finish_waiting().unwrap();
        assert!(semaphore.is_idle());

        let events = semaphore.trace().into_iter().map(|(event, _)| event).collect::<Vec<_>>();
        assert_eq!(
            events,
            [SemaphoreEvent::BeginSignaling, SemaphoreEvent::BeginWaiting, SemaphoreEvent::FinishWaiting]
        );
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut semaphore = semaphore();
        assert!(semaphore.finish_waiting().is_err());
        assert!(semaphore.begin_waiting().is_err());
        semaphore.begin_signaling().unwrap();
        assert!(semaphore.begin_signaling().is_err());
        semaphore.begin_waiting().unwrap();
        assert!(semaphore.begin_waiting().is_err());
        assert!(semaphore.begin_signaling().is_err());
    }

    #[test]
    fn idle_predicate_holds_for_every_sequence() {
        // Every sequence of up to five operations, applied from idle.
        for sequence in 0..4u32.pow(5) {
            let mut semaphore = semaphore();
            let mut ops = sequence;
            for _ in 0..5 {
                let _ = match ops % 4 {
                    0 => semaphore.begin_signaling(),
                    1 => semaphore.begin_waiting(),
                    2 => semaphore.finish_waiting(),
                    _ => {
                        semaphore.reset();
                        Ok(())
                    }
                };
                assert!(idle_matches_flags(&semaphore));
                ops /= 4;
            }
        }
    }

    #[test]
    fn cancelled_wait_keeps_the_pending_signal() {
        let mut semaphore = semaphore();
        assert!(semaphore.cancel_waiting().is_err());
        semaphore.begin_signaling().unwrap();
        semaphore.begin_waiting().unwrap();
        semaphore.cancel_waiting().unwrap();
        assert!(semaphore.is_signaling() && !semaphore.is_waiting());
        // The next waiter consumes the signal.
        semaphore.begin_waiting().unwrap();
        semaphore.finish_waiting().unwrap();
        assert!(semaphore.is_idle());
    }

    #[test]
    fn trace_is_bounded() {
        let mut semaphore = semaphore();
        for _ in 0..TRACE_LENGTH * 2 {
            semaphore.reset();
        }
        assert_eq!(semaphore.trace().len(), TRACE_LENGTH);
    }
}
