use std::sync::Arc;

use anyhow::Result;
use ash::prelude::VkResult;
use ash::vk;

use crate::core::device::DeviceContext;
use crate::sync::pool::SemaphoreId;
use crate::Error;

/// Wrapper around a [`VkFence`](vk::Fence) object. Fences are used for CPU-GPU sync.
///
/// A pooled fence is reused across many submissions: checked out (`in_use`), submitted, polled until it signals,
/// and checked back in. While submitted it owns the release of the semaphores its submission waited on.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Fence {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn DeviceContext>,
    handle: vk::Fence,
    in_use: bool,
    submitted: bool,
    wait_semaphores: Vec<SemaphoreId>,
}

impl Fence {
    /// Create a new fence in the unsignaled status.
    pub fn new(device: Arc<dyn DeviceContext>) -> VkResult<Self> {
        let handle = device.create_fence(false)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new VkFence {handle:?}");
        Ok(Fence {
            device,
            handle,
            in_use: false,
            submitted: false,
            wait_semaphores: vec![],
        })
    }

    /// Get unsafe access to the underlying `VkFence` handle.
    /// # Safety
    /// * The caller must not reset or destroy the fence.
    pub unsafe fn handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Semaphores this fence releases once it signals.
    pub fn wait_semaphores(&self) -> &[SemaphoreId] {
        &self.wait_semaphores
    }

    /// Check the fence out of its pool.
    pub fn checkout(&mut self) -> Result<()> {
        if self.in_use {
            return Err(Error::ProtocolViolation("fence checked out twice").into());
        }
        self.in_use = true;
        Ok(())
    }

    /// The fence was handed to a successful queue submission that waited on `wait_semaphores`.
    pub fn mark_submitted(&mut self, wait_semaphores: Vec<SemaphoreId>) -> Result<()> {
        if !self.in_use {
            return Err(Error::ProtocolViolation("submitted a fence that was not checked out").into());
        }
        if self.submitted {
            return Err(Error::ProtocolViolation("fence submitted twice").into());
        }
        self.submitted = true;
        self.wait_semaphores = wait_semaphores;
        Ok(())
    }

    /// Undo [`Fence::mark_submitted`] after the queue submission failed. The fence stays checked out.
    pub(crate) fn cancel_submission(&mut self) {
        self.submitted = false;
        self.wait_semaphores.clear();
    }

    /// Poll the fence. A zero timeout never blocks. On success the fence is reset and leaves the submitted state,
    /// and the semaphores it owned are returned so the caller can finish their waits.
    ///
    /// Returns `Ok(None)` if the fence did not signal within the timeout.
    pub fn check_return(&mut self, timeout: u64) -> Result<Option<Vec<SemaphoreId>>> {
        if !self.submitted {
            return Err(Error::ProtocolViolation("polled a fence that was never submitted").into());
        }
        let signaled = if timeout == 0 {
            self.device.fence_status(self.handle)?
        } else {
            self.device.wait_for_fence(self.handle, timeout)?
        };
        if !signaled {
            return Ok(None);
        }
        self.device.reset_fence(self.handle)?;
        self.submitted = false;
        Ok(Some(std::mem::take(&mut self.wait_semaphores)))
    }

    /// Check the fence back into its pool.
    pub fn release(&mut self) -> Result<()> {
        if self.submitted {
            return Err(Error::ProtocolViolation("released a fence the GPU may still signal").into());
        }
        self.in_use = false;
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkFence {:?}", self.handle);
        self.device.destroy_fence(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::SubmitDescriptor;
    use crate::core::headless::{Completion, HeadlessDevice};
    use crate::QueueType;

    fn fence(completion: Completion) -> (Arc<HeadlessDevice>, Fence) {
        let device = Arc::new(HeadlessDevice::single_queue(completion));
        let fence = Fence::new(device.clone()).unwrap();
        (device, fence)
    }

    fn submit(device: &HeadlessDevice, fence: &Fence) {
        device
            .queue_submit(QueueType::Graphics, &SubmitDescriptor::default(), unsafe { fence.handle() })
            .unwrap();
    }

    #[test]
    fn never_returns_unless_submitted() {
        let (device, mut fence) = fence(Completion::Immediate);
        assert!(fence.check_return(0).is_err());
        fence.checkout().unwrap();
        assert!(fence.check_return(0).is_err());
        submit(&device, &fence);
        fence.mark_submitted(vec![SemaphoreId(3)]).unwrap();
        assert_eq!(fence.check_return(0).unwrap(), Some(vec![SemaphoreId(3)]));
        assert!(!fence.is_submitted());
        assert!(fence.wait_semaphores().is_empty());
        fence.release().unwrap();
        assert!(!fence.is_in_use());
    }

    #[test]
    fn zero_timeout_poll_is_not_an_error() {
        let (device, mut fence) = fence(Completion::Manual);
        fence.checkout().unwrap();
        submit(&device, &fence);
        fence.mark_submitted(vec![]).unwrap();
        assert_eq!(fence.check_return(0).unwrap(), None);
        assert!(fence.is_submitted());
        device.complete_all();
        assert_eq!(fence.check_return(0).unwrap(), Some(vec![]));
    }

    #[test]
    fn submitted_implies_in_use() {
        let (_device, mut fence) = fence(Completion::Manual);
        assert!(fence.mark_submitted(vec![]).is_err());
        fence.checkout().unwrap();
        fence.mark_submitted(vec![]).unwrap();
        assert!(fence.release().is_err());
        assert!(fence.is_in_use());
    }
}
