//! A simulated device for driving the synchronization core without a GPU.
//!
//! Handles are plain counters. Every call is appended to an event log so tests and tools can check exactly what
//! would have reached the driver, and in which order. Submitted work completes either at submission time or when
//! the owner of the device says so, which makes it possible to hold fences in the submitted state on purpose.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;

use crate::core::device::{DeviceContext, PresentDescriptor, SubmitDescriptor};
use crate::core::queue::{QueueFamilies, QueueType};
use crate::sync::payload::{ImageBarrier, ImageResource};

/// When submitted work finishes on the simulated GPU.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Fences are signaled as soon as the submission is made.
    Immediate,
    /// Fences stay unsignaled until [`HeadlessDevice::complete_all`] is called, or until a thread blocks on them
    /// with a non-zero timeout (a GPU always catches up with a CPU that waits for it).
    Manual,
}

/// Everything that reached the simulated driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Submit {
        queue: QueueType,
        submit: SubmitDescriptor,
        fence: vk::Fence,
    },
    Present(PresentDescriptor),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    ResetCommandBuffer(vk::CommandBuffer),
    Barriers {
        cmd: vk::CommandBuffer,
        barriers: Vec<ImageBarrier>,
    },
    GenerateMipmaps {
        cmd: vk::CommandBuffer,
        image: vk::Image,
    },
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: u64,
    live: HashSet<u64>,
    signaled: HashMap<u64, bool>,
    pending: Vec<vk::Fence>,
    events: Vec<DeviceEvent>,
    /// Number of submissions to let through, and the error the one after them fails with.
    fail_submit: Option<(usize, vk::Result)>,
}

impl HeadlessState {
    fn allocate(&mut self) -> u64 {
        self.next_handle += 1;
        self.live.insert(self.next_handle);
        self.next_handle
    }

    fn complete_pending(&mut self) {
        for fence in self.pending.drain(..) {
            self.signaled.insert(fence.as_raw(), true);
        }
    }
}

/// [`DeviceContext`] without a GPU behind it.
#[derive(Debug)]
pub struct HeadlessDevice {
    families: QueueFamilies,
    completion: Completion,
    state: Mutex<HeadlessState>,
}

impl HeadlessDevice {
    /// Create a simulated device with the given queue topology.
    pub fn new(families: QueueFamilies, completion: Completion) -> Self {
        Self {
            families,
            completion,
            state: Mutex::new(HeadlessState::default()),
        }
    }

    /// One queue family doing everything.
    pub fn single_queue(completion: Completion) -> Self {
        Self::new(QueueFamilies::new(0).with_present(0), completion)
    }

    /// Graphics and present on family 0, a dedicated transfer queue on family 1.
    pub fn with_transfer_queue(completion: Completion) -> Self {
        Self::new(QueueFamilies::new(0).with_present(0).with_transfer(1), completion)
    }

    fn state(&self) -> MutexGuard<HeadlessState> {
        // A panicking test thread must not take every other assertion down with it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Signal the fence of every submission made so far.
    pub fn complete_all(&self) {
        self.state().complete_pending();
    }

    /// Number of submissions that have not completed yet.
    pub fn pending_submissions(&self) -> usize {
        self.state().pending.len()
    }

    /// Make the next `queue_submit` fail with `result`.
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.fail_submit_after(0, result);
    }

    /// Let `skip` more submissions through, then make the one after them fail with `result`.
    pub fn fail_submit_after(&self, skip: usize, result: vk::Result) {
        self.state().fail_submit = Some((skip, result));
    }

    /// Copy of the event log.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state().events.clone()
    }

    /// Every submission made so far, in order.
    pub fn submissions(&self) -> Vec<(QueueType, SubmitDescriptor, vk::Fence)> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                DeviceEvent::Submit {
                    queue,
                    submit,
                    fence,
                } => Some((*queue, submit.clone(), *fence)),
                _ => None,
            })
            .collect()
    }

    /// Number of created objects that were not destroyed yet.
    pub fn live_objects(&self) -> usize {
        self.state().live.len()
    }
}

impl DeviceContext for HeadlessDevice {
    fn queue_families(&self) -> &QueueFamilies {
        &self.families
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.allocate();
        state.signaled.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.live.remove(&fence.as_raw());
        state.signaled.remove(&fence.as_raw());
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        let state = self.state();
        state
            .signaled
            .get(&fence.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<bool> {
        let mut state = self.state();
        if timeout > 0 {
            state.events.push(DeviceEvent::WaitFence(fence));
        }
        let signaled = *state
            .signaled
            .get(&fence.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        if signaled || timeout == 0 {
            return Ok(signaled);
        }
        if !state.pending.contains(&fence) {
            // Nothing will ever signal this fence. A real driver would hang here.
            return Err(vk::Result::TIMEOUT);
        }
        state.complete_pending();
        Ok(true)
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state();
        state.events.push(DeviceEvent::ResetFence(fence));
        state.signaled.insert(fence.as_raw(), false);
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.state().allocate()))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().live.remove(&semaphore.as_raw());
    }

    fn create_command_pool(&self, queue: QueueType) -> VkResult<vk::CommandPool> {
        if !self.families.info(self.families.resolve(queue)).enabled {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok(vk::CommandPool::from_raw(self.state().allocate()))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state().live.remove(&pool.as_raw());
    }

    fn allocate_command_buffers(&self, _pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        // Command buffers are freed with their pool, so they are not tracked as live objects.
        let mut state = self.state();
        Ok((0..count)
            .map(|_| {
                state.next_handle += 1;
                vk::CommandBuffer::from_raw(state.next_handle)
            })
            .collect())
    }

    fn begin_command_buffer(&self, _cmd: vk::CommandBuffer, _one_time: bool) -> VkResult<()> {
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.state().events.push(DeviceEvent::ResetCommandBuffer(cmd));
        Ok(())
    }

    fn cmd_image_barriers(&self, cmd: vk::CommandBuffer, barriers: &[ImageBarrier]) {
        if barriers.is_empty() {
            return;
        }
        self.state().events.push(DeviceEvent::Barriers {
            cmd,
            barriers: barriers.to_vec(),
        });
    }

    fn cmd_generate_mipmaps(&self, cmd: vk::CommandBuffer, image: &ImageResource) {
        self.state().events.push(DeviceEvent::GenerateMipmaps {
            cmd,
            image: image.handle(),
        });
    }

    fn queue_submit(&self, queue: QueueType, submit: &SubmitDescriptor, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state();
        match state.fail_submit.take() {
            Some((0, err)) => return Err(err),
            Some((skip, err)) => state.fail_submit = Some((skip - 1, err)),
            None => {}
        }
        state.events.push(DeviceEvent::Submit {
            queue: self.families.resolve(queue),
            submit: submit.clone(),
            fence,
        });
        if fence != vk::Fence::null() {
            match self.completion {
                Completion::Immediate => {
                    state.signaled.insert(fence.as_raw(), true);
                }
                Completion::Manual => state.pending.push(fence),
            }
        }
        Ok(())
    }

    fn queue_present(&self, present: &PresentDescriptor) -> VkResult<bool> {
        self.state().events.push(DeviceEvent::Present(present.clone()));
        Ok(false)
    }

    fn wait_idle(&self) -> VkResult<()> {
        self.state().complete_pending();
        Ok(())
    }
}
