//! Synchronization objects of the steady per-frame submit and present cycle.
//!
//! Every frame in flight owns a slot with an in-flight fence and the image available and render finished semaphores.
//! Besides those, a frame can wait on and signal pooled semaphores. These lists are kept alive in the slot the frame
//! was submitted from, and only handed back once that slot's fence has been waited on again, one full frames-in-flight
//! cycle later. A semaphore is never re-armed while a wait on it may still be pending on the GPU.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::device::DeviceContext;
use crate::sync::pool::SemaphoreId;
use crate::Error;

/// Information stored for each frame in flight.
#[derive(Debug)]
struct PerFrame {
    /// Signaled by the GPU when the frame submitted from this slot completed.
    fence: vk::Fence,
    /// False if the fence was reset but the submission that should signal it failed.
    armed: bool,
    /// Signaled by the presentation engine when a swapchain image is ready.
    image_available: vk::Semaphore,
    /// Signaled by the GPU when all commands for a frame have been processed. Presenting waits on this.
    render_finished: vk::Semaphore,
    /// Pooled semaphores waited on by the frame submitted from this slot.
    waits: Vec<SemaphoreId>,
    /// Pooled semaphores signaled by the frame submitted from this slot.
    signals: Vec<SemaphoreId>,
}

/// Per frame-in-flight fences and semaphores, plus the pooled semaphore lists of the frame being prepared.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RenderSyncData {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn DeviceContext>,
    per_frame: Vec<PerFrame>,
    pending_waits: Vec<SemaphoreId>,
    pending_signals: Vec<SemaphoreId>,
    /// For each swapchain image, the slot of the last frame that rendered to it.
    images_in_flight: Vec<Option<usize>>,
    current_frame: usize,
}

impl RenderSyncData {
    /// Create the synchronization objects for `frames_in_flight` slots. In-flight fences start signaled, so the first
    /// frame of every slot does not wait.
    pub fn new(device: Arc<dyn DeviceContext>, frames_in_flight: usize, swapchain_images: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(Error::InvalidSettings("frames_in_flight must be at least 1").into());
        }
        let mut data = Self {
            device: device.clone(),
            per_frame: Vec::with_capacity(frames_in_flight),
            pending_waits: vec![],
            pending_signals: vec![],
            images_in_flight: vec![None; swapchain_images],
            current_frame: 0,
        };
        // Pushed one by one so that a failure halfway destroys what was created through Drop.
        for _ in 0..frames_in_flight {
            let fence = device.create_fence(true)?;
            let image_available = match device.create_semaphore() {
                Ok(semaphore) => semaphore,
                Err(err) => {
                    device.destroy_fence(fence);
                    return Err(err.into());
                }
            };
            let render_finished = match device.create_semaphore() {
                Ok(semaphore) => semaphore,
                Err(err) => {
                    device.destroy_fence(fence);
                    device.destroy_semaphore(image_available);
                    return Err(err.into());
                }
            };
            data.per_frame.push(PerFrame {
                fence,
                armed: true,
                image_available,
                render_finished,
                waits: vec![],
                signals: vec![],
            });
        }
        Ok(data)
    }

    /// Slot of the frame currently being prepared.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.per_frame.len()
    }

    fn frame(&self, slot: usize) -> &PerFrame {
        &self.per_frame[slot % self.per_frame.len()]
    }

    fn frame_mut(&mut self, slot: usize) -> &mut PerFrame {
        let len = self.per_frame.len();
        &mut self.per_frame[slot % len]
    }

    pub fn flight_fence(&self, slot: usize) -> vk::Fence {
        self.frame(slot).fence
    }

    pub fn image_available(&self, slot: usize) -> vk::Semaphore {
        self.frame(slot).image_available
    }

    pub fn render_finished(&self, slot: usize) -> vk::Semaphore {
        self.frame(slot).render_finished
    }

    /// Whether the slot's fence will be signaled by the GPU, so it is safe to block on.
    pub fn is_armed(&self, slot: usize) -> bool {
        self.frame(slot).armed
    }

    pub(crate) fn set_armed(&mut self, slot: usize, armed: bool) {
        self.frame_mut(slot).armed = armed;
    }

    /// Pooled semaphores the next frame submission waits on.
    pub fn get_wait_data(&self) -> &[SemaphoreId] {
        &self.pending_waits
    }

    /// Pooled semaphores the next frame submission signals.
    pub fn get_signal_data(&self) -> &[SemaphoreId] {
        &self.pending_signals
    }

    pub(crate) fn set_wait_data(&mut self, semaphores: impl IntoIterator<Item = SemaphoreId>) {
        self.pending_waits.extend(semaphores);
    }

    pub(crate) fn set_signal_data(&mut self, semaphores: impl IntoIterator<Item = SemaphoreId>) {
        self.pending_signals.extend(semaphores);
    }

    /// Pooled semaphores (waits, then signals) still referenced by the frame submitted from `slot`.
    pub fn in_flight_data(&self, slot: usize) -> (&[SemaphoreId], &[SemaphoreId]) {
        let frame = self.frame(slot);
        (&frame.waits, &frame.signals)
    }

    /// Take back the lists of the frame last submitted from `slot`. Only valid once its fence was waited on.
    pub(crate) fn retire(&mut self, slot: usize) -> Vec<SemaphoreId> {
        let frame = self.frame_mut(slot);
        let mut retired = std::mem::take(&mut frame.waits);
        retired.append(&mut frame.signals);
        retired
    }

    /// The pending lists were submitted from `slot`. They stay there until the slot is retired.
    pub(crate) fn commit(&mut self, slot: usize) {
        let waits = std::mem::take(&mut self.pending_waits);
        let signals = std::mem::take(&mut self.pending_signals);
        let frame = self.frame_mut(slot);
        frame.waits = waits;
        frame.signals = signals;
        frame.armed = true;
    }

    /// Take the pending signal list after a failed submission. The pending waits are kept for the next attempt, the
    /// semaphores they name are still signaled.
    pub(crate) fn take_pending_signals(&mut self) -> Vec<SemaphoreId> {
        std::mem::take(&mut self.pending_signals)
    }

    /// Record that the frame in `slot` renders to `image_index`. Returns the slot of the previous frame that rendered
    /// to this image, if it differs from `slot`.
    pub(crate) fn claim_image(&mut self, image_index: usize, slot: usize) -> Option<usize> {
        if image_index >= self.images_in_flight.len() {
            self.images_in_flight.resize(image_index + 1, None);
        }
        let previous = self.images_in_flight[image_index].replace(slot);
        previous.filter(|&previous| previous != slot)
    }

    /// Slot of the last frame that rendered to `image_index`.
    pub fn image_owner(&self, image_index: usize) -> Option<usize> {
        self.images_in_flight.get(image_index).copied().flatten()
    }

    pub(crate) fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.per_frame.len();
    }
}

impl Drop for RenderSyncData {
    fn drop(&mut self) {
        for frame in self.per_frame.drain(..) {
            self.device.destroy_fence(frame.fence);
            self.device.destroy_semaphore(frame.image_available);
            self.device.destroy_semaphore(frame.render_finished);
        }
    }
}
