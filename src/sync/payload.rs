//! Resources guarded by a pooled fence.
//!
//! A single-time submission hands ownership of its transient resources to the fence that guards it. When the fence
//! signals, the payload is taken out of the fence slot exactly once and released: staging buffers are freed, images
//! are marked ready and the command buffer goes back to its pool.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;

use crate::command_buffer::CommandLease;
use crate::core::queue::IGNORED_FAMILY;
use crate::sync::ticket::SubmissionTicket;

/// CPU-visible transient memory used to upload data to GPU-only memory. Implemented by the application's allocator.
///
/// The synchronization core only ever calls [`StagingBuffer::free`], once the GPU finished reading from the buffer.
pub trait StagingBuffer: Send + Debug {
    /// Map the buffer memory.
    fn map(&mut self) -> Result<&mut [u8]>;
    /// Unmap the buffer memory.
    fn unmap(&mut self);
    /// Copy `data` into the buffer.
    fn stage(&mut self, data: &[u8]) -> Result<()>;
    /// Free the buffer and its memory.
    fn free(&mut self);
}

#[derive(Debug, Copy, Clone)]
struct LayoutState {
    current: vk::ImageLayout,
    destination: vk::ImageLayout,
}

/// Layout bookkeeping for an image that is being uploaded. Shared between the uploader, the fence payload
/// and whoever samples the image once it is ready.
#[derive(Debug)]
pub struct ImageResource {
    handle: vk::Image,
    extent: vk::Extent3D,
    mip_levels: u32,
    aspect: vk::ImageAspectFlags,
    generate_mips: bool,
    layout: Mutex<LayoutState>,
    ready: AtomicBool,
}

impl ImageResource {
    /// Track an image currently in `current` layout that should end up in `destination` once its upload completed.
    pub fn new(handle: vk::Image, extent: vk::Extent3D, current: vk::ImageLayout, destination: vk::ImageLayout) -> Self {
        Self {
            handle,
            extent,
            mip_levels: 1,
            aspect: vk::ImageAspectFlags::COLOR,
            generate_mips: false,
            layout: Mutex::new(LayoutState {
                current,
                destination,
            }),
            ready: AtomicBool::new(false),
        }
    }

    /// Generate `levels` mip levels from level 0 after the upload.
    pub fn with_mipmaps(mut self, levels: u32) -> Self {
        self.mip_levels = levels.max(1);
        self.generate_mips = levels > 1;
        self
    }

    /// Set the aspect mask. Defaults to color.
    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }

    /// Raw `VkImage` handle.
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// Whether mip levels need to be generated on a graphics queue after the upload.
    pub fn needs_mipmaps(&self) -> bool {
        self.generate_mips
    }

    fn state(&self) -> LayoutState {
        // Only ever written under the lock as a whole, so a poisoned value is still consistent.
        *self.layout.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Layout the image is in according to the last completed GPU work.
    pub fn current_layout(&self) -> vk::ImageLayout {
        self.state().current
    }

    /// Layout the image is in once its upload is complete, usually `SHADER_READ_ONLY_OPTIMAL`.
    pub fn destination_layout(&self) -> vk::ImageLayout {
        self.state().destination
    }

    /// True once the GPU finished every transition this image needed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_current_layout(&self, layout: vk::ImageLayout) {
        let mut state = self.layout.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.current = layout;
    }

    /// Called once the work transitioning this image completed on the GPU.
    pub(crate) fn mark_ready(&self) {
        self.set_current_layout(self.destination_layout());
        self.ready.store(true, Ordering::Release);
    }

    /// Layout transition to the destination layout on a single queue.
    pub(crate) fn transition_barrier(&self) -> ImageBarrier {
        ImageBarrier::new(self, self.current_layout(), self.destination_layout())
    }

    /// Release half of a queue family ownership transfer. The image stays in its current (transfer) layout, the
    /// acquiring queue performs the actual transition.
    pub(crate) fn release_barrier(&self, src_family: u32, dst_family: u32) -> ImageBarrier {
        let layout = self.current_layout();
        ImageBarrier {
            src_queue_family: src_family,
            dst_queue_family: dst_family,
            ..ImageBarrier::new(self, layout, layout)
        }
    }

    /// Acquire half of a queue family ownership transfer. Images that still need mipmaps stay in
    /// `TRANSFER_DST_OPTIMAL`, mipmap generation performs the final transition.
    pub(crate) fn acquire_barrier(&self, src_family: u32, dst_family: u32) -> ImageBarrier {
        let new_layout = if self.generate_mips {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        } else {
            self.destination_layout()
        };
        ImageBarrier {
            src_queue_family: src_family,
            dst_queue_family: dst_family,
            ..ImageBarrier::new(self, self.current_layout(), new_layout)
        }
    }
}

/// Image memory barrier over all mip levels of an image, optionally transferring queue family ownership.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

impl ImageBarrier {
    /// Layout transition without ownership transfer.
    pub fn new(image: &ImageResource, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        Self {
            image: image.handle(),
            aspect: image.aspect(),
            mip_levels: image.mip_levels(),
            old_layout,
            new_layout,
            src_queue_family: IGNORED_FAMILY,
            dst_queue_family: IGNORED_FAMILY,
        }
    }

    /// True if this barrier moves the image between queue families.
    pub fn is_ownership_transfer(&self) -> bool {
        self.src_queue_family != self.dst_queue_family
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier {
            src_access_mask: vk::AccessFlags::MEMORY_WRITE,
            dst_access_mask: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            old_layout: self.old_layout,
            new_layout: self.new_layout,
            src_queue_family_index: self.src_queue_family,
            dst_queue_family_index: self.dst_queue_family,
            image: self.image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: self.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        }
    }
}

/// Transient resources of a single-time graphics submission.
#[derive(Debug, Default)]
pub struct GraphicsPayload {
    /// Freed once the submission completed.
    pub staging_buffers: Vec<Box<dyn StagingBuffer>>,
    /// Marked ready (current layout = destination layout) once the submission completed.
    pub images: Vec<Arc<ImageResource>>,
    /// Recorded at the end of the command buffer, right before it is submitted.
    pub barriers: Vec<ImageBarrier>,
    pub(crate) command: Option<CommandLease>,
    pub(crate) ticket: Option<SubmissionTicket>,
}

impl GraphicsPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_staging(mut self, buffer: Box<dyn StagingBuffer>) -> Self {
        self.staging_buffers.push(buffer);
        self
    }

    pub fn with_image(mut self, image: Arc<ImageResource>) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_barrier(mut self, barrier: ImageBarrier) -> Self {
        self.barriers.push(barrier);
        self
    }
}

/// Transient resources of a single-time transfer submission.
#[derive(Debug, Default)]
pub struct TransferPayload {
    /// Freed once the transfer completed.
    pub staging_buffers: Vec<Box<dyn StagingBuffer>>,
    /// Images written by the transfer. They are handed to the graphics queue for ownership acquisition, layout
    /// transition and mipmap generation, and become ready once that follow-up completed.
    pub images: Vec<Arc<ImageResource>>,
    pub(crate) command: Option<CommandLease>,
    pub(crate) ticket: Option<SubmissionTicket>,
}

impl TransferPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_staging(mut self, buffer: Box<dyn StagingBuffer>) -> Self {
        self.staging_buffers.push(buffer);
        self
    }

    pub fn with_image(mut self, image: Arc<ImageResource>) -> Self {
        self.images.push(image);
        self
    }
}

/// Payload stored in a fence slot.
#[derive(Debug, Default)]
pub enum FencePayload {
    #[default]
    Empty,
    Graphics(GraphicsPayload),
    Transfer(TransferPayload),
}

impl FencePayload {
    /// Move the payload out, leaving the slot empty.
    pub fn take(&mut self) -> FencePayload {
        std::mem::take(self)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FencePayload::Empty)
    }

    pub(crate) fn command(&self) -> Option<&CommandLease> {
        match self {
            FencePayload::Empty => None,
            FencePayload::Graphics(payload) => payload.command.as_ref(),
            FencePayload::Transfer(payload) => payload.command.as_ref(),
        }
    }

    /// Give everything back after the submission failed to reach the GPU. Images are not marked ready
    /// and the ticket never completes.
    pub(crate) fn discard(self) -> Result<()> {
        let (staging, command) = match self {
            FencePayload::Empty => return Ok(()),
            FencePayload::Graphics(payload) => (payload.staging_buffers, payload.command),
            FencePayload::Transfer(payload) => (payload.staging_buffers, payload.command),
        };
        for mut buffer in staging {
            buffer.free();
        }
        match command {
            Some(command) => command.release(),
            None => Ok(()),
        }
    }

    /// Free the staging buffers and drop everything else. For teardown off the owner thread, where the command buffer
    /// cannot be reset and nobody observes the images or the ticket anymore.
    pub(crate) fn free_staging(self) {
        let staging = match self {
            FencePayload::Empty => return,
            FencePayload::Graphics(payload) => payload.staging_buffers,
            FencePayload::Transfer(payload) => payload.staging_buffers,
        };
        for mut buffer in staging {
            buffer.free();
        }
    }

    /// Release everything this payload guarded. Must only be called once the guarding fence signaled,
    /// on the thread that recorded the command buffer.
    pub(crate) fn release(self) -> Result<()> {
        let (staging, images, command, ticket) = match self {
            FencePayload::Empty => return Ok(()),
            FencePayload::Graphics(payload) => (payload.staging_buffers, payload.images, payload.command, payload.ticket),
            FencePayload::Transfer(payload) => {
                // Transfer images are only complete after their graphics follow-up, which owns them from here on.
                (payload.staging_buffers, Vec::new(), payload.command, payload.ticket)
            }
        };
        for mut buffer in staging {
            buffer.free();
        }
        for image in images {
            image.mark_ready();
        }
        if let Some(command) = command {
            command.release()?;
        }
        if let Some(ticket) = ticket {
            ticket.complete();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(mips: u32) -> ImageResource {
        ImageResource::new(
            vk::Image::null(),
            vk::Extent3D {
                width: 256,
                height: 256,
                depth: 1,
            },
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .with_mipmaps(mips)
    }

    #[test]
    fn acquire_keeps_transfer_layout_for_mipmapped_images() {
        let mipmapped = image(9);
        let barrier = mipmapped.acquire_barrier(1, 0);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert!(barrier.is_ownership_transfer());

        let flat = image(1);
        assert_eq!(flat.acquire_barrier(1, 0).new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn release_does_not_change_layout() {
        let barrier = image(1).release_barrier(1, 0);
        assert_eq!(barrier.old_layout, barrier.new_layout);
        assert_eq!((barrier.src_queue_family, barrier.dst_queue_family), (1, 0));
    }

    #[test]
    fn mark_ready_moves_to_destination() {
        let image = image(1);
        assert!(!image.is_ready());
        image.mark_ready();
        assert!(image.is_ready());
        assert_eq!(image.current_layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn take_leaves_slot_empty() {
        let mut payload = FencePayload::Graphics(GraphicsPayload::new());
        let taken = payload.take();
        assert!(payload.is_empty());
        assert!(!taken.is_empty());
    }
}
