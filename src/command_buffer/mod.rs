//! Single-time command buffers.
//!
//! Command buffers in Vulkan are affine to the pool they were allocated from, and a pool may only be used by one thread
//! at a time. Every thread that records single-time commands therefore gets its own set of pools, one per hardware queue,
//! looked up through the [`ThreadCommandPools`](registry::ThreadCommandPools) registry.
//!
//! A single-time command moves through `Idle → Recording → Submitted → Reclaiming → Idle`. Recording happens through
//! a [`SingleTimeCommand`], which is consumed when the command is ended. From then on its command buffer is held by a
//! [`CommandLease`] inside the payload of the fence guarding the submission, and goes back to its pool when that
//! fence signaled.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::command_buffer::command_pool::CommandPool;
use crate::core::device::DeviceContext;
use crate::core::queue::QueueType;
use crate::sync::payload::{ImageBarrier, ImageResource};

pub mod command_pool;
pub mod registry;

/// Lifecycle state of a pooled single-time command buffer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandState {
    #[default]
    Idle,
    Recording,
    Submitted,
    Reclaiming,
}

/// Ownership of one command buffer from a [`CommandPool`]. Returned to the pool with [`CommandLease::release`].
#[derive(Debug)]
pub struct CommandLease {
    pool: Arc<CommandPool>,
    index: usize,
    handle: vk::CommandBuffer,
}

impl CommandLease {
    pub(crate) fn new(pool: Arc<CommandPool>, index: usize, handle: vk::CommandBuffer) -> Self {
        Self {
            pool,
            index,
            handle,
        }
    }

    /// Get unsafe access to the underlying `VkCommandBuffer` handle.
    /// # Safety
    /// * The caller must not reset or free the command buffer.
    pub unsafe fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn queue(&self) -> QueueType {
        self.pool.queue()
    }

    pub fn state(&self) -> Result<CommandState> {
        self.pool.state(self.index)
    }

    pub(crate) fn mark_submitted(&self) -> Result<()> {
        self.pool
            .transition(self.index, CommandState::Recording, CommandState::Submitted)
    }

    /// Reset the command buffer and return it to its pool. Must be called on the thread owning the pool.
    pub(crate) fn release(self) -> Result<()> {
        self.pool.release(self.index)
    }
}

/// A single-time command buffer in the recording state.
///
/// End it through [`SyncHub::end_single_time_command_graphics`](crate::SyncHub::end_single_time_command_graphics) or
/// [`SyncHub::end_single_time_command_transfer`](crate::SyncHub::end_single_time_command_transfer). Dropping it instead
/// discards everything that was recorded and returns the command buffer to its pool.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SingleTimeCommand {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn DeviceContext>,
    lease: Option<CommandLease>,
    queue: QueueType,
}

impl SingleTimeCommand {
    /// Begin recording into a leased command buffer.
    pub(crate) fn begin(device: Arc<dyn DeviceContext>, lease: CommandLease) -> Result<Self> {
        let queue = lease.queue();
        let cmd = Self {
            device,
            lease: Some(lease),
            queue,
        };
        cmd.device.begin_command_buffer(cmd.raw(), true)?;
        Ok(cmd)
    }

    fn raw(&self) -> vk::CommandBuffer {
        self.lease
            .as_ref()
            .map(|lease| lease.handle)
            .unwrap_or_default()
    }

    /// Get unsafe access to the underlying `VkCommandBuffer` handle, to record commands into it.
    /// # Safety
    /// * The caller must not end, reset or free the command buffer.
    /// * Only record commands supported by [`SingleTimeCommand::queue`].
    pub unsafe fn handle(&self) -> vk::CommandBuffer {
        self.raw()
    }

    /// The queue this command buffer is submitted to. This may differ from the requested queue when that queue is
    /// disabled or not independent, see [`QueueFamilies::resolve`](crate::QueueFamilies::resolve).
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Record image memory barriers.
    pub fn image_barriers(self, barriers: &[ImageBarrier]) -> Self {
        self.device.cmd_image_barriers(self.raw(), barriers);
        self
    }

    /// Generate the full mip chain of `image`, leaving every level in the image's destination layout.
    pub fn generate_mipmaps(self, image: &ImageResource) -> Self {
        self.device.cmd_generate_mipmaps(self.raw(), image);
        self
    }

    /// End recording and hand out the lease for submission.
    pub(crate) fn finish(mut self) -> Result<CommandLease> {
        let handle = self.raw();
        let lease = self
            .lease
            .take()
            .ok_or(crate::Error::ProtocolViolation("single-time command ended twice"))?;
        if let Err(err) = self.device.end_command_buffer(handle) {
            lease.release()?;
            return Err(err.into());
        }
        Ok(lease)
    }
}

impl Drop for SingleTimeCommand {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            debug!("Discarding single-time command on {:?} that was never submitted", self.queue);
            if let Err(err) = lease.release() {
                error!("Could not return discarded command buffer to its pool: {err}");
            }
        }
    }
}
