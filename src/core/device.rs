//! The device seam. Everything the synchronization core needs from the GPU goes through [`DeviceContext`].
//!
//! Device and queue creation are owned by the application. It either hands its `ash::Device` to a [`VulkanDevice`],
//! or uses the [`HeadlessDevice`](crate::HeadlessDevice) to drive the core without a GPU.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::prelude::VkResult;
use ash::vk;

use crate::core::queue::{QueueFamilies, QueueType};
use crate::sync::payload::{ImageBarrier, ImageResource};

/// One queue submission. This is an owned version of `VkSubmitInfo` so it can be built up across several
/// calls before being handed to the device.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubmitDescriptor {
    /// Semaphores to wait on before the command buffers execute.
    pub wait_semaphores: Vec<vk::Semaphore>,
    /// Stage mask for each entry in `wait_semaphores`.
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    /// Command buffers to execute, in order.
    pub command_buffers: Vec<vk::CommandBuffer>,
    /// Semaphores signaled when all command buffers completed.
    pub signal_semaphores: Vec<vk::Semaphore>,
}

impl SubmitDescriptor {
    /// Submit a list of command buffers without any semaphores.
    pub fn new(command_buffers: impl Into<Vec<vk::CommandBuffer>>) -> Self {
        Self {
            command_buffers: command_buffers.into(),
            ..Default::default()
        }
    }

    /// Wait on `semaphore` at `stage`.
    pub fn wait(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) -> Self {
        self.wait_semaphores.push(semaphore);
        self.wait_stages.push(stage);
        self
    }

    /// Signal `semaphore` when the submission completes.
    pub fn signal(mut self, semaphore: vk::Semaphore) -> Self {
        self.signal_semaphores.push(semaphore);
        self
    }
}

/// Owned version of `VkPresentInfoKHR` for a single swapchain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresentDescriptor {
    /// Swapchain to present to.
    pub swapchain: vk::SwapchainKHR,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Semaphores to wait on before presenting, in addition to the frame's render finished semaphore.
    pub wait_semaphores: Vec<vk::Semaphore>,
}

/// Everything the synchronization core consumes from the GPU.
///
/// Implementations must be callable from any thread. Command buffer recording functions are only ever called
/// on the thread that owns the command pool the buffer came from.
pub trait DeviceContext: Send + Sync {
    /// Queue topology of this device.
    fn queue_families(&self) -> &QueueFamilies;

    /// Create a new fence, possibly in the signaled status.
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    /// Destroy a fence. It must not be in use by the GPU.
    fn destroy_fence(&self, fence: vk::Fence);
    /// Non-blocking fence status query.
    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    /// Wait for a fence with a timeout in nanoseconds. Returns `Ok(false)` when the timeout elapsed.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<bool>;
    /// Reset a fence to the unsignaled status.
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    /// Create a binary semaphore.
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    /// Destroy a semaphore. It must not be in use by the GPU.
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Create a command pool for the family executing `queue`. Buffers from it must be individually resettable.
    fn create_command_pool(&self, queue: QueueType) -> VkResult<vk::CommandPool>;
    /// Destroy a command pool and every command buffer allocated from it.
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate `count` primary command buffers.
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;
    /// Begin recording. `one_time` selects `ONE_TIME_SUBMIT` usage.
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time: bool) -> VkResult<()>;
    /// Finish recording.
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    /// Reset a command buffer back to the initial state.
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    /// Record image memory barriers, including queue family ownership transfers.
    fn cmd_image_barriers(&self, cmd: vk::CommandBuffer, barriers: &[ImageBarrier]);
    /// Record a full mip chain generation for `image`. The image must be in `TRANSFER_DST_OPTIMAL` on entry,
    /// and every level ends up in the image's destination layout.
    fn cmd_generate_mipmaps(&self, cmd: vk::CommandBuffer, image: &ImageResource);

    /// Submit to the queue executing `queue`, signaling `fence` on completion. `fence` may be null.
    fn queue_submit(&self, queue: QueueType, submit: &SubmitDescriptor, fence: vk::Fence) -> VkResult<()>;
    /// Present. Returns `Ok(true)` if the swapchain is suboptimal.
    fn queue_present(&self, present: &PresentDescriptor) -> VkResult<bool>;

    /// Wait for the device to be completely idle.
    /// This should not be used as a synchronization measure, except on exit.
    fn wait_idle(&self) -> VkResult<()>;
}

/// Physical VkQueue object.
#[derive(Debug)]
pub(crate) struct DeviceQueue {
    pub handle: vk::Queue,
}

/// [`DeviceContext`] over a Vulkan device created by the application.
///
/// This does not take ownership of the device: the application destroys it after the [`SyncHub`](crate::SyncHub) is dropped.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct VulkanDevice {
    #[derivative(Debug = "ignore")]
    handle: ash::Device,
    #[derivative(Debug = "ignore")]
    swapchain: Option<ash::extensions::khr::Swapchain>,
    families: QueueFamilies,
    /// Queue types sharing a family share the same `VkQueue`, and thus the same lock.
    queues: HashMap<QueueType, Arc<Mutex<DeviceQueue>>>,
}

impl VulkanDevice {
    /// Wrap an existing device. Queue index 0 of every enabled family in `families` is used.
    /// `swapchain` is required to present.
    pub fn new(handle: ash::Device, swapchain: Option<ash::extensions::khr::Swapchain>, families: QueueFamilies) -> Self {
        let mut by_family: HashMap<u32, Arc<Mutex<DeviceQueue>>> = HashMap::new();
        let mut queues = HashMap::new();
        for queue in QueueType::ALL {
            let info = families.info(queue);
            if !info.enabled {
                continue;
            }
            let device_queue = by_family
                .entry(info.family_index)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(DeviceQueue {
                        // SAFETY: The application created the device with a queue on this family.
                        handle: unsafe { handle.get_device_queue(info.family_index, 0) },
                    }))
                })
                .clone();
            queues.insert(queue, device_queue);
        }

        info!("Created device queues:");
        for queue in QueueType::ALL {
            let info = families.info(queue);
            if info.enabled {
                info!("Queue {:?} on family {}", queue, info.family_index);
            }
        }

        Self {
            handle,
            swapchain,
            families,
            queues,
        }
    }

    fn acquire_queue(&self, queue: QueueType) -> VkResult<MutexGuard<DeviceQueue>> {
        let queue = self.families.resolve(queue);
        let queue = self
            .queues
            .get(&queue)
            .ok_or(vk::Result::ERROR_FEATURE_NOT_PRESENT)?;
        queue.lock().map_err(|_| vk::Result::ERROR_UNKNOWN)
    }

    /// Get unsafe access to the underlying VkDevice handle
    /// # Safety
    /// * The caller should not call `vkDestroyDevice` on this.
    pub unsafe fn handle(&self) -> ash::Device {
        self.handle.clone()
    }
}

impl DeviceContext for VulkanDevice {
    fn queue_families(&self) -> &QueueFamilies {
        &self.families
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() },
        };
        unsafe { self.handle.create_fence(&info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.handle.destroy_fence(fence, None) }
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.handle.get_fence_status(fence) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<bool> {
        match unsafe { self.handle.wait_for_fences(std::slice::from_ref(&fence), true, timeout) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.handle.reset_fences(std::slice::from_ref(&fence)) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: Default::default(),
        };
        unsafe { self.handle.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.handle.destroy_semaphore(semaphore, None) }
    }

    fn create_command_pool(&self, queue: QueueType) -> VkResult<vk::CommandPool> {
        // Transient because single-time buffers are recycled constantly, resettable because they are
        // recycled one by one instead of resetting the whole pool.
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: self.families.family_of(queue),
        };
        unsafe { self.handle.create_command_pool(&info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.handle.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            p_next: std::ptr::null(),
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
        };
        unsafe { self.handle.allocate_command_buffers(&info) }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time: bool) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            p_next: std::ptr::null(),
            flags: if one_time { vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT } else { vk::CommandBufferUsageFlags::empty() },
            p_inheritance_info: std::ptr::null(),
        };
        unsafe { self.handle.begin_command_buffer(cmd, &info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.handle.end_command_buffer(cmd) }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.handle.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty()) }
    }

    fn cmd_image_barriers(&self, cmd: vk::CommandBuffer, barriers: &[ImageBarrier]) {
        if barriers.is_empty() {
            return;
        }
        let vk_barriers = barriers
            .iter()
            .map(|barrier| barrier.to_vk())
            .collect::<Vec<_>>();
        unsafe {
            self.handle.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                vk_barriers.as_slice(),
            );
        }
    }

    fn cmd_generate_mipmaps(&self, cmd: vk::CommandBuffer, image: &ImageResource) {
        let extent = image.extent();
        let mut width = extent.width as i32;
        let mut height = extent.height as i32;
        let destination = image.destination_layout();
        let level_barrier = |level: u32,
                             old: vk::ImageLayout,
                             new: vk::ImageLayout,
                             src_access: vk::AccessFlags,
                             dst_access: vk::AccessFlags| vk::ImageMemoryBarrier {
            src_access_mask: src_access,
            dst_access_mask: dst_access,
            old_layout: old,
            new_layout: new,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: image.handle(),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: image.aspect(),
                base_mip_level: level,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };

        for level in 1..image.mip_levels() {
            // Previous level becomes the blit source.
            let to_src = level_barrier(
                level - 1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::TRANSFER_READ,
            );
            let next_width = (width / 2).max(1);
            let next_height = (height / 2).max(1);
            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect(),
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                src_offsets: [vk::Offset3D::default(), vk::Offset3D { x: width, y: height, z: 1 }],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect(),
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                dst_offsets: [vk::Offset3D::default(), vk::Offset3D { x: next_width, y: next_height, z: 1 }],
            };
            let to_final = level_barrier(
                level - 1,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                destination,
                vk::AccessFlags::TRANSFER_READ,
                vk::AccessFlags::SHADER_READ,
            );
            unsafe {
                self.handle.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&to_src),
                );
                self.handle.cmd_blit_image(
                    cmd,
                    image.handle(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&blit),
                    vk::Filter::LINEAR,
                );
                self.handle.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&to_final),
                );
            }
            width = next_width;
            height = next_height;
        }

        // The last level was only ever written to.
        let last = level_barrier(
            image.mip_levels().saturating_sub(1),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            destination,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
        );
        unsafe {
            self.handle.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&last),
            );
        }
    }

    fn queue_submit(&self, queue: QueueType, submit: &SubmitDescriptor, fence: vk::Fence) -> VkResult<()> {
        let info = vk::SubmitInfo::builder()
            .wait_semaphores(submit.wait_semaphores.as_slice())
            .wait_dst_stage_mask(submit.wait_stages.as_slice())
            .command_buffers(submit.command_buffers.as_slice())
            .signal_semaphores(submit.signal_semaphores.as_slice())
            .build();
        let queue = self.acquire_queue(queue)?;
        unsafe { self.handle.queue_submit(queue.handle, std::slice::from_ref(&info), fence) }
    }

    fn queue_present(&self, present: &PresentDescriptor) -> VkResult<bool> {
        let functions = self.swapchain.as_ref().ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(present.wait_semaphores.as_slice())
            .swapchains(std::slice::from_ref(&present.swapchain))
            .image_indices(std::slice::from_ref(&present.image_index))
            .build();
        let queue = self.acquire_queue(QueueType::Present)?;
        unsafe { functions.queue_present(queue.handle, &info) }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.handle.device_wait_idle() }
    }
}
