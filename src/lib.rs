//! Submission and synchronization core for Vulkan renderers.
//!
//! Quay owns the pooled fences, binary semaphores and single-time command buffers a renderer needs to submit work from
//! many threads at once, and guarantees that none of them is reused while the GPU may still touch it. Device creation,
//! swapchains, resource allocation and pass recording are left to the application.
//!
//! To get started, import everything through the prelude
//! ```
//! use quay::prelude::*;
//! ```
//!
//! # Example
//!
//! The application creates its device, and describes the queues it created through [`QueueFamilies`].
//! Any [`DeviceContext`] can be used. [`VulkanDevice`] wraps an `ash::Device`, and [`HeadlessDevice`] runs without a GPU.
//! ```
//! use std::sync::Arc;
//! use quay::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let families = QueueFamilies::new(0).with_present(0).with_transfer(1);
//! let device = Arc::new(HeadlessDevice::new(families, Completion::Immediate));
//! let settings = SyncSettingsBuilder::new()
//!     .semaphores(64)
//!     .graphics_fences(32)
//!     .transfer_fences(32)
//!     .frames_in_flight(2)
//!     .build();
//! // The thread creating the hub becomes its owner thread.
//! let hub = Arc::new(SyncHub::new(device, settings)?);
//! # Ok(())
//! # }
//! ```
//! Any thread can now record single-time commands. Uploads made on a worker thread are complete when
//! [`SyncHub::end_single_time_command_transfer`] returns.
//! ```
//! # use std::sync::Arc;
//! # use quay::prelude::*;
//! # fn main() -> anyhow::Result<()> {
//! # let families = QueueFamilies::new(0).with_present(0).with_transfer(1);
//! # let device = Arc::new(HeadlessDevice::new(families, Completion::Immediate));
//! # let hub = Arc::new(SyncHub::new(device, SyncSettings::default())?);
//! let image = Arc::new(ImageResource::new(
//!     vk::Image::null(),
//!     vk::Extent3D { width: 256, height: 256, depth: 1 },
//!     vk::ImageLayout::UNDEFINED,
//!     vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
//! ));
//! let worker = {
//!     let hub = hub.clone();
//!     let image = image.clone();
//!     std::thread::spawn(move || -> anyhow::Result<()> {
//!         let cmd = hub.begin_single_time_command()?;
//!         // Record the copy from a staging buffer using `unsafe { cmd.handle() }`
//!         let ticket = hub.end_single_time_command_transfer(cmd, TransferPayload::new().with_image(image))?;
//!         assert!(ticket.is_complete());
//!         Ok(())
//!     })
//! };
//! worker.join().unwrap()?;
//! assert!(image.is_ready());
//! # Ok(())
//! # }
//! ```
//! The owner thread drives the frame loop.
//! ```
//! # use std::sync::Arc;
//! # use quay::prelude::*;
//! # fn main() -> anyhow::Result<()> {
//! # let device = Arc::new(HeadlessDevice::single_queue(Completion::Immediate));
//! # let hub = SyncHub::new(device, SyncSettings::default())?;
//! # let swapchain = vk::SwapchainKHR::null();
//! for _ in 0..4 {
//!     // Acquire the next swapchain image, signaling `hub.image_available_semaphore()?`
//!     let image_index = 0;
//!     // Reclaim finished single-time submissions and run queued transfer follow-ups.
//!     hub.run_graphics_callbacks()?;
//!     // Record the frame, then submit it.
//!     hub.submit_graphics(SubmitDescriptor::default(), image_index)?;
//!     match hub.present(PresentDescriptor { swapchain, image_index, wait_semaphores: vec![] })? {
//!         PresentStatus::Optimal => {}
//!         PresentStatus::Suboptimal | PresentStatus::OutOfDate => { /* Recreate the swapchain */ }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//! For further details, check out the following modules
//! - [`sync`] for the hub, the pools and the per-frame synchronization objects.
//! - [`command_buffer`] for single-time command buffers and their per-thread pools.
//! - [`core`] for the device seam, settings and failure handling.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod prelude;
pub use crate::prelude::*;

pub mod command_buffer;
pub mod core;
pub mod sync;
