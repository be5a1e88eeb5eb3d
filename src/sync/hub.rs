//! Exposes the [`SyncHub`], the entry point for every GPU submission.
//!
//! # Single-time commands
//!
//! Single-time commands are recorded once, submitted once and discarded. Where they run depends on the calling thread:
//! - On the owner thread (the thread that created the hub) submissions are asynchronous. Their fence is reclaimed by
//!   [`SyncHub::run_graphics_callbacks`], which should be called once per frame. Consecutive owner submissions are
//!   chained through a semaphore, and the next frame waits on the last one.
//! - On worker threads submissions are synchronous: the worker waits for its own fence and releases everything inline
//!   before the call returns.
//!
//! Uploads on a dedicated transfer queue need a graphics follow-up: the image is released by the transfer queue,
//! acquired by the graphics queue, and optionally gets its mip chain generated there. The two submissions are ordered
//! through a semaphore. Worker threads run the follow-up themselves, owner thread follow-ups are queued and run by the
//! next [`SyncHub::run_graphics_callbacks`].
//!
//! # Frames
//!
//! [`SyncHub::submit_graphics`] and [`SyncHub::present`] form the per-frame path. Before a frame slot is reused its
//! in-flight fence is waited on, so semaphores referenced by the previous frame in that slot can be safely reused.
//!
//! # Example
//! ```
//! # use std::sync::Arc;
//! # use quay::*;
//! # use anyhow::Result;
//! # fn main() -> Result<()> {
//! let device = Arc::new(HeadlessDevice::single_queue(Completion::Immediate));
//! let hub = SyncHub::new(device, SyncSettings::default())?;
//! let cmd = hub.begin_single_time_command_graphics()?;
//! // Record commands using `unsafe { cmd.handle() }`
//! let ticket = hub.end_single_time_command_graphics(cmd, GraphicsPayload::new())?;
//! hub.run_graphics_callbacks()?;
//! assert!(ticket.is_complete());
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use anyhow::Result;
use ash::vk;

use crate::command_buffer::SingleTimeCommand;
use crate::core::device::{DeviceContext, PresentDescriptor, SubmitDescriptor};
use crate::core::diagnostics::ResultHandler;
use crate::core::queue::QueueType;
use crate::core::settings::SyncSettings;
use crate::sync::handoff::{GraphicsFollowUp, HandoffQueue};
use crate::sync::payload::{FencePayload, GraphicsPayload, TransferPayload};
use crate::sync::pool::{FenceId, PooledSemaphore, QueueSyncPool, SemaphoreId, SemaphoreStatus};
use crate::sync::render_sync::RenderSyncData;
use crate::sync::ticket::SubmissionTicket;
use crate::Error;

/// Result of a present operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    /// The swapchain no longer matches the surface exactly, but can still be presented to.
    Suboptimal,
    /// The swapchain must be recreated before presenting again.
    OutOfDate,
}

/// Explicit context object for all submission and synchronization. Create one after the device, share it
/// (usually in an [`Arc`]) with every thread that submits GPU work, and drop it before the device.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SyncHub {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn DeviceContext>,
    settings: SyncSettings,
    handler: Arc<ResultHandler>,
    pool: QueueSyncPool,
    frames: Mutex<RenderSyncData>,
    handoffs: HandoffQueue,
    /// Signaled semaphores nothing waits on yet: the one of the last single-time graphics submission of the owner
    /// thread, and those of follow-ups that failed to submit. The next owner submission or frame waits on all of them.
    /// Lock order: `frames`, `chain`, then the pool.
    chain: Mutex<Vec<PooledSemaphore>>,
    owner: ThreadId,
}

static_assertions::assert_impl_all!(SyncHub: Send, Sync);

impl SyncHub {
    /// Create the hub and all pooled objects. The calling thread becomes the owner thread.
    pub fn new(device: Arc<dyn DeviceContext>, settings: SyncSettings) -> Result<Self> {
        settings.validate()?;
        let owner = std::thread::current().id();
        let handler = Arc::new(ResultHandler::new(
            settings.failure_policy,
            settings.diagnostic_log.as_deref(),
            settings.crash_dump.clone(),
        )?);
        let pool = QueueSyncPool::new(device.clone(), &settings, handler.clone(), owner)?;
        let frames = RenderSyncData::new(device.clone(), settings.frames_in_flight, settings.swapchain_image_count)?;

        let families = device.queue_families();
        if settings.use_transfer_queue && families.independent_transfer() {
            info!(
                "Worker uploads go through the transfer queue on family {}, graphics runs on family {}",
                families.transfer.family_index, families.graphics.family_index
            );
        } else {
            info!("All single-time commands go through the graphics queue on family {}", families.graphics.family_index);
        }

        Ok(Self {
            device,
            settings,
            handler,
            pool,
            frames: Mutex::new(frames),
            handoffs: HandoffQueue::new(),
            chain: Mutex::new(vec![]),
            owner,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// The underlying pools, for diagnostics.
    pub fn pool(&self) -> &QueueSyncPool {
        &self.pool
    }

    /// Handler every failed device call goes through.
    pub fn result_handler(&self) -> &ResultHandler {
        &self.handler
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owner_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    #[track_caller]
    fn require_owner(&self, operation: &'static str) -> Result<()> {
        if self.is_owner_thread() {
            Ok(())
        } else {
            self.handler.escalate(Error::WrongThread(operation))
        }
    }

    /// Whether worker uploads go through a dedicated transfer queue.
    pub fn uses_transfer_queue(&self) -> bool {
        self.settings.use_transfer_queue && self.device.queue_families().independent_transfer()
    }

    /// Begin a single-time command on the queue matching the calling thread: graphics on the owner thread, or when
    /// no independent transfer queue is used, transfer otherwise.
    #[track_caller]
    pub fn begin_single_time_command(&self) -> Result<SingleTimeCommand> {
        if self.is_owner_thread() || !self.uses_transfer_queue() {
            self.begin_single_time_command_graphics()
        } else {
            self.begin_single_time_command_transfer()
        }
    }

    /// Begin a single-time command on the graphics queue.
    #[track_caller]
    pub fn begin_single_time_command_graphics(&self) -> Result<SingleTimeCommand> {
        self.pool.get_cmd_buf_single_time(QueueType::Graphics)
    }

    /// Begin a single-time command for an upload. This is recorded for the transfer queue if one is used, and for the
    /// graphics queue otherwise. Check [`SingleTimeCommand::queue`] to find out which.
    #[track_caller]
    pub fn begin_single_time_command_transfer(&self) -> Result<SingleTimeCommand> {
        let queue = if self.uses_transfer_queue() { QueueType::Transfer } else { QueueType::Graphics };
        self.pool.get_cmd_buf_single_time(queue)
    }

    /// Return everything acquired for a submission that will not be made. `signals` were checked out for it and go
    /// back to idle.
    fn abandon(&self, fence: Option<FenceId>, signals: impl IntoIterator<Item = SemaphoreId>, payload: FencePayload) -> Result<()> {
        if let Some(fence) = fence {
            self.pool.release_fence(fence)?;
        }
        self.pool.reset_semaphores(signals)?;
        payload.discard()
    }

    /// Keep semaphores whose signal is still pending on the GPU for the next owner submission or frame to wait on.
    /// Semaphores that are not signaling anymore are dropped from the list.
    fn defer_waits(&self, chain: &mut Vec<PooledSemaphore>, waits: impl IntoIterator<Item = PooledSemaphore>) -> Result<()> {
        for wait in waits {
            if self.pool.semaphore_status(wait.id)? == SemaphoreStatus::Signaling {
                chain.push(wait);
            } else {
                warn!("Dropped wait on semaphore {:?}, it is not signaling", wait.id);
            }
        }
        Ok(())
    }

    fn defer_wait(&self, wait: Option<PooledSemaphore>) -> Result<()> {
        if wait.is_none() {
            return Ok(());
        }
        let mut chain = self.chain.lock().map_err(|_| Error::PoisonError)?;
        debug!("Deferring the wait on a failed follow-up's semaphore to the next owner submission");
        self.defer_waits(&mut chain, wait)
    }

    /// End a single-time graphics command and submit it.
    ///
    /// On the owner thread this returns immediately, the returned ticket completes during a later
    /// [`SyncHub::run_graphics_callbacks`]. On worker threads this waits for the submission to complete, the ticket is
    /// complete when this returns.
    #[track_caller]
    pub fn end_single_time_command_graphics(&self, cmd: SingleTimeCommand, payload: GraphicsPayload) -> Result<SubmissionTicket> {
        self.end_graphics(cmd, payload, None, SubmissionTicket::new())
    }

    #[track_caller]
    fn end_graphics(
        &self,
        cmd: SingleTimeCommand,
        mut payload: GraphicsPayload,
        wait: Option<PooledSemaphore>,
        ticket: SubmissionTicket,
    ) -> Result<SubmissionTicket> {
        if cmd.queue() != QueueType::Graphics {
            self.defer_wait(wait)?;
            self.abandon(None, None, FencePayload::Graphics(payload))?;
            return self
                .handler
                .escalate(Error::ProtocolViolation("graphics submission recorded for another queue"));
        }

        let owner = self.is_owner_thread();
        // Acquired before ending the command buffer, so a failure here returns it to its pool when `cmd` drops.
        let fence = if owner { self.pool.get_main_thread_graphics_fence() } else { self.pool.get_fence() };
        let fence = match fence {
            Ok(fence) => fence,
            Err(err) => {
                self.defer_wait(wait)?;
                self.abandon(None, None, FencePayload::Graphics(payload))?;
                return Err(err);
            }
        };
        let signal = if owner {
            match self.pool.get_semaphore_for_signaling() {
                Ok(signal) => Some(signal),
                Err(err) => {
                    self.defer_wait(wait)?;
                    self.abandon(Some(fence), None, FencePayload::Graphics(payload))?;
                    return Err(err);
                }
            }
        } else {
            None
        };
        let signal_id = signal.map(|signal| signal.id);

        let cmd = cmd.image_barriers(&std::mem::take(&mut payload.barriers));
        let lease = match cmd.finish() {
            Ok(lease) => lease,
            Err(err) => {
                self.defer_wait(wait)?;
                self.abandon(Some(fence), signal_id, FencePayload::Graphics(payload))?;
                return self.pool.guard("vkEndCommandBuffer", Err(err));
            }
        };

        // SAFETY: The command buffer is owned by the payload until the fence signaled.
        let mut submit = SubmitDescriptor::new(vec![unsafe { lease.handle() }]);
        let mut waits = vec![];
        if let Some(wait) = wait {
            submit = submit.wait(wait.handle, vk::PipelineStageFlags::ALL_COMMANDS);
            waits.push(wait.id);
        }
        payload.command = Some(lease);
        payload.ticket = Some(ticket.clone());

        if owner {
            let mut chain = self.chain.lock().map_err(|_| Error::PoisonError)?;
            let previous = std::mem::take(&mut *chain);
            for link in &previous {
                submit = submit.wait(link.handle, vk::PipelineStageFlags::ALL_COMMANDS);
                waits.push(link.id);
            }
            if let Some(signal) = signal {
                submit = submit.signal(signal.handle);
            }
            let signals = signal_id.into_iter().collect::<Vec<_>>();
            let submitted = self
                .pool
                .submit(fence, QueueType::Graphics, &submit, waits, &signals, FencePayload::Graphics(payload));
            if let Err(err) = submitted {
                // Nothing consumed the previous links, the next submission waits on them instead.
                self.defer_waits(&mut chain, previous.into_iter().chain(wait))?;
                return Err(err);
            }
            chain.extend(signal);
            trace!("Submitted single-time graphics command on the owner thread");
        } else {
            let submitted = self
                .pool
                .submit(fence, QueueType::Graphics, &submit, waits, &[], FencePayload::Graphics(payload));
            if let Err(err) = submitted {
                self.defer_wait(wait)?;
                return Err(err);
            }
            self.pool.wait_for_fence(fence, self.settings.worker_wait)?;
        }
        Ok(ticket)
    }

    /// End a single-time upload command and submit it.
    ///
    /// If the command was recorded for the graphics queue, layout transitions and mip generation for the payload's
    /// images are appended to it and it is submitted like [`SyncHub::end_single_time_command_graphics`].
    ///
    /// Otherwise it is submitted to the transfer queue. Images are released to the graphics queue and a graphics
    /// follow-up acquires them, ordered through a semaphore. Worker threads run the follow-up and wait for both
    /// submissions before returning, so the images are ready and the staging buffers freed when this returns. On the
    /// owner thread the follow-up runs during the next [`SyncHub::run_graphics_callbacks`].
    #[track_caller]
    pub fn end_single_time_command_transfer(&self, cmd: SingleTimeCommand, mut payload: TransferPayload) -> Result<SubmissionTicket> {
        if cmd.queue() == QueueType::Graphics {
            let mut cmd = cmd;
            let mut barriers = vec![];
            for image in &payload.images {
                if image.needs_mipmaps() {
                    cmd = cmd.generate_mipmaps(image);
                } else {
                    barriers.push(image.transition_barrier());
                }
            }
            let graphics = GraphicsPayload {
                staging_buffers: std::mem::take(&mut payload.staging_buffers),
                images: std::mem::take(&mut payload.images),
                barriers,
                ..Default::default()
            };
            return self.end_graphics(cmd, graphics, None, SubmissionTicket::new());
        }
        if cmd.queue() != QueueType::Transfer {
            self.abandon(None, None, FencePayload::Transfer(payload))?;
            return self
                .handler
                .escalate(Error::ProtocolViolation("upload recorded for a queue that cannot be handed off"));
        }

        let owner = self.is_owner_thread();
        let fence = if owner { self.pool.get_main_thread_transfer_fence() } else { self.pool.get_transfer_fence() };
        let fence = match fence {
            Ok(fence) => fence,
            Err(err) => {
                self.abandon(None, None, FencePayload::Transfer(payload))?;
                return Err(err);
            }
        };
        let signal = if payload.images.is_empty() {
            None
        } else {
            match self.pool.get_semaphore_for_signaling() {
                Ok(signal) => Some(signal),
                Err(err) => {
                    self.abandon(Some(fence), None, FencePayload::Transfer(payload))?;
                    return Err(err);
                }
            }
        };
        let signal_id = signal.map(|signal| signal.id);

        let families = self.device.queue_families();
        let (src, dst) = (families.family_of(QueueType::Transfer), families.family_of(QueueType::Graphics));
        let release = payload
            .images
            .iter()
            .map(|image| image.release_barrier(src, dst))
            .collect::<Vec<_>>();
        let acquire = payload
            .images
            .iter()
            .map(|image| image.acquire_barrier(src, dst))
            .collect::<Vec<_>>();
        let lease = match cmd.image_barriers(&release).finish() {
            Ok(lease) => lease,
            Err(err) => {
                self.abandon(Some(fence), signal_id, FencePayload::Transfer(payload))?;
                return self.pool.guard("vkEndCommandBuffer", Err(err));
            }
        };

        let ticket = SubmissionTicket::new();
        // SAFETY: The command buffer is owned by the payload until the fence signaled.
        let mut submit = SubmitDescriptor::new(vec![unsafe { lease.handle() }]);
        if let Some(signal) = signal {
            submit = submit.signal(signal.handle);
        }
        let images = payload.images.clone();
        payload.command = Some(lease);
        // With a follow-up, the ticket completes when the follow-up does.
        if signal.is_none() {
            payload.ticket = Some(ticket.clone());
        }
        let signals = signal_id.into_iter().collect::<Vec<_>>();
        self.pool
            .submit(fence, QueueType::Transfer, &submit, vec![], &signals, FencePayload::Transfer(payload))?;

        let mut follow_up_result = Ok(());
        if let Some(semaphore) = signal {
            let follow_up = GraphicsFollowUp {
                semaphore,
                images,
                barriers: acquire,
                ticket: ticket.clone(),
                origin: std::thread::current().id(),
            };
            if owner {
                self.handoffs.push(follow_up);
            } else {
                follow_up_result = self.execute_follow_up(follow_up);
            }
        }
        // The transfer fence is reclaimed even if the follow-up failed.
        if !owner {
            self.pool.wait_for_fence(fence, self.settings.worker_wait)?;
        }
        follow_up_result?;
        Ok(ticket)
    }

    /// Record and submit the graphics side of a transfer handoff on the calling thread.
    #[track_caller]
    fn execute_follow_up(&self, follow_up: GraphicsFollowUp) -> Result<()> {
        let GraphicsFollowUp {
            semaphore,
            images,
            barriers,
            ticket,
            origin,
        } = follow_up;
        let cmd = match self.begin_single_time_command_graphics() {
            Ok(cmd) => cmd,
            Err(err) => {
                self.defer_wait(Some(semaphore))?;
                return Err(err);
            }
        };
        let mut cmd = cmd.image_barriers(&barriers);
        for image in images.iter().filter(|image| image.needs_mipmaps()) {
            cmd = cmd.generate_mipmaps(image);
        }
        trace!("Running graphics follow-up for {} image(s) submitted by thread {origin:?}", images.len());
        let payload = GraphicsPayload {
            images,
            ..Default::default()
        };
        self.end_graphics(cmd, payload, Some(semaphore), ticket)?;
        Ok(())
    }

    /// Run every queued graphics follow-up. Owner thread only. Returns the number of follow-ups submitted.
    #[track_caller]
    pub fn process_handoffs(&self) -> Result<usize> {
        self.require_owner("process_handoffs")?;
        let mut pending = self.handoffs.drain().into_iter();
        let mut count = 0;
        while let Some(follow_up) = pending.next() {
            if let Err(err) = self.execute_follow_up(follow_up) {
                // Keep the rest for the next call.
                for follow_up in pending.by_ref() {
                    self.handoffs.push(follow_up);
                }
                return Err(err);
            }
            count += 1;
        }
        Ok(count)
    }

    /// Number of queued graphics follow-ups.
    pub fn pending_handoffs(&self) -> usize {
        self.handoffs.len()
    }

    /// Submit queued follow-ups and reclaim every completed owner thread submission. Call once per frame from the
    /// owner thread. Returns the number of reclaimed submissions.
    #[track_caller]
    pub fn run_graphics_callbacks(&self) -> Result<usize> {
        self.require_owner("run_graphics_callbacks")?;
        self.process_handoffs()?;
        self.pool.check_fences_for_callbacks()
    }

    /// True while any submission or follow-up is outstanding.
    pub fn check_fences_for_usage(&self) -> Result<bool> {
        Ok(!self.handoffs.is_empty() || self.pool.check_fences_for_usage()?)
    }

    /// Run the callbacks until nothing is outstanding anymore. Owner thread only.
    #[track_caller]
    pub fn drain(&self) -> Result<()> {
        self.require_owner("drain")?;
        while self.check_fences_for_usage()? {
            if self.run_graphics_callbacks()? == 0 {
                std::thread::yield_now();
            }
        }
        Ok(())
    }

    /// Destroy the command pools of a worker thread that will not record anymore.
    pub fn retire_thread(&self, thread: ThreadId) -> Result<bool> {
        self.pool.retire_thread(thread)
    }

    fn frames(&self) -> Result<std::sync::MutexGuard<RenderSyncData>> {
        Ok(self.frames.lock().map_err(|_| Error::PoisonError)?)
    }

    /// Slot of the frame currently being prepared.
    pub fn current_frame(&self) -> Result<usize> {
        Ok(self.frames()?.current_frame())
    }

    /// In-flight fence of the current frame slot.
    pub fn flight_fence(&self) -> Result<vk::Fence> {
        let frames = self.frames()?;
        Ok(frames.flight_fence(frames.current_frame()))
    }

    /// Semaphore to pass to `vkAcquireNextImageKHR` for the current frame.
    pub fn image_available_semaphore(&self) -> Result<vk::Semaphore> {
        let frames = self.frames()?;
        Ok(frames.image_available(frames.current_frame()))
    }

    /// Semaphore the current frame signals once rendering finished. Presenting waits on it.
    pub fn render_finished_semaphore(&self) -> Result<vk::Semaphore> {
        let frames = self.frames()?;
        Ok(frames.render_finished(frames.current_frame()))
    }

    /// Pooled semaphores the next frame submission waits on, and those it signals.
    pub fn frame_semaphore_data(&self) -> Result<(Vec<SemaphoreId>, Vec<SemaphoreId>)> {
        let frames = self.frames()?;
        Ok((frames.get_wait_data().to_vec(), frames.get_signal_data().to_vec()))
    }

    /// Check out a pooled semaphore that the next frame submission signals, and that its present waits on.
    /// It returns to the pool once the frame slot is reused.
    #[track_caller]
    pub fn frame_signal_semaphore(&self) -> Result<vk::Semaphore> {
        self.require_owner("frame_signal_semaphore")?;
        let mut frames = self.frames()?;
        let semaphore = self.pool.get_semaphore_for_signaling()?;
        frames.set_signal_data([semaphore.id]);
        Ok(semaphore.handle)
    }

    #[track_caller]
    fn wait_frame_fence(&self, frames: &RenderSyncData, slot: usize) -> Result<()> {
        if !frames.is_armed(slot) {
            return Ok(());
        }
        self.handler.check(
            "vkWaitForFences",
            self.device
                .wait_for_fence(frames.flight_fence(slot), u64::MAX)
                .map(|_| ()),
        )
    }

    /// Submit this frame's graphics work, rendering to swapchain image `image_index`. Owner thread only.
    ///
    /// Blocks until the frame previously submitted from the current slot, and the last frame that rendered to the same
    /// image, completed on the GPU. The submission additionally waits on the image available semaphore and the frame's
    /// pooled wait semaphores, and signals the render finished semaphore and the frame's pooled signal semaphores.
    #[track_caller]
    pub fn submit_graphics(&self, submit: SubmitDescriptor, image_index: u32) -> Result<()> {
        self.require_owner("submit_graphics")?;
        let mut frames = self.frames()?;
        let slot = frames.current_frame();
        if let Some(previous) = frames.claim_image(image_index as usize, slot) {
            self.wait_frame_fence(&frames, previous)?;
        }
        self.wait_frame_fence(&frames, slot)?;
        for semaphore in frames.retire(slot) {
            self.pool.release_semaphore(semaphore)?;
        }
        let fence = frames.flight_fence(slot);
        self.handler
            .check("vkResetFences", self.device.reset_fence(fence))?;
        frames.set_armed(slot, false);

        // Added to the waits an earlier failed attempt left pending.
        let links = std::mem::take(&mut *self.chain.lock().map_err(|_| Error::PoisonError)?);
        frames.set_wait_data(links.into_iter().map(|link| link.id));

        let mut submit = submit.wait(frames.image_available(slot), vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        for &wait in frames.get_wait_data() {
            submit = submit.wait(self.pool.semaphore_handle(wait)?, vk::PipelineStageFlags::ALL_COMMANDS);
        }
        submit = submit.signal(frames.render_finished(slot));
        for &signal in frames.get_signal_data() {
            submit = submit.signal(self.pool.semaphore_handle(signal)?);
        }

        match self.device.queue_submit(QueueType::Graphics, &submit, fence) {
            Ok(()) => {
                for &wait in frames.get_wait_data() {
                    self.pool.begin_waiting(wait)?;
                }
                frames.commit(slot);
                trace!("Submitted frame in slot {slot} rendering to image {image_index}");
                Ok(())
            }
            Err(err) => {
                // The waits stay pending for the next frame, the signals were never made.
                self.pool.reset_semaphores(frames.take_pending_signals())?;
                self.handler.check("vkQueueSubmit", Err(err))
            }
        }
    }

    /// Present the current frame and advance to the next frame slot. Owner thread only.
    ///
    /// The present waits on the current frame's render finished semaphore, the pooled semaphores it signaled, and any
    /// semaphores already in `present`.
    #[track_caller]
    pub fn present(&self, mut present: PresentDescriptor) -> Result<PresentStatus> {
        self.require_owner("present")?;
        let mut frames = self.frames()?;
        let slot = frames.current_frame();
        present.wait_semaphores.insert(0, frames.render_finished(slot));
        let (_, signals) = frames.in_flight_data(slot);
        for &signal in signals {
            present.wait_semaphores.push(self.pool.semaphore_handle(signal)?);
            self.pool.begin_waiting(signal)?;
        }
        let result = self.device.queue_present(&present);
        frames.advance();
        match result {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(err) => self.handler.check("vkQueuePresentKHR", Err(err)),
        }
    }
}

impl Drop for SyncHub {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            error!("Waiting for the device to become idle failed during teardown: {err}");
        }
        if self.is_owner_thread() {
            if let Err(err) = self.drain() {
                error!("Could not reclaim outstanding submissions during teardown: {err}");
            }
        } else {
            warn!("SyncHub dropped outside the owner thread, outstanding submissions are dropped without being reclaimed");
            match self.pool.free_unreclaimed() {
                Ok(0) => {}
                Ok(count) => debug!("Freed the staging buffers of {count} unreclaimed submission(s)"),
                Err(err) => error!("Could not free staging buffers during teardown: {err}"),
            }
        }
        if let Err(err) = self.pool.reset_all_semaphores() {
            error!("Could not reset pooled semaphores during teardown: {err}");
        }
    }
}
