//! Exposes the [`QueueSyncPool`], the allocator behind every single-time submission.
//!
//! The pool owns fixed arrays of semaphores and fences, plus the per-thread command pools. Objects are checked out for
//! the duration of exactly one submission and checked back in once the GPU provably finished with them. Nothing is ever
//! created after construction: running dry is handled by the configured [`Exhaustion`] policy.
//!
//! Fences come in two flavours with respect to who reclaims them:
//! - Fences taken on the owner thread are reclaimed by the non-blocking sweep in [`QueueSyncPool::check_fences_for_callbacks`].
//! - Fences taken on worker threads are reclaimed by the worker itself through [`QueueSyncPool::wait_for_fence`], because
//!   their payload holds command buffers only that worker may reset.
//!
//! When a pool runs dry on the owner thread, the sweep runs before the exhaustion policy applies. Owner thread
//! submissions only ever return to the pool through the sweep, so without it a stall could never end.
//!
//! Locks are always taken fences first, semaphores second. No lock is held while blocking on the GPU.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

use anyhow::Result;
use ash::vk;

use crate::command_buffer::registry::ThreadCommandPools;
use crate::command_buffer::SingleTimeCommand;
use crate::core::device::{DeviceContext, SubmitDescriptor};
use crate::core::diagnostics::ResultHandler;
use crate::core::queue::QueueType;
use crate::core::settings::SyncSettings;
use crate::sync::fence::Fence;
use crate::sync::payload::FencePayload;
use crate::sync::retry::{Exhaustion, PooledResource, WorkerWait};
use crate::sync::semaphore::{Semaphore, SemaphoreEvent};
use crate::Error;

/// Index of a semaphore in the pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemaphoreId(pub(crate) usize);

/// A semaphore checked out for signaling.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PooledSemaphore {
    pub id: SemaphoreId,
    pub handle: vk::Semaphore,
}

/// CPU-side state of a pooled semaphore.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SemaphoreStatus {
    Idle,
    Signaling,
    Waiting,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FenceKind {
    Graphics,
    Transfer,
}

/// Slot of a fence in the pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FenceId {
    pub kind: FenceKind,
    pub(crate) index: usize,
}

/// Who brings a submitted fence back to the pool.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Reclaim {
    /// The owner thread's callback sweep.
    #[default]
    Sweep,
    /// The thread that submitted it, by waiting on it.
    Submitter,
}

#[derive(Debug)]
struct FenceSlot {
    fence: Fence,
    payload: FencePayload,
    reclaim: Reclaim,
}

/// Number of idle objects in each pool. Command buffers are counted over the calling thread's pools, and are zero for
/// a thread that never recorded a command.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PoolCounts {
    pub semaphores: usize,
    pub graphics_fences: usize,
    pub transfer_fences: usize,
    pub command_buffers: usize,
}

/// Fixed-size pools of semaphores, fences and single-time command buffers.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct QueueSyncPool {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn DeviceContext>,
    handler: Arc<ResultHandler>,
    exhaustion: Exhaustion,
    owner: ThreadId,
    semaphores: Mutex<Vec<Semaphore>>,
    graphics_fences: Mutex<Vec<FenceSlot>>,
    transfer_fences: Mutex<Vec<FenceSlot>>,
    commands: ThreadCommandPools,
}

fn create_fences(device: &Arc<dyn DeviceContext>, count: usize) -> Result<Vec<FenceSlot>> {
    (0..count)
        .map(|_| -> Result<FenceSlot> {
            Ok(FenceSlot {
                fence: Fence::new(device.clone())?,
                payload: FencePayload::Empty,
                reclaim: Reclaim::Sweep,
            })
        })
        .collect()
}

impl QueueSyncPool {
    /// Create every pooled object up front. `owner` is the thread allowed to run the callback sweep.
    pub fn new(device: Arc<dyn DeviceContext>, settings: &SyncSettings, handler: Arc<ResultHandler>, owner: ThreadId) -> Result<Self> {
        let semaphores = (0..settings.semaphore_count)
            .map(|_| Semaphore::new(device.clone(), settings.trace_semaphores))
            .collect::<Result<Vec<_>>>()?;
        let graphics_fences = create_fences(&device, settings.graphics_fence_count)?;
        let transfer_fences = create_fences(&device, settings.transfer_fence_count)?;
        let commands = ThreadCommandPools::new(device.clone(), owner, settings.command_buffers_per_pool)?;
        info!(
            "Created sync pools: {} semaphores, {} graphics fences, {} transfer fences, {} command buffers per thread and queue",
            semaphores.len(),
            graphics_fences.len(),
            transfer_fences.len(),
            settings.command_buffers_per_pool
        );
        Ok(Self {
            device,
            handler,
            exhaustion: settings.exhaustion,
            owner,
            semaphores: Mutex::new(semaphores),
            graphics_fences: Mutex::new(graphics_fences),
            transfer_fences: Mutex::new(transfer_fences),
            commands,
        })
    }

    /// Thread allowed to run the callback sweep.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owner_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    /// Route a failure through the result handler. Device errors and protocol violations are escalated according to
    /// the failure policy, everything else is passed on as is.
    #[track_caller]
    pub(crate) fn guard<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let err = match err.downcast::<vk::Result>() {
            Ok(result) => return self.handler.check(operation, Err(result)),
            Err(err) => err,
        };
        match err.downcast::<Error>() {
            Ok(Error::VkError(result)) => self.handler.check(operation, Err(result)),
            Ok(error @ (Error::ProtocolViolation(_) | Error::WrongThread(_))) => self.handler.escalate(error),
            Ok(error) => Err(error.into()),
            Err(err) => Err(err),
        }
    }

    fn lock_semaphores(&self) -> Result<MutexGuard<Vec<Semaphore>>> {
        Ok(self.semaphores.lock().map_err(|_| Error::PoisonError)?)
    }

    fn lock_fences(&self, kind: FenceKind) -> Result<MutexGuard<Vec<FenceSlot>>> {
        let fences = match kind {
            FenceKind::Graphics => &self.graphics_fences,
            FenceKind::Transfer => &self.transfer_fences,
        };
        Ok(fences.lock().map_err(|_| Error::PoisonError)?)
    }

    fn with_semaphore<T>(&self, id: SemaphoreId, f: impl FnOnce(&mut Semaphore) -> Result<T>) -> Result<T> {
        let mut semaphores = self.lock_semaphores()?;
        let semaphore = semaphores
            .get_mut(id.0)
            .ok_or(Error::Uncategorized("semaphore id out of range"))?;
        f(semaphore)
    }

    /// Run the sweep if this is the owner thread. Returns true if anything was reclaimed, so a failed scan is worth
    /// repeating right away.
    fn reclaim_on_miss(&self) -> Result<bool> {
        Ok(self.is_owner_thread() && self.sweep()? > 0)
    }

    fn try_checkout_semaphore(&self) -> Result<Option<PooledSemaphore>> {
        let mut semaphores = self.lock_semaphores()?;
        let Some((index, semaphore)) = semaphores
            .iter_mut()
            .enumerate()
            .find(|(_, semaphore)| semaphore.is_idle())
        else {
            return Ok(None);
        };
        semaphore.begin_signaling()?;
        Ok(Some(PooledSemaphore {
            id: SemaphoreId(index),
            // SAFETY: The handle is only used in submissions made while this semaphore is checked out.
            handle: unsafe { semaphore.handle() },
        }))
    }

    /// Check out an idle semaphore and mark it signaling.
    #[track_caller]
    pub fn get_semaphore_for_signaling(&self) -> Result<PooledSemaphore> {
        let semaphore = self.exhaustion.acquire(PooledResource::Semaphore, || {
            match self.try_checkout_semaphore()? {
                Some(semaphore) => Ok(Some(semaphore)),
                None if self.reclaim_on_miss()? => self.try_checkout_semaphore(),
                None => Ok(None),
            }
        });
        self.guard("get_semaphore_for_signaling", semaphore)
    }

    /// A submission waiting on this semaphore was made.
    #[track_caller]
    pub fn begin_waiting(&self, id: SemaphoreId) -> Result<()> {
        let result = self.with_semaphore(id, Semaphore::begin_waiting);
        self.guard("begin_waiting", result)
    }

    /// The submission waiting on this semaphore completed, it is idle again.
    #[track_caller]
    pub fn finish_waiting(&self, id: SemaphoreId) -> Result<()> {
        let result = self.with_semaphore(id, Semaphore::finish_waiting);
        self.guard("finish_waiting", result)
    }

    /// Return a semaphore whose last use is known to have completed on the GPU, whatever state it is in.
    pub fn release_semaphore(&self, id: SemaphoreId) -> Result<()> {
        self.with_semaphore(id, |semaphore| {
            if semaphore.is_waiting() {
                semaphore.finish_waiting()
            } else {
                if semaphore.is_signaling() {
                    warn!("Released semaphore {id:?} that was signaled but never waited on");
                }
                semaphore.reset();
                Ok(())
            }
        })
    }

    pub fn semaphore_status(&self, id: SemaphoreId) -> Result<SemaphoreStatus> {
        self.with_semaphore(id, |semaphore| {
            Ok(if semaphore.is_waiting() {
                SemaphoreStatus::Waiting
            } else if semaphore.is_signaling() {
                SemaphoreStatus::Signaling
            } else {
                SemaphoreStatus::Idle
            })
        })
    }

    pub fn semaphore_handle(&self, id: SemaphoreId) -> Result<vk::Semaphore> {
        // SAFETY: Handed out for submissions only, the pool keeps ownership.
        self.with_semaphore(id, |semaphore| Ok(unsafe { semaphore.handle() }))
    }

    /// Causality trace of a semaphore. Empty unless tracing is enabled in the settings.
    pub fn semaphore_trace(&self, id: SemaphoreId) -> Result<Vec<(SemaphoreEvent, ThreadId)>> {
        self.with_semaphore(id, |semaphore| Ok(semaphore.trace()))
    }

    /// Force semaphores that were checked out for a submission that never reached the GPU back to idle.
    pub(crate) fn reset_semaphores(&self, ids: impl IntoIterator<Item = SemaphoreId>) -> Result<()> {
        let mut semaphores = self.lock_semaphores()?;
        for id in ids {
            if let Some(semaphore) = semaphores.get_mut(id.0) {
                semaphore.reset();
            }
        }
        Ok(())
    }

    fn try_checkout_fence(&self, kind: FenceKind, reclaim: Reclaim) -> Result<Option<FenceId>> {
        let mut fences = self.lock_fences(kind)?;
        let Some((index, slot)) = fences
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.fence.is_in_use())
        else {
            return Ok(None);
        };
        slot.fence.checkout()?;
        slot.reclaim = reclaim;
        Ok(Some(FenceId {
            kind,
            index,
        }))
    }

    #[track_caller]
    fn acquire_fence(&self, kind: FenceKind, reclaim: Reclaim) -> Result<FenceId> {
        let resource = match kind {
            FenceKind::Graphics => PooledResource::GraphicsFence,
            FenceKind::Transfer => PooledResource::TransferFence,
        };
        let fence = self.exhaustion.acquire(resource, || match self.try_checkout_fence(kind, reclaim)? {
            Some(fence) => Ok(Some(fence)),
            None if self.reclaim_on_miss()? => self.try_checkout_fence(kind, reclaim),
            None => Ok(None),
        });
        self.guard("acquire_fence", fence)
    }

    fn require_owner(&self, operation: &'static str) -> Result<()> {
        if self.is_owner_thread() {
            Ok(())
        } else {
            self.handler.escalate(Error::WrongThread(operation))
        }
    }

    /// Check out a graphics fence that the calling thread reclaims itself with [`QueueSyncPool::wait_for_fence`].
    #[track_caller]
    pub fn get_fence(&self) -> Result<FenceId> {
        self.acquire_fence(FenceKind::Graphics, Reclaim::Submitter)
    }

    /// Check out a graphics fence reclaimed by the owner thread's sweep. Owner thread only.
    #[track_caller]
    pub fn get_main_thread_graphics_fence(&self) -> Result<FenceId> {
        self.require_owner("get_main_thread_graphics_fence")?;
        self.acquire_fence(FenceKind::Graphics, Reclaim::Sweep)
    }

    /// Check out a transfer fence that the calling thread reclaims itself.
    #[track_caller]
    pub fn get_transfer_fence(&self) -> Result<FenceId> {
        self.acquire_fence(FenceKind::Transfer, Reclaim::Submitter)
    }

    /// Check out a transfer fence reclaimed by the owner thread's sweep. Owner thread only.
    #[track_caller]
    pub fn get_main_thread_transfer_fence(&self) -> Result<FenceId> {
        self.require_owner("get_main_thread_transfer_fence")?;
        self.acquire_fence(FenceKind::Transfer, Reclaim::Sweep)
    }

    /// Return a fence that was checked out but never submitted.
    pub fn release_fence(&self, id: FenceId) -> Result<()> {
        let mut fences = self.lock_fences(id.kind)?;
        let slot = fences
            .get_mut(id.index)
            .ok_or(Error::Uncategorized("fence id out of range"))?;
        slot.fence.release()
    }

    pub fn is_fence_submitted(&self, id: FenceId) -> Result<bool> {
        let fences = self.lock_fences(id.kind)?;
        Ok(fences
            .get(id.index)
            .map(|slot| slot.fence.is_submitted())
            .unwrap_or(false))
    }

    /// Submit to `queue`, guarded by the fence `id`. On success the fence becomes responsible for finishing the waits
    /// on `waits` and for releasing `payload`.
    ///
    /// If the submission never reaches the GPU, the fence is checked back in and the payload is discarded before the
    /// error is escalated. The semaphores in `signals` are reset. The semaphores in `waits` go back to signaling: the
    /// submissions that signal them did reach the GPU, and the caller is responsible for having something else wait on
    /// them.
    #[track_caller]
    pub(crate) fn submit(
        &self,
        id: FenceId,
        queue: QueueType,
        submit: &SubmitDescriptor,
        waits: Vec<SemaphoreId>,
        signals: &[SemaphoreId],
        payload: FencePayload,
    ) -> Result<()> {
        let (err, payload) = match self.submit_locked(id, queue, submit, &waits, payload) {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };
        error!("Submission to {queue:?} with fence {id:?} failed: {err}");
        self.reset_semaphores(signals.iter().copied())?;
        if let Err(release) = self.release_fence(id) {
            warn!("Could not check fence {id:?} back in after a failed submission: {release}");
        }
        payload.discard()?;
        self.guard("vkQueueSubmit", Err(err))
    }

    fn submit_locked(
        &self,
        id: FenceId,
        queue: QueueType,
        submit: &SubmitDescriptor,
        waits: &[SemaphoreId],
        payload: FencePayload,
    ) -> Result<(), (anyhow::Error, FencePayload)> {
        let mut fences = match self.lock_fences(id.kind) {
            Ok(fences) => fences,
            Err(err) => return Err((err, payload)),
        };
        let mut semaphores = match self.lock_semaphores() {
            Ok(semaphores) => semaphores,
            Err(err) => return Err((err, payload)),
        };
        let Some(slot) = fences.get_mut(id.index) else {
            return Err((Error::Uncategorized("fence id out of range").into(), payload));
        };
        if !slot.fence.is_in_use() || slot.fence.is_submitted() {
            return Err((Error::ProtocolViolation("submitted with a fence that is not checked out").into(), payload));
        }

        let mut began = 0;
        let armed = (|| -> Result<vk::Fence> {
            slot.fence.mark_submitted(waits.to_vec())?;
            for wait in waits {
                semaphores
                    .get_mut(wait.0)
                    .ok_or(Error::Uncategorized("semaphore id out of range"))?
                    .begin_waiting()?;
                began += 1;
            }
            if let Some(command) = payload.command() {
                command.mark_submitted()?;
            }
            // SAFETY: The fence is checked out by this submission.
            Ok(unsafe { slot.fence.handle() })
        })();
        let result = armed.and_then(|fence| {
            self.device
                .queue_submit(queue, submit, fence)
                .map_err(|err| Error::VkError(err).into())
        });
        if let Err(err) = result {
            slot.fence.cancel_submission();
            for wait in &waits[..began] {
                if let Err(cancel) = semaphores[wait.0].cancel_waiting() {
                    warn!("Could not roll back the wait on semaphore {wait:?}: {cancel}");
                }
            }
            return Err((err, payload));
        }
        slot.payload = payload;
        trace!("Submitted to {queue:?} with fence {id:?}, waiting on {waits:?}");
        Ok(())
    }

    /// Poll a fence once. If it signaled, its waits are finished, it is checked back in and its payload is returned.
    fn try_reclaim(&self, id: FenceId) -> Result<Option<FencePayload>> {
        let mut fences = self.lock_fences(id.kind)?;
        let slot = fences
            .get_mut(id.index)
            .ok_or(Error::Uncategorized("fence id out of range"))?;
        let Some(waits) = slot.fence.check_return(0)? else {
            return Ok(None);
        };
        let payload = slot.payload.take();
        slot.fence.release()?;
        let mut semaphores = self.lock_semaphores()?;
        for wait in waits {
            if let Some(semaphore) = semaphores.get_mut(wait.0) {
                semaphore.finish_waiting()?;
            }
        }
        Ok(Some(payload))
    }

    /// Wait until the fence `id` signaled, then check it back in and release its payload on the calling thread.
    ///
    /// This is how worker threads reclaim their own submissions. A blocking wait is never made on the owner thread, it
    /// falls back to polling instead.
    #[track_caller]
    pub fn wait_for_fence(&self, id: FenceId, wait: WorkerWait) -> Result<()> {
        let wait = match wait {
            WorkerWait::Block if self.is_owner_thread() => WorkerWait::default(),
            wait => wait,
        };
        loop {
            if let WorkerWait::Block = wait {
                let fence = {
                    let fences = self.lock_fences(id.kind)?;
                    let slot = fences
                        .get(id.index)
                        .ok_or(Error::Uncategorized("fence id out of range"))?;
                    // SAFETY: Only used to wait on, the fence is reset under the lock by try_reclaim.
                    unsafe { slot.fence.handle() }
                };
                self.handler
                    .check("vkWaitForFences", self.device.wait_for_fence(fence, u64::MAX))?;
            }
            let reclaimed = self.try_reclaim(id);
            if let Some(payload) = self.guard("wait_for_fence", reclaimed)? {
                let released = payload.release();
                return self.guard("release_payload", released);
            }
            if let WorkerWait::Poll {
                interval,
            } = wait
            {
                std::thread::sleep(interval);
            }
        }
    }

    /// True if any fence is submitted and not yet reclaimed. Teardown must wait until this returns false.
    pub fn check_fences_for_usage(&self) -> Result<bool> {
        for kind in [FenceKind::Graphics, FenceKind::Transfer] {
            if self
                .lock_fences(kind)?
                .iter()
                .any(|slot| slot.fence.is_submitted())
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Poll every fence submitted from the owner thread with a zero timeout. Completed fences have their payload
    /// released and are checked back in, the rest are left for the next sweep. Owner thread only.
    ///
    /// Returns the number of reclaimed fences.
    #[track_caller]
    pub fn check_fences_for_callbacks(&self) -> Result<usize> {
        self.require_owner("check_fences_for_callbacks")?;
        self.sweep()
    }

    fn sweep(&self) -> Result<usize> {
        let mut payloads = vec![];
        for kind in [FenceKind::Graphics, FenceKind::Transfer] {
            let candidates = self
                .lock_fences(kind)?
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.fence.is_submitted() && slot.reclaim == Reclaim::Sweep)
                .map(|(index, _)| FenceId {
                    kind,
                    index,
                })
                .collect::<Vec<_>>();
            for id in candidates {
                let reclaimed = self.try_reclaim(id);
                if let Some(payload) = self.guard("check_fences_for_callbacks", reclaimed)? {
                    payloads.push(payload);
                }
            }
        }
        let count = payloads.len();
        // Payloads are released without holding any pool lock.
        for payload in payloads {
            let released = payload.release();
            self.guard("release_payload", released)?;
        }
        if count > 0 {
            trace!("Reclaimed {count} fence(s)");
        }
        Ok(count)
    }

    /// Lease an idle single-time command buffer for `queue` from the calling thread's pool and begin recording.
    #[track_caller]
    pub fn get_cmd_buf_single_time(&self, queue: QueueType) -> Result<SingleTimeCommand> {
        let lease = self
            .commands
            .acquire(queue, &self.exhaustion, || self.reclaim_on_miss());
        let lease = self.guard("get_cmd_buf_single_time", lease)?;
        let cmd = SingleTimeCommand::begin(self.device.clone(), lease);
        self.guard("vkBeginCommandBuffer", cmd)
    }

    /// Destroy the command pools of a worker thread that stopped recording.
    pub fn retire_thread(&self, thread: ThreadId) -> Result<bool> {
        self.commands.retire_thread(thread)
    }

    /// Number of worker threads with live command pools.
    pub fn worker_thread_count(&self) -> Result<usize> {
        self.commands.thread_count()
    }

    /// Snapshot of the idle objects in every pool.
    pub fn idle_counts(&self) -> Result<PoolCounts> {
        let idle_fences = |kind| -> Result<usize> {
            Ok(self
                .lock_fences(kind)?
                .iter()
                .filter(|slot| !slot.fence.is_in_use())
                .count())
        };
        let graphics_fences = idle_fences(FenceKind::Graphics)?;
        let transfer_fences = idle_fences(FenceKind::Transfer)?;
        let semaphores = self
            .lock_semaphores()?
            .iter()
            .filter(|semaphore| semaphore.is_idle())
            .count();
        let command_buffers = match self.commands.get(std::thread::current().id())? {
            Some(set) => set.idle_count()?,
            None => 0,
        };
        Ok(PoolCounts {
            semaphores,
            graphics_fences,
            transfer_fences,
            command_buffers,
        })
    }

    /// Free the staging buffers of every submission that was not reclaimed, leaving the rest of the payload to be
    /// dropped with the pool. Teardown only, once the device is idle and the owner thread cannot run the sweep.
    ///
    /// Returns the number of payloads dropped this way.
    pub(crate) fn free_unreclaimed(&self) -> Result<usize> {
        let mut count = 0;
        for kind in [FenceKind::Graphics, FenceKind::Transfer] {
            for slot in self.lock_fences(kind)?.iter_mut() {
                let payload = slot.payload.take();
                if !payload.is_empty() {
                    payload.free_staging();
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Force every semaphore back to idle. Teardown only, once the device is idle.
    pub(crate) fn reset_all_semaphores(&self) -> Result<()> {
        for semaphore in self.lock_semaphores()?.iter_mut() {
            semaphore.reset();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::diagnostics::FailurePolicy;
    use crate::core::headless::{Completion, HeadlessDevice};
    use crate::core::settings::SyncSettingsBuilder;
    use crate::sync::payload::GraphicsPayload;

    fn pool(completion: Completion) -> (Arc<HeadlessDevice>, QueueSyncPool) {
        let device = Arc::new(HeadlessDevice::single_queue(completion));
        let settings = SyncSettingsBuilder::new()
            .semaphores(4)
            .graphics_fences(2)
            .transfer_fences(2)
            .command_buffers_per_pool(2)
            .exhaustion(Exhaustion::Bounded {
                attempts: 0,
                sleep: Duration::ZERO,
            })
            .failure_policy(FailurePolicy::Propagate)
            .build();
        let handler = Arc::new(ResultHandler::new(FailurePolicy::Propagate, None, None).unwrap());
        let pool = QueueSyncPool::new(device.clone(), &settings, handler, std::thread::current().id()).unwrap();
        (device, pool)
    }

    #[test]
    fn semaphore_wait_is_finished_by_the_fence() -> Result<()> {
        let (device, pool) = pool(Completion::Manual);
        let before = pool.idle_counts()?;
        let semaphore = pool.get_semaphore_for_signaling()?;
        assert_eq!(pool.semaphore_status(semaphore.id)?, SemaphoreStatus::Signaling);

        let fence = pool.get_main_thread_graphics_fence()?;
        let submit = SubmitDescriptor::default().wait(semaphore.handle, vk::PipelineStageFlags::ALL_COMMANDS);
        pool.submit(fence, QueueType::Graphics, &submit, vec![semaphore.id], &[], FencePayload::Empty)?;
        assert_eq!(pool.semaphore_status(semaphore.id)?, SemaphoreStatus::Waiting);
        assert!(pool.check_fences_for_usage()?);

        // Not complete yet: the sweep leaves it alone.
        assert_eq!(pool.check_fences_for_callbacks()?, 0);
        assert!(pool.is_fence_submitted(fence)?);

        device.complete_all();
        assert_eq!(pool.check_fences_for_callbacks()?, 1);
        assert_eq!(pool.semaphore_status(semaphore.id)?, SemaphoreStatus::Idle);
        assert!(!pool.check_fences_for_usage()?);
        assert_eq!(pool.idle_counts()?, before);
        Ok(())
    }

    #[test]
    fn submitter_fences_are_not_swept() -> Result<()> {
        let (device, pool) = pool(Completion::Manual);
        let fence = pool.get_fence()?;
        pool.submit(fence, QueueType::Graphics, &SubmitDescriptor::default(), vec![], &[], FencePayload::Empty)?;
        device.complete_all();
        assert_eq!(pool.check_fences_for_callbacks()?, 0);
        pool.wait_for_fence(fence, WorkerWait::Block)?;
        assert!(!pool.check_fences_for_usage()?);
        Ok(())
    }

    #[test]
    fn command_buffer_round_trip() -> Result<()> {
        let (device, pool) = pool(Completion::Immediate);
        let before = pool.idle_counts()?;
        let cmd = pool.get_cmd_buf_single_time(QueueType::Graphics)?;
        assert_eq!(pool.idle_counts()?.command_buffers, before.command_buffers - 1);
        let lease = cmd.finish()?;
        let fence = pool.get_main_thread_graphics_fence()?;
        let payload = GraphicsPayload {
            command: Some(lease),
            ..Default::default()
        };
        pool.submit(fence, QueueType::Graphics, &SubmitDescriptor::default(), vec![], &[], FencePayload::Graphics(payload))?;
        assert_eq!(pool.check_fences_for_callbacks()?, 1);
        assert_eq!(pool.idle_counts()?, before);
        assert_eq!(device.submissions().len(), 1);
        Ok(())
    }

    #[test]
    fn failed_submission_returns_everything() -> Result<()> {
        let (device, pool) = pool(Completion::Immediate);
        let before = pool.idle_counts()?;
        let signal = pool.get_semaphore_for_signaling()?;
        let fence = pool.get_main_thread_graphics_fence()?;
        device.fail_next_submit(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let submit = SubmitDescriptor::default().signal(signal.handle);
        let err = pool
            .submit(fence, QueueType::Graphics, &submit, vec![], &[signal.id], FencePayload::Empty)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::VkError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))));
        assert_eq!(pool.idle_counts()?, before);
        assert!(!pool.check_fences_for_usage()?);
        Ok(())
    }

    #[test]
    fn failed_submission_keeps_pending_signals() -> Result<()> {
        let (device, pool) = pool(Completion::Immediate);
        let link = pool.get_semaphore_for_signaling()?;
        let fence = pool.get_main_thread_graphics_fence()?;
        let submit = SubmitDescriptor::default().signal(link.handle);
        pool.submit(fence, QueueType::Graphics, &submit, vec![], &[link.id], FencePayload::Empty)?;

        let fence = pool.get_main_thread_graphics_fence()?;
        let signal = pool.get_semaphore_for_signaling()?;
        device.fail_next_submit(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let submit = SubmitDescriptor::default()
            .wait(link.handle, vk::PipelineStageFlags::ALL_COMMANDS)
            .signal(signal.handle);
        assert!(pool
            .submit(fence, QueueType::Graphics, &submit, vec![link.id], &[signal.id], FencePayload::Empty)
            .is_err());
        // The first submission's signal was never consumed, the failed one's was never made.
        assert_eq!(pool.semaphore_status(link.id)?, SemaphoreStatus::Signaling);
        assert_eq!(pool.semaphore_status(signal.id)?, SemaphoreStatus::Idle);
        assert_ne!(pool.get_semaphore_for_signaling()?.id, link.id);

        let fence = pool.get_main_thread_graphics_fence()?;
        let submit = SubmitDescriptor::default().wait(link.handle, vk::PipelineStageFlags::ALL_COMMANDS);
        pool.submit(fence, QueueType::Graphics, &submit, vec![link.id], &[], FencePayload::Empty)?;
        assert_eq!(pool.semaphore_status(link.id)?, SemaphoreStatus::Waiting);
        Ok(())
    }

    #[test]
    fn owner_reclaims_finished_work_when_the_pool_runs_dry() -> Result<()> {
        let (device, pool) = pool(Completion::Immediate);
        // Neither fence is swept explicitly, acquiring a third one must reclaim them.
        for _ in 0..3 {
            let fence = pool.get_main_thread_graphics_fence()?;
            pool.submit(fence, QueueType::Graphics, &SubmitDescriptor::default(), vec![], &[], FencePayload::Empty)?;
        }
        assert_eq!(device.submissions().len(), 3);
        Ok(())
    }

    #[test]
    fn waiting_on_an_unsignaled_semaphore_is_a_violation() -> Result<()> {
        let (device, pool) = pool(Completion::Immediate);
        let fence = pool.get_main_thread_graphics_fence()?;
        let err = pool
            .submit(fence, QueueType::Graphics, &SubmitDescriptor::default(), vec![SemaphoreId(0)], &[], FencePayload::Empty)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ProtocolViolation(_))));
        assert!(device.submissions().is_empty());
        assert_eq!(pool.idle_counts()?.graphics_fences, 2);
        Ok(())
    }

    #[test]
    fn sweep_is_owner_only() {
        let (_device, pool) = pool(Completion::Immediate);
        let pool = Arc::new(pool);
        let worker = pool.clone();
        let result = std::thread::spawn(move || worker.check_fences_for_callbacks().map_err(|err| err.to_string()))
            .join()
            .unwrap();
        assert!(result.unwrap_err().contains("owner thread"));
    }

    #[test]
    fn exhausted_fence_pool_is_reported() -> Result<()> {
        let (_device, pool) = pool(Completion::Immediate);
        let _a = pool.get_fence()?;
        let _b = pool.get_fence()?;
        let err = pool.get_fence().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::PoolExhausted {
                resource: PooledResource::GraphicsFence
            })
        ));
        Ok(())
    }
}
