//! Exposes all structs needed to configure the synchronization core.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::diagnostics::{CrashDumpHook, FailurePolicy};
use crate::sync::retry::{Exhaustion, WorkerWait};

/// Settings used to create a [`SyncHub`](crate::SyncHub). All pools are sized once, here. They never grow.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct SyncSettings {
    /// Number of pooled semaphores used for cross-submission and cross-queue handoffs.
    pub semaphore_count: usize,
    /// Number of pooled fences guarding single-time graphics submissions.
    pub graphics_fence_count: usize,
    /// Number of pooled fences guarding single-time transfer submissions.
    pub transfer_fence_count: usize,
    /// Number of single-time command buffers in each per-thread, per-queue command pool.
    pub command_buffers_per_pool: usize,
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Number of swapchain images. Used to track which frame last rendered to each image.
    pub swapchain_image_count: usize,
    /// What to do when a pool has no idle object left.
    pub exhaustion: Exhaustion,
    /// How worker threads wait for their single-time submissions to complete.
    pub worker_wait: WorkerWait,
    /// What to do after a failed device call was logged.
    pub failure_policy: FailurePolicy,
    /// File that failed device calls are appended to.
    pub diagnostic_log: Option<PathBuf>,
    /// Route worker uploads through the dedicated transfer queue when the device has one.
    pub use_transfer_queue: bool,
    /// Record a causality trace of every state change on pooled semaphores.
    pub trace_semaphores: bool,
    /// Crash dump capture, run when the device is lost.
    #[derivative(Debug = "ignore")]
    pub crash_dump: Option<Arc<dyn CrashDumpHook>>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            semaphore_count: 64,
            graphics_fence_count: 32,
            transfer_fence_count: 32,
            command_buffers_per_pool: 16,
            frames_in_flight: 2,
            swapchain_image_count: 3,
            exhaustion: Exhaustion::default(),
            worker_wait: WorkerWait::default(),
            failure_policy: FailurePolicy::default(),
            diagnostic_log: None,
            use_transfer_queue: true,
            trace_semaphores: false,
            crash_dump: None,
        }
    }
}

impl SyncSettings {
    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error::InvalidSettings;
        if self.semaphore_count == 0 {
            return Err(InvalidSettings("semaphore_count must be at least 1"));
        }
        if self.graphics_fence_count == 0 || self.transfer_fence_count == 0 {
            return Err(InvalidSettings("fence pools must hold at least 1 fence"));
        }
        if self.command_buffers_per_pool == 0 {
            return Err(InvalidSettings("command_buffers_per_pool must be at least 1"));
        }
        if self.frames_in_flight == 0 {
            return Err(InvalidSettings("frames_in_flight must be at least 1"));
        }
        Ok(())
    }
}

/// Convenience builder for [`SyncSettings`].
///
/// # Example
/// ```
/// # use quay::*;
/// # use std::time::Duration;
/// let settings = SyncSettingsBuilder::new()
///     .semaphores(128)
///     .graphics_fences(32)
///     .frames_in_flight(2)
///     .exhaustion(Exhaustion::Spin { sleep: Duration::from_micros(1) })
///     .diagnostic_log("gpu_failures.log")
///     .build();
/// assert_eq!(settings.semaphore_count, 128);
/// ```
#[derive(Debug, Default)]
pub struct SyncSettingsBuilder {
    inner: SyncSettings,
}

impl SyncSettingsBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pooled semaphores.
    pub fn semaphores(mut self, count: usize) -> Self {
        self.inner.semaphore_count = count;
        self
    }

    /// Number of pooled graphics fences.
    pub fn graphics_fences(mut self, count: usize) -> Self {
        self.inner.graphics_fence_count = count;
        self
    }

    /// Number of pooled transfer fences.
    pub fn transfer_fences(mut self, count: usize) -> Self {
        self.inner.transfer_fence_count = count;
        self
    }

    /// Number of single-time command buffers per thread and queue.
    pub fn command_buffers_per_pool(mut self, count: usize) -> Self {
        self.inner.command_buffers_per_pool = count;
        self
    }

    /// Number of frames in flight.
    pub fn frames_in_flight(mut self, count: usize) -> Self {
        self.inner.frames_in_flight = count;
        self
    }

    /// Number of swapchain images.
    pub fn swapchain_images(mut self, count: usize) -> Self {
        self.inner.swapchain_image_count = count;
        self
    }

    /// Pool exhaustion policy.
    pub fn exhaustion(mut self, exhaustion: Exhaustion) -> Self {
        self.inner.exhaustion = exhaustion;
        self
    }

    /// How worker threads wait on their own submissions.
    pub fn worker_wait(mut self, wait: WorkerWait) -> Self {
        self.inner.worker_wait = wait;
        self
    }

    /// Failure policy for failed device calls and protocol violations.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.inner.failure_policy = policy;
        self
    }

    /// Append failed device calls to this file.
    pub fn diagnostic_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.diagnostic_log = Some(path.into());
        self
    }

    /// Enable or disable routing uploads through a dedicated transfer queue.
    pub fn transfer_queue(mut self, enabled: bool) -> Self {
        self.inner.use_transfer_queue = enabled;
        self
    }

    /// Enable the semaphore causality trace.
    pub fn trace_semaphores(mut self, enabled: bool) -> Self {
        self.inner.trace_semaphores = enabled;
        self
    }

    /// Run `hook` when the device is lost.
    pub fn crash_dump(mut self, hook: impl CrashDumpHook + 'static) -> Self {
        self.inner.crash_dump = Some(Arc::new(hook));
        self
    }

    /// Build the resulting settings.
    pub fn build(self) -> SyncSettings {
        self.inner
    }
}

impl SyncSettingsBuilder {
    /// Shorthand for the poll interval used by [`WorkerWait::Poll`].
    pub fn worker_poll_interval(self, interval: Duration) -> Self {
        self.worker_wait(WorkerWait::Poll { interval })
    }
}
