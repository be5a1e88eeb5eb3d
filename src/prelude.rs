pub use ash::vk;

pub use crate::core::device::{DeviceContext, PresentDescriptor, SubmitDescriptor, VulkanDevice};
pub use crate::core::diagnostics::{CrashDumpHook, FailurePolicy, ResultHandler};
pub use crate::core::error::Error;
pub use crate::core::headless::{Completion, DeviceEvent, HeadlessDevice};
pub use crate::core::queue::{QueueFamilies, QueueInfo, QueueType};
pub use crate::core::settings::{SyncSettings, SyncSettingsBuilder};

pub use crate::command_buffer::{CommandLease, CommandState, SingleTimeCommand};

pub use crate::sync::hub::{PresentStatus, SyncHub};
pub use crate::sync::payload::{FencePayload, GraphicsPayload, ImageBarrier, ImageResource, StagingBuffer, TransferPayload};
pub use crate::sync::pool::{FenceId, FenceKind, PoolCounts, PooledSemaphore, QueueSyncPool, Reclaim, SemaphoreId, SemaphoreStatus};
pub use crate::sync::retry::{Exhaustion, PooledResource, WorkerWait};
pub use crate::sync::semaphore::SemaphoreEvent;
pub use crate::sync::ticket::SubmissionTicket;
