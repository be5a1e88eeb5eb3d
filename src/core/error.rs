//! Exposes the quay error type

use std::sync::PoisonError;

use ash;
use thiserror::Error;

use crate::core::queue::QueueType;
use crate::sync::retry::PooledResource;

/// Error type that quay can return.
#[derive(Error, Debug)]
pub enum Error {
    /// Generic Vulkan error type.
    #[error("Vulkan error: `{0}`")]
    VkError(ash::vk::Result),
    /// The device was lost. Everything submitted after this point is undefined.
    #[error("Device lost during `{0}`")]
    DeviceLost(&'static str),
    /// A fixed-size pool had no idle object left. Pools never grow, so this means the pool is undersized.
    #[error("No idle {resource} left in the pool. Increase the pool size in SyncSettings.")]
    PoolExhausted {
        /// The pool that ran dry.
        resource: PooledResource,
    },
    /// A semaphore, fence or command buffer was driven through an illegal state transition.
    /// This is always a caller ordering bug.
    #[error("Synchronization protocol violation: {0}")]
    ProtocolViolation(&'static str),
    /// No queue was found for the requested queue type. Did you forget to enable it?
    #[error("No enabled queue of type {0:?}.")]
    NoCapableQueue(QueueType),
    /// Operation may only run on the owner thread (the thread that created the [`SyncHub`](crate::SyncHub)).
    #[error("`{0}` must be called from the owner thread.")]
    WrongThread(&'static str),
    /// Settings failed validation.
    #[error("Invalid sync settings: {0}")]
    InvalidSettings(&'static str),
    /// Poisoned mutex
    #[error("Poisoned mutex")]
    PoisonError,
    /// Uncategorized error.
    #[error("Uncategorized error: `{0}`")]
    Uncategorized(&'static str),
}

impl From<ash::vk::Result> for Error {
    fn from(value: ash::vk::Result) -> Self {
        Error::VkError(value)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}
