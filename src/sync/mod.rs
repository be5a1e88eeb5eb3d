//! The sync module holds everything that orders GPU work: pooled primitives, the payloads they keep alive, and
//! the [`SyncHub`](hub::SyncHub) tying them together.
//!
//! - The [`fence`] module provides a wrapper around pooled `VkFence` objects, used for CPU-GPU sync.
//! - The [`semaphore`] module provides a wrapper around pooled binary `VkSemaphore` objects, used for GPU-GPU sync,
//! together with the state machine that keeps them from being waited on twice.
//! - [`payload`] holds the resources a submission keeps alive until its fence signals.
//! - [`pool`] owns every pooled object and hands them out to any thread.
//! - [`render_sync`] holds the per frame-in-flight fences and semaphores.
//! - [`handoff`] queues the graphics side of transfer queue uploads.
//! - [`ticket`] provides a [`Future`](std::future::Future) for single-time submissions.
//! - [`hub`] is the entry point for all of the above.

pub mod fence;
pub mod handoff;
pub mod hub;
pub mod payload;
pub mod pool;
pub mod render_sync;
pub mod retry;
pub mod semaphore;
pub mod ticket;
