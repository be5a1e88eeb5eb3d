//! Bounded-retry primitives for pool exhaustion and worker-side completion waits.
//!
//! Pools are sized once and never grow. Running out of semaphores, fences or command buffers means the pool is
//! undersized for the workload, so the default policy fails loudly in debug builds. Release builds keep the
//! frame alive by spinning until another submission returns an object to the pool.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use anyhow::Result;

use crate::Error;

/// The pool an acquisition was made from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PooledResource {
    Semaphore,
    GraphicsFence,
    TransferFence,
    CommandBuffer,
}

impl Display for PooledResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PooledResource::Semaphore => "semaphore",
            PooledResource::GraphicsFence => "graphics fence",
            PooledResource::TransferFence => "transfer fence",
            PooledResource::CommandBuffer => "command buffer",
        };
        f.write_str(name)
    }
}

/// Policy applied when a pool scan finds no idle object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exhaustion {
    /// Panic on the first failed scan. Debug default.
    Panic,
    /// Sleep and rescan until an object is returned. Release default. This has no upper bound.
    Spin { sleep: Duration },
    /// Rescan `attempts` more times, then return [`Error::PoolExhausted`].
    Bounded { attempts: u32, sleep: Duration },
}

impl Default for Exhaustion {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Exhaustion::Panic
        } else {
            Exhaustion::Spin {
                sleep: Duration::from_micros(1),
            }
        }
    }
}

impl Exhaustion {
    /// Call `scan` until it yields an object, applying this policy between failed scans.
    pub fn acquire<T>(&self, resource: PooledResource, mut scan: impl FnMut() -> Result<Option<T>>) -> Result<T> {
        let mut retries = 0u32;
        loop {
            if let Some(value) = scan()? {
                if retries > 0 {
                    debug!("Acquired {resource} after {retries} retries");
                }
                return Ok(value);
            }
            match *self {
                Exhaustion::Panic => {
                    panic!("{resource} pool exhausted. Pools are fixed size, increase the {resource} count in SyncSettings.")
                }
                Exhaustion::Spin {
                    sleep,
                } => {
                    if retries == 0 {
                        warn!("{resource} pool exhausted, stalling until one is returned");
                    }
                    std::thread::sleep(sleep);
                }
                Exhaustion::Bounded {
                    attempts,
                    sleep,
                } => {
                    if retries >= attempts {
                        return Err(Error::PoolExhausted {
                            resource,
                        }
                        .into());
                    }
                    std::thread::sleep(sleep);
                }
            }
            retries += 1;
        }
    }
}

/// How a worker thread waits for its own single-time submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerWait {
    /// Poll the fence with a zero timeout, sleeping `interval` between polls.
    Poll { interval: Duration },
    /// Block on the fence with an unbounded timeout. Never used on the owner thread.
    Block,
}

impl Default for WorkerWait {
    fn default() -> Self {
        WorkerWait::Poll {
            interval: Duration::from_micros(50),
        }
    }
}
