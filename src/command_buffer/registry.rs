//! Thread-keyed registry of command pools.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use anyhow::Result;

use crate::command_buffer::command_pool::CommandPool;
use crate::command_buffer::CommandLease;
use crate::core::device::DeviceContext;
use crate::core::queue::QueueType;
use crate::sync::retry::{Exhaustion, PooledResource};
use crate::Error;

/// One command pool per recording queue, all owned by a single thread.
#[derive(Debug)]
pub struct ThreadPoolSet {
    thread: ThreadId,
    pools: HashMap<QueueType, Arc<CommandPool>>,
}

impl ThreadPoolSet {
    fn new(device: &Arc<dyn DeviceContext>, thread: ThreadId, count: usize) -> Result<Self> {
        let pools = device
            .queue_families()
            .recording_queues()
            .into_iter()
            .map(|queue| -> Result<(QueueType, Arc<CommandPool>)> {
                Ok((queue, Arc::new(CommandPool::new(device.clone(), queue, thread, count)?)))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self {
            thread,
            pools,
        })
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Pool recording for `queue`, which must already be resolved to the queue that executes it.
    pub fn pool(&self, queue: QueueType) -> Result<&Arc<CommandPool>> {
        self.pools
            .get(&queue)
            .ok_or_else(|| Error::NoCapableQueue(queue).into())
    }

    /// Idle command buffers over all pools of this set.
    pub fn idle_count(&self) -> Result<usize> {
        self.pools
            .values()
            .map(|pool| pool.idle_count())
            .sum()
    }

    fn is_idle(&self) -> Result<bool> {
        for pool in self.pools.values() {
            if pool.idle_count()? != pool.capacity()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Per-thread command pools. The owner thread has a reserved set created up front, every other thread gets its set
/// on first use.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ThreadCommandPools {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn DeviceContext>,
    buffers_per_pool: usize,
    main: Arc<ThreadPoolSet>,
    threads: Mutex<HashMap<ThreadId, Arc<ThreadPoolSet>>>,
}

impl ThreadCommandPools {
    /// Create the registry, with the reserved set for `owner`.
    pub fn new(device: Arc<dyn DeviceContext>, owner: ThreadId, buffers_per_pool: usize) -> Result<Self> {
        let main = Arc::new(ThreadPoolSet::new(&device, owner, buffers_per_pool)?);
        Ok(Self {
            device,
            buffers_per_pool,
            main,
            threads: Mutex::new(HashMap::new()),
        })
    }

    /// Look up the pool set of `thread`, creating it if this thread never recorded a command before.
    pub fn get_or_create(&self, thread: ThreadId) -> Result<Arc<ThreadPoolSet>> {
        if thread == self.main.thread {
            return Ok(self.main.clone());
        }
        let mut threads = self.threads.lock().map_err(|_| Error::PoisonError)?;
        if let Some(set) = threads.get(&thread) {
            return Ok(set.clone());
        }
        let set = Arc::new(ThreadPoolSet::new(&self.device, thread, self.buffers_per_pool)?);
        debug!("Created command pools for thread {thread:?}");
        threads.insert(thread, set.clone());
        Ok(set)
    }

    /// Look up the pool set of `thread` without creating one.
    pub fn get(&self, thread: ThreadId) -> Result<Option<Arc<ThreadPoolSet>>> {
        if thread == self.main.thread {
            return Ok(Some(self.main.clone()));
        }
        let threads = self.threads.lock().map_err(|_| Error::PoisonError)?;
        Ok(threads.get(&thread).cloned())
    }

    /// Lease an idle command buffer for `queue` from the calling thread's pool. When the pool is empty, `reclaim` is
    /// given a chance to return buffers before `exhaustion` applies. It returns true if it reclaimed anything.
    pub fn acquire(
        &self,
        queue: QueueType,
        exhaustion: &Exhaustion,
        mut reclaim: impl FnMut() -> Result<bool>,
    ) -> Result<CommandLease> {
        let queue = self.device.queue_families().resolve(queue);
        let set = self.get_or_create(std::thread::current().id())?;
        let pool = set.pool(queue)?.clone();
        let try_lease = |pool: &Arc<CommandPool>| -> Result<Option<CommandLease>> {
            Ok(pool
                .try_acquire()?
                .map(|(index, handle)| CommandLease::new(pool.clone(), index, handle)))
        };
        exhaustion.acquire(PooledResource::CommandBuffer, || match try_lease(&pool)? {
            Some(lease) => Ok(Some(lease)),
            None if reclaim()? => try_lease(&pool),
            None => Ok(None),
        })
    }

    /// Destroy the pools of a worker thread that stopped recording. Fails if any of its command buffers is still in use.
    /// Returns `false` if the thread never recorded a command.
    pub fn retire_thread(&self, thread: ThreadId) -> Result<bool> {
        if thread == self.main.thread {
            return Err(Error::ProtocolViolation("the owner thread's command pools live as long as the hub").into());
        }
        let mut threads = self.threads.lock().map_err(|_| Error::PoisonError)?;
        let Some(set) = threads.get(&thread) else {
            return Ok(false);
        };
        if !set.is_idle()? {
            return Err(Error::ProtocolViolation("retired a thread with command buffers in flight").into());
        }
        threads.remove(&thread);
        debug!("Retired command pools of thread {thread:?}");
        Ok(true)
    }

    /// Number of worker threads with live command pools.
    pub fn thread_count(&self) -> Result<usize> {
        Ok(self.threads.lock().map_err(|_| Error::PoisonError)?.len())
    }
}
