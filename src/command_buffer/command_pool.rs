use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use anyhow::Result;
use ash::vk;

use crate::command_buffer::CommandState;
use crate::core::device::DeviceContext;
use crate::core::queue::QueueType;
use crate::Error;

#[derive(Debug)]
struct CommandSlot {
    handle: vk::CommandBuffer,
    state: CommandState,
}

/// A native command pool with a fixed set of single-time command buffers. Command buffers are affine to the thread
/// that owns their pool, so a pool is only ever recorded from by a single thread.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandPool {
    #[derivative(Debug = "ignore")]
    device: Arc<dyn DeviceContext>,
    handle: vk::CommandPool,
    queue: QueueType,
    thread: ThreadId,
    slots: Mutex<Vec<CommandSlot>>,
}

impl CommandPool {
    /// Create a pool for `queue` owned by `thread`, holding `count` command buffers.
    pub fn new(device: Arc<dyn DeviceContext>, queue: QueueType, thread: ThreadId, count: usize) -> Result<Self> {
        let handle = device.create_command_pool(queue)?;
        let buffers = match device.allocate_command_buffers(handle, count as u32) {
            Ok(buffers) => buffers,
            Err(err) => {
                device.destroy_command_pool(handle);
                return Err(err.into());
            }
        };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkCommandPool {handle:?} for {queue:?} on thread {thread:?}");

        Ok(CommandPool {
            device,
            handle,
            queue,
            thread,
            slots: Mutex::new(
                buffers
                    .into_iter()
                    .map(|handle| CommandSlot {
                        handle,
                        state: CommandState::Idle,
                    })
                    .collect(),
            ),
        })
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// The thread allowed to record into and reclaim this pool's command buffers.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Find an idle command buffer and move it to `Recording`. Returns `None` if all are in use.
    pub(crate) fn try_acquire(&self) -> Result<Option<(usize, vk::CommandBuffer)>> {
        let mut slots = self.slots.lock().map_err(|_| Error::PoisonError)?;
        let Some((index, slot)) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.state == CommandState::Idle)
        else {
            return Ok(None);
        };
        slot.state = CommandState::Recording;
        Ok(Some((index, slot.handle)))
    }

    /// Move the command buffer at `index` from `from` to `to`.
    pub(crate) fn transition(&self, index: usize, from: CommandState, to: CommandState) -> Result<()> {
        let mut slots = self.slots.lock().map_err(|_| Error::PoisonError)?;
        let slot = slots
            .get_mut(index)
            .ok_or(Error::Uncategorized("command buffer index out of range"))?;
        if slot.state != from {
            return Err(Error::ProtocolViolation("command buffer is not in the expected state").into());
        }
        slot.state = to;
        Ok(())
    }

    /// Reset the command buffer at `index` and return it to the idle set.
    pub(crate) fn release(&self, index: usize) -> Result<()> {
        if std::thread::current().id() != self.thread {
            return Err(Error::WrongThread("command buffer reclamation").into());
        }
        let handle = {
            let mut slots = self.slots.lock().map_err(|_| Error::PoisonError)?;
            let slot = slots
                .get_mut(index)
                .ok_or(Error::Uncategorized("command buffer index out of range"))?;
            if slot.state == CommandState::Idle {
                return Err(Error::ProtocolViolation("command buffer released twice").into());
            }
            slot.state = CommandState::Reclaiming;
            slot.handle
        };
        let reset = self.device.reset_command_buffer(handle);
        let mut slots = self.slots.lock().map_err(|_| Error::PoisonError)?;
        slots[index].state = CommandState::Idle;
        reset?;
        Ok(())
    }

    pub(crate) fn state(&self, index: usize) -> Result<CommandState> {
        let slots = self.slots.lock().map_err(|_| Error::PoisonError)?;
        slots
            .get(index)
            .map(|slot| slot.state)
            .ok_or_else(|| Error::Uncategorized("command buffer index out of range").into())
    }

    /// Number of command buffers that are not recording, submitted or being reclaimed.
    pub fn idle_count(&self) -> Result<usize> {
        let slots = self.slots.lock().map_err(|_| Error::PoisonError)?;
        Ok(slots
            .iter()
            .filter(|slot| slot.state == CommandState::Idle)
            .count())
    }

    pub fn capacity(&self) -> Result<usize> {
        Ok(self.slots.lock().map_err(|_| Error::PoisonError)?.len())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkCommandPool {:?}", self.handle);
        self.device.destroy_command_pool(self.handle);
    }
}
