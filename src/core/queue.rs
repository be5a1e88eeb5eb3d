//! Queue topology as seen by the synchronization core.
//!
//! Queue selection and device creation happen outside this crate. The collaborator that created the device describes
//! which hardware queues it enabled through [`QueueFamilies`], and the core uses that to route submissions.

use ash::vk;

/// Abstraction over vulkan queue capabilities. Note that in raw Vulkan, there is no 'Graphics queue'. Quay will expose one, but behind the scenes the exposed
/// e.g. graphics queue and transfer could point to the same hardware queue.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Hash)]
pub enum QueueType {
    #[default]
    Graphics,
    Compute,
    Transfer,
    Present,
}

impl QueueType {
    /// Every queue type, in routing priority order.
    pub const ALL: [QueueType; 4] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer, QueueType::Present];
}

/// Stores all information of a queue that was found on the physical device.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
pub struct QueueInfo {
    /// Functionality that this queue provides.
    pub queue_type: QueueType,
    /// Whether the collaborator enabled and created this queue.
    pub enabled: bool,
    /// The queue family index.
    pub family_index: u32,
}

/// Per queue type family indices and enabled flags.
///
/// # Example
/// ```
/// # use quay::*;
/// // Graphics and present share family 0, uploads go through a dedicated transfer family.
/// let families = QueueFamilies::new(0)
///     .with_present(0)
///     .with_transfer(2);
/// assert!(families.independent_transfer());
/// assert_eq!(families.resolve(QueueType::Compute), QueueType::Graphics);
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct QueueFamilies {
    pub graphics: QueueInfo,
    pub compute: QueueInfo,
    pub transfer: QueueInfo,
    pub present: QueueInfo,
}

impl QueueFamilies {
    /// Topology with only a graphics queue on the given family.
    pub fn new(graphics_family: u32) -> Self {
        let disabled = |queue_type| QueueInfo {
            queue_type,
            enabled: false,
            family_index: graphics_family,
        };
        Self {
            graphics: QueueInfo {
                queue_type: QueueType::Graphics,
                enabled: true,
                family_index: graphics_family,
            },
            compute: disabled(QueueType::Compute),
            transfer: disabled(QueueType::Transfer),
            present: disabled(QueueType::Present),
        }
    }

    /// Enable a transfer queue on the given family.
    pub fn with_transfer(mut self, family: u32) -> Self {
        self.transfer = QueueInfo {
            queue_type: QueueType::Transfer,
            enabled: true,
            family_index: family,
        };
        self
    }

    /// Enable a compute queue on the given family.
    pub fn with_compute(mut self, family: u32) -> Self {
        self.compute = QueueInfo {
            queue_type: QueueType::Compute,
            enabled: true,
            family_index: family,
        };
        self
    }

    /// Enable a present queue on the given family.
    pub fn with_present(mut self, family: u32) -> Self {
        self.present = QueueInfo {
            queue_type: QueueType::Present,
            enabled: true,
            family_index: family,
        };
        self
    }

    /// Get the info for a queue type.
    pub fn info(&self, queue: QueueType) -> &QueueInfo {
        match queue {
            QueueType::Graphics => &self.graphics,
            QueueType::Compute => &self.compute,
            QueueType::Transfer => &self.transfer,
            QueueType::Present => &self.present,
        }
    }

    /// True if transfers can run on a hardware queue family separate from graphics. Only then do
    /// uploads need a queue family ownership transfer and a semaphore handoff back to graphics.
    pub fn independent_transfer(&self) -> bool {
        self.transfer.enabled && self.transfer.family_index != self.graphics.family_index
    }

    /// Map a requested queue type to the queue that actually executes it. Disabled queues fall back to graphics,
    /// which is guaranteed to support transfer and (for present) is the conventional present queue.
    pub fn resolve(&self, queue: QueueType) -> QueueType {
        match queue {
            QueueType::Graphics => QueueType::Graphics,
            QueueType::Transfer if self.independent_transfer() => QueueType::Transfer,
            QueueType::Compute | QueueType::Present if self.info(queue).enabled => queue,
            _ => QueueType::Graphics,
        }
    }

    /// Queue types that need their own command pools. Present never records commands.
    pub fn recording_queues(&self) -> Vec<QueueType> {
        let mut queues = vec![QueueType::Graphics];
        if self.independent_transfer() {
            queues.push(QueueType::Transfer);
        }
        if self.compute.enabled && self.compute.family_index != self.graphics.family_index {
            queues.push(QueueType::Compute);
        }
        queues
    }

    /// Family index of the queue that executes `queue`.
    pub fn family_of(&self, queue: QueueType) -> u32 {
        self.info(self.resolve(queue)).family_index
    }
}

/// Queue family to use in a barrier when no ownership transfer happens.
pub(crate) const IGNORED_FAMILY: u32 = vk::QUEUE_FAMILY_IGNORED;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_is_not_independent() {
        let families = QueueFamilies::new(0).with_transfer(0);
        assert!(!families.independent_transfer());
        assert_eq!(families.resolve(QueueType::Transfer), QueueType::Graphics);
        assert_eq!(families.recording_queues(), vec![QueueType::Graphics]);
    }

    #[test]
    fn dedicated_transfer_gets_its_own_pool() {
        let families = QueueFamilies::new(0).with_transfer(1).with_present(0);
        assert_eq!(families.resolve(QueueType::Transfer), QueueType::Transfer);
        assert_eq!(families.resolve(QueueType::Present), QueueType::Present);
        assert_eq!(families.family_of(QueueType::Transfer), 1);
        assert_eq!(families.recording_queues(), vec![QueueType::Graphics, QueueType::Transfer]);
    }
}
