#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use anyhow::Result;
use ash::vk;

use quay::{
    Completion, Exhaustion, FailurePolicy, HeadlessDevice, ImageResource, StagingBuffer, SyncHub, SyncSettingsBuilder,
};

static LOGGING: Once = Once::new();

pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = pretty_env_logger::try_init();
    });
}

#[derive(Debug)]
pub struct Context {
    pub hub: Arc<SyncHub>,
    pub device: Arc<HeadlessDevice>,
}

/// Creates a hub over a single queue headless device, ready for automated tests. Failures are returned instead of
/// aborting, and exhausted pools report an error after a few retries.
pub fn make_context(completion: Completion) -> Result<Context> {
    make_context_with_settings(HeadlessDevice::single_queue(completion), |settings| settings)
}

/// Creates a hub over a headless device with a dedicated transfer queue.
pub fn make_transfer_context(completion: Completion) -> Result<Context> {
    make_context_with_settings(HeadlessDevice::with_transfer_queue(completion), |settings| settings)
}

pub fn make_context_with_settings<F: FnOnce(SyncSettingsBuilder) -> SyncSettingsBuilder>(
    device: HeadlessDevice,
    callback: F,
) -> Result<Context> {
    init_logging();
    let device = Arc::new(device);
    let builder = SyncSettingsBuilder::new()
        .semaphores(16)
        .graphics_fences(8)
        .transfer_fences(8)
        .command_buffers_per_pool(8)
        .failure_policy(FailurePolicy::Propagate)
        .exhaustion(Exhaustion::Bounded {
            attempts: 4,
            sleep: std::time::Duration::from_micros(10),
        });
    let settings = callback(builder).build();
    let hub = Arc::new(SyncHub::new(device.clone(), settings)?);
    Ok(Context {
        hub,
        device,
    })
}

static NEXT_IMAGE: AtomicUsize = AtomicUsize::new(1);

/// An image that starts in `TRANSFER_DST_OPTIMAL` and should end up sampled.
pub fn upload_image(mip_levels: u32) -> Arc<ImageResource> {
    use ash::vk::Handle;
    let handle = vk::Image::from_raw(0x1000 + NEXT_IMAGE.fetch_add(1, Ordering::Relaxed) as u64);
    Arc::new(
        ImageResource::new(
            handle,
            vk::Extent3D {
                width: 512,
                height: 512,
                depth: 1,
            },
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .with_mipmaps(mip_levels),
    )
}

/// Staging buffer that records when it was freed.
#[derive(Debug)]
pub struct TrackedStaging {
    data: Vec<u8>,
    freed: Arc<AtomicBool>,
}

impl TrackedStaging {
    pub fn new(size: usize) -> (Box<dyn StagingBuffer>, Arc<AtomicBool>) {
        let freed = Arc::new(AtomicBool::new(false));
        let buffer = TrackedStaging {
            data: vec![0; size],
            freed: freed.clone(),
        };
        (Box::new(buffer), freed)
    }
}

impl StagingBuffer for TrackedStaging {
    fn map(&mut self) -> Result<&mut [u8]> {
        Ok(self.data.as_mut_slice())
    }

    fn unmap(&mut self) {}

    fn stage(&mut self, data: &[u8]) -> Result<()> {
        let len = data.len().min(self.data.len());
        self.data[..len].copy_from_slice(&data[..len]);
        Ok(())
    }

    fn free(&mut self) {
        assert!(!self.freed.swap(true, Ordering::SeqCst), "staging buffer freed twice");
        self.data = vec![];
    }
}
