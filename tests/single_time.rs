use std::sync::atomic::Ordering;

use anyhow::Result;
use futures::FutureExt;

use quay::{vk, Completion, DeviceEvent, Error, GraphicsPayload, QueueType, SubmitDescriptor, TransferPayload};

mod framework;

#[test]
pub fn worker_upload_goes_through_transfer_queue() -> Result<()> {
    let context = framework::make_transfer_context(Completion::Immediate)?;
    let image = framework::upload_image(1);
    let (staging, freed) = framework::TrackedStaging::new(256);

    let hub = context.hub.clone();
    let worker_image = image.clone();
    std::thread::spawn(move || -> Result<()> {
        let cmd = hub.begin_single_time_command()?;
        assert_eq!(cmd.queue(), QueueType::Transfer, "Worker uploads should use the transfer queue.");
        let payload = TransferPayload::new()
            .with_staging(staging)
            .with_image(worker_image);
        let ticket = hub.end_single_time_command_transfer(cmd, payload)?;
        assert!(ticket.is_complete(), "Worker uploads complete before returning.");
        Ok(())
    })
    .join()
    .unwrap()?;

    assert!(freed.load(Ordering::SeqCst), "Staging buffer should be freed.");
    assert!(image.is_ready());
    assert_eq!(image.current_layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    let submissions = context.device.submissions();
    assert_eq!(submissions.len(), 2);
    let (transfer_queue, transfer, _) = &submissions[0];
    let (graphics_queue, graphics, _) = &submissions[1];
    assert_eq!(*transfer_queue, QueueType::Transfer);
    assert_eq!(*graphics_queue, QueueType::Graphics);
    assert_eq!(transfer.signal_semaphores.len(), 1);
    assert_eq!(
        graphics.wait_semaphores, transfer.signal_semaphores,
        "Graphics follow-up must wait on the semaphore the transfer signaled."
    );

    let counts = context.hub.pool().idle_counts()?;
    assert_eq!(counts.semaphores, context.hub.settings().semaphore_count);
    assert_eq!(counts.transfer_fences, context.hub.settings().transfer_fence_count);
    assert_eq!(counts.graphics_fences, context.hub.settings().graphics_fence_count);
    Ok(())
}

#[test]
pub fn failed_follow_up_is_waited_on_by_the_next_frame() -> Result<()> {
    let context = framework::make_transfer_context(Completion::Immediate)?;
    let image = framework::upload_image(1);
    let (staging, freed) = framework::TrackedStaging::new(64);
    // The transfer submission goes through, its graphics follow-up fails.
    context
        .device
        .fail_submit_after(1, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

    let hub = context.hub.clone();
    let worker_image = image.clone();
    let err = std::thread::spawn(move || -> Result<()> {
        let cmd = hub.begin_single_time_command()?;
        let payload = TransferPayload::new()
            .with_staging(staging)
            .with_image(worker_image);
        hub.end_single_time_command_transfer(cmd, payload)?;
        Ok(())
    })
    .join()
    .unwrap()
    .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::VkError(vk::Result::ERROR_OUT_OF_HOST_MEMORY))));
    assert!(freed.load(Ordering::SeqCst), "The transfer completed, its staging buffer is freed.");
    assert!(!image.is_ready());
    assert_eq!(context.hub.pool().idle_counts()?.transfer_fences, context.hub.settings().transfer_fence_count);

    // The transfer signaled a semaphore nothing waited on. The next frame consumes it.
    context
        .hub
        .submit_graphics(SubmitDescriptor::default(), 0)?;
    let submissions = context.device.submissions();
    assert_eq!(submissions.len(), 2);
    let (_, transfer, _) = &submissions[0];
    let (_, frame, _) = &submissions[1];
    assert!(frame
        .wait_semaphores
        .contains(&transfer.signal_semaphores[0]));
    Ok(())
}

#[test]
pub fn ownership_transfer_barriers_are_recorded_on_both_queues() -> Result<()> {
    let context = framework::make_transfer_context(Completion::Immediate)?;
    let image = framework::upload_image(1);
    let hub = context.hub.clone();
    let worker_image = image.clone();
    std::thread::spawn(move || -> Result<()> {
        let cmd = hub.begin_single_time_command_transfer()?;
        hub.end_single_time_command_transfer(cmd, TransferPayload::new().with_image(worker_image))?;
        Ok(())
    })
    .join()
    .unwrap()?;

    let barriers = context
        .device
        .events()
        .into_iter()
        .filter_map(|event| match event {
            DeviceEvent::Barriers {
                barriers, ..
            } => Some(barriers),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(barriers.len(), 2);
    let (release, acquire) = (barriers[0][0], barriers[1][0]);
    assert_eq!((release.src_queue_family, release.dst_queue_family), (1, 0));
    assert_eq!((acquire.src_queue_family, acquire.dst_queue_family), (1, 0));
    assert_eq!(acquire.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    Ok(())
}

#[test]
pub fn owner_upload_is_handed_off_to_the_next_sweep() -> Result<()> {
    let context = framework::make_transfer_context(Completion::Manual)?;
    let hub = &context.hub;
    let image = framework::upload_image(1);
    let (staging, freed) = framework::TrackedStaging::new(64);

    let cmd = hub.begin_single_time_command_transfer()?;
    let payload = TransferPayload::new()
        .with_staging(staging)
        .with_image(image.clone());
    let ticket = hub.end_single_time_command_transfer(cmd, payload)?;
    assert_eq!(hub.pending_handoffs(), 1);
    assert!(!ticket.is_complete());

    // The follow-up is submitted, but nothing completed on the GPU yet.
    assert_eq!(hub.run_graphics_callbacks()?, 0);
    assert_eq!(hub.pending_handoffs(), 0);
    assert!(hub.check_fences_for_usage()?);
    assert!(!freed.load(Ordering::SeqCst), "Staging buffer must outlive the transfer.");
    assert!(!image.is_ready());

    context.device.complete_all();
    assert_eq!(hub.run_graphics_callbacks()?, 2);
    assert!(ticket.is_complete());
    assert!(freed.load(Ordering::SeqCst));
    assert!(image.is_ready());
    assert!(!hub.check_fences_for_usage()?);

    let submissions = context.device.submissions();
    let (_, transfer, _) = &submissions[0];
    let (_, follow_up, _) = &submissions[1];
    assert!(follow_up.wait_semaphores.contains(&transfer.signal_semaphores[0]));
    Ok(())
}

#[test]
pub fn ticket_completes_after_sweep() -> Result<()> {
    let context = framework::make_context(Completion::Manual)?;
    let hub = &context.hub;
    let cmd = hub.begin_single_time_command()?;
    let ticket = hub.end_single_time_command_graphics(cmd, GraphicsPayload::new())?;
    assert_eq!(ticket.clone().now_or_never(), None);

    context.device.complete_all();
    assert_eq!(hub.run_graphics_callbacks()?, 1);
    assert_eq!(ticket.now_or_never(), Some(()));
    Ok(())
}

#[test]
pub fn uploads_without_transfer_queue_generate_mipmaps_on_graphics() -> Result<()> {
    let context = framework::make_context(Completion::Immediate)?;
    let mipmapped = framework::upload_image(6);
    let flat = framework::upload_image(1);

    let hub = context.hub.clone();
    let images = (mipmapped.clone(), flat.clone());
    std::thread::spawn(move || -> Result<()> {
        let cmd = hub.begin_single_time_command_transfer()?;
        assert_eq!(cmd.queue(), QueueType::Graphics);
        let payload = TransferPayload::new().with_image(images.0).with_image(images.1);
        hub.end_single_time_command_transfer(cmd, payload)?;
        Ok(())
    })
    .join()
    .unwrap()?;

    let events = context.device.events();
    assert!(events.iter().any(|event| matches!(
        event,
        DeviceEvent::GenerateMipmaps { image, .. } if *image == mipmapped.handle()
    )));
    assert!(!events.iter().any(|event| matches!(
        event,
        DeviceEvent::GenerateMipmaps { image, .. } if *image == flat.handle()
    )));
    assert!(mipmapped.is_ready() && flat.is_ready());
    assert_eq!(context.device.submissions().len(), 1);
    Ok(())
}

#[test]
pub fn command_buffers_are_reset_before_reuse() -> Result<()> {
    let context = framework::make_context(Completion::Immediate)?;
    let hub = &context.hub;
    let cmd = hub.begin_single_time_command()?;
    let handle = unsafe { cmd.handle() };
    hub.end_single_time_command_graphics(cmd, GraphicsPayload::new())?;
    hub.run_graphics_callbacks()?;

    let events = context.device.events();
    assert!(events.contains(&DeviceEvent::ResetCommandBuffer(handle)));
    assert_eq!(hub.pool().idle_counts()?.command_buffers, hub.settings().command_buffers_per_pool);
    Ok(())
}
