use anyhow::Result;

use quay::{vk, Completion, DeviceEvent, Error, GraphicsPayload, HeadlessDevice, PresentDescriptor, PresentStatus, SemaphoreStatus, SubmitDescriptor};

mod framework;

fn frame(context: &framework::Context, image_index: u32) -> Result<PresentStatus> {
    context.hub.run_graphics_callbacks()?;
    context
        .hub
        .submit_graphics(SubmitDescriptor::default(), image_index)?;
    context.hub.present(PresentDescriptor {
        image_index,
        ..Default::default()
    })
}

#[test]
pub fn frame_slots_wait_before_reuse() -> Result<()> {
    let context = framework::make_context_with_settings(HeadlessDevice::single_queue(Completion::Manual), |settings| {
        settings.frames_in_flight(2).swapchain_images(3)
    })?;
    for i in 0..6 {
        assert_eq!(frame(&context, i % 3)?, PresentStatus::Optimal);
    }

    // Between two submissions signaling the same fence, that fence must have been waited on and reset.
    let events = context.device.events();
    let submits = events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| match event {
            DeviceEvent::Submit {
                fence, ..
            } => Some((index, *fence)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(submits.len(), 6);
    for (position, &(index, fence)) in submits.iter().enumerate() {
        let Some(&(previous, _)) = submits[..position]
            .iter()
            .rev()
            .find(|(_, other)| *other == fence)
        else {
            continue;
        };
        let between = &events[previous + 1..index];
        let wait = between
            .iter()
            .position(|event| *event == DeviceEvent::WaitFence(fence))
            .expect("Frame fence should be waited on before its slot is reused.");
        let reset = between
            .iter()
            .position(|event| *event == DeviceEvent::ResetFence(fence))
            .expect("Frame fence should be reset before its slot is reused.");
        assert!(wait < reset);
    }
    Ok(())
}

#[test]
pub fn frame_uses_its_own_semaphores() -> Result<()> {
    let context = framework::make_context(Completion::Immediate)?;
    let hub = &context.hub;
    let image_available = hub.image_available_semaphore()?;
    let render_finished = hub.render_finished_semaphore()?;
    frame(&context, 0)?;
    assert_ne!(hub.image_available_semaphore()?, image_available);

    let submissions = context.device.submissions();
    let (_, submit, _) = &submissions[0];
    assert_eq!(submit.wait_semaphores, [image_available]);
    assert_eq!(submit.wait_stages, [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]);
    assert_eq!(submit.signal_semaphores, [render_finished]);
    Ok(())
}

#[test]
pub fn frame_semaphores_are_held_until_the_slot_is_reused() -> Result<()> {
    let context = framework::make_context_with_settings(HeadlessDevice::single_queue(Completion::Manual), |settings| {
        settings.frames_in_flight(2)
    })?;
    let hub = &context.hub;

    let extra = hub.frame_signal_semaphore()?;
    let (_, signals) = hub.frame_semaphore_data()?;
    let id = signals[0];
    hub.submit_graphics(SubmitDescriptor::default(), 0)?;
    assert_eq!(hub.pool().semaphore_status(id)?, SemaphoreStatus::Signaling);
    hub.present(PresentDescriptor::default())?;
    assert_eq!(hub.pool().semaphore_status(id)?, SemaphoreStatus::Waiting);

    let presents = context
        .device
        .events()
        .into_iter()
        .filter_map(|event| match event {
            DeviceEvent::Present(present) => Some(present),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert!(presents[0].wait_semaphores.contains(&extra));

    // The next frame uses the other slot, the semaphore is still referenced.
    frame(&context, 1)?;
    assert_eq!(hub.pool().semaphore_status(id)?, SemaphoreStatus::Waiting);

    // Back to the first slot: its fence is waited on, then its semaphores are returned.
    hub.submit_graphics(SubmitDescriptor::default(), 2)?;
    assert_eq!(hub.pool().semaphore_status(id)?, SemaphoreStatus::Idle);
    hub.present(PresentDescriptor::default())?;
    Ok(())
}

#[test]
pub fn frame_waits_on_single_time_submissions() -> Result<()> {
    let context = framework::make_context(Completion::Manual)?;
    let hub = &context.hub;
    for _ in 0..3 {
        let cmd = hub.begin_single_time_command()?;
        hub.end_single_time_command_graphics(cmd, GraphicsPayload::new())?;
    }
    frame(&context, 0)?;

    let submissions = context.device.submissions();
    let (_, last_upload, _) = &submissions[2];
    let (_, frame_submit, _) = &submissions[3];
    assert!(frame_submit
        .wait_semaphores
        .contains(&last_upload.signal_semaphores[0]));
    assert_eq!(frame_submit.wait_stages[1], vk::PipelineStageFlags::ALL_COMMANDS);
    Ok(())
}

#[test]
pub fn failed_frame_submission_does_not_block_the_next_frame() -> Result<()> {
    let context = framework::make_context_with_settings(HeadlessDevice::single_queue(Completion::Manual), |settings| {
        settings.frames_in_flight(1)
    })?;
    let hub = &context.hub;
    hub.frame_signal_semaphore()?;
    context
        .device
        .fail_next_submit(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    let err = hub
        .submit_graphics(SubmitDescriptor::default(), 0)
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::VkError(vk::Result::ERROR_OUT_OF_HOST_MEMORY))));
    assert_eq!(hub.frame_semaphore_data()?, (vec![], vec![]));
    assert_eq!(hub.pool().idle_counts()?.semaphores, hub.settings().semaphore_count);

    // The slot fence was reset but never submitted. Waiting on it would never return.
    hub.submit_graphics(SubmitDescriptor::default(), 0)?;
    hub.present(PresentDescriptor::default())?;
    Ok(())
}

#[test]
pub fn failed_frame_submission_keeps_waiting_on_uploads() -> Result<()> {
    let context = framework::make_context(Completion::Immediate)?;
    let hub = &context.hub;
    let cmd = hub.begin_single_time_command()?;
    hub.end_single_time_command_graphics(cmd, GraphicsPayload::new())?;

    context
        .device
        .fail_next_submit(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    assert!(hub
        .submit_graphics(SubmitDescriptor::default(), 0)
        .is_err());
    let (waits, signals) = hub.frame_semaphore_data()?;
    assert_eq!(waits.len(), 1);
    assert!(signals.is_empty());
    assert_eq!(hub.pool().semaphore_status(waits[0])?, SemaphoreStatus::Signaling);

    hub.submit_graphics(SubmitDescriptor::default(), 0)?;
    let submissions = context.device.submissions();
    let (_, upload, _) = &submissions[0];
    let (_, frame_submit, _) = &submissions[1];
    assert!(frame_submit
        .wait_semaphores
        .contains(&upload.signal_semaphores[0]));
    assert_eq!(hub.pool().semaphore_status(waits[0])?, SemaphoreStatus::Waiting);
    hub.present(PresentDescriptor::default())?;
    Ok(())
}

#[test]
pub fn present_is_owner_only() -> Result<()> {
    let context = framework::make_context(Completion::Immediate)?;
    let hub = context.hub.clone();
    let err = std::thread::spawn(move || {
        hub.present(PresentDescriptor::default())
            .map_err(|err| err.to_string())
    })
    .join()
    .unwrap()
    .unwrap_err();
    assert!(err.contains("owner thread"));
    Ok(())
}
