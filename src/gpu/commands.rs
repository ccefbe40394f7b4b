use crate::gpu::GpuData;

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use log::info;

pub unsafe fn create_command_objects(device: &Device, data: &mut GpuData) -> Result<()> {
    // All GPU commands go through command buffers allocated from a pool.
    // One primary buffer is enough: rendering is a blocking call from the
    // engine's point of view, so the buffer is re-recorded for every
    // flush, which requires the RESET_COMMAND_BUFFER pool flag.
    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(data.graphics_queue_family);

    data.command_pool = device.create_command_pool(&info, None)?;

    let allocate_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(data.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    data.command_buffer = device.allocate_command_buffers(&allocate_info)?[0];

    // The fence inserts a dependency between the queue and the host: the
    // engine submits the frame's commands and waits on it before reading
    // the frame back. Created unsignaled; every submit/wait pair resets
    // it.
    let fence_info = vk::FenceCreateInfo::builder();
    data.fence = device.create_fence(&fence_info, None)?;

    info!("Command objects created.");
    Ok(())
}

pub unsafe fn begin_single_command_batch(
    device: &Device,
    data: &GpuData,
) -> Result<vk::CommandBuffer> {
    // Allocate and begin a temporary command buffer for a one-shot batch
    // of commands (texture staging, layout transitions).
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(data.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffer = device.allocate_command_buffers(&alloc_info)?[0];

    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    device.begin_command_buffer(command_buffer, &begin_info)?;

    Ok(command_buffer)
}

pub unsafe fn end_single_command_batch(
    device: &Device,
    data: &GpuData,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    // End the buffer, submit it, and wait for the queue to drain before
    // freeing it. These batches are rare (texture uploads), so waiting on
    // the queue instead of juggling another fence keeps them simple.
    device.end_command_buffer(command_buffer)?;

    let command_buffers = &[command_buffer];
    let submit_info = vk::SubmitInfo::builder().command_buffers(command_buffers);

    device.queue_submit(data.graphics_queue, &[submit_info], vk::Fence::null())?;
    device.queue_wait_idle(data.graphics_queue)?;

    device.free_command_buffers(data.command_pool, command_buffers);

    Ok(())
}
