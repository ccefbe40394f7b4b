use crate::gpu::{memory::*, GpuData};

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};
use log::info;

/// The offscreen color format. UNORM rather than SRGB: the readback bytes
/// must match the software reference exactly, with no transfer-function
/// surprises.
pub const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub unsafe fn get_depth_format(instance: &Instance, data: &GpuData) -> Result<vk::Format> {
    // Depth formats are characterized by their precision and the presence
    // of a stencil component; any of these will do for a plain depth
    // test, so take the first one supported with optimal tiling.
    let candidates = &[
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];

    candidates
        .iter()
        .cloned()
        .find(|&format| {
            let properties =
                instance.get_physical_device_format_properties(data.physical_device, format);
            properties
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| anyhow!("Failed to find supported depth format"))
}

/// The aspect flags matching a depth format, including stencil when the
/// format carries one.
pub fn depth_aspects(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

pub unsafe fn create_render_pass(device: &Device, data: &mut GpuData) -> Result<()> {
    // The render pass describes the two attachments every draw works
    // against. The color attachment is cleared on load (an empty batch
    // therefore still produces a clear-only frame), stored, and ends in
    // TRANSFER_SRC layout so the frame can be copied straight into the
    // host-visible readback buffer after the pass.
    let color_attachment = vk::AttachmentDescription::builder()
        .format(COLOR_FORMAT)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL);

    // The depth attachment is cleared on load as well; its contents are
    // not needed after the pass, so they are not stored.
    let depth_attachment = vk::AttachmentDescription::builder()
        .format(data.depth_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref);

    // Two implicit dependencies: one ordering the attachment clears
    // against whatever came before the pass, and one ordering the
    // readback copy after the color writes.
    let begin_dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let end_dependency = vk::SubpassDependency::builder()
        .src_subpass(0)
        .dst_subpass(vk::SUBPASS_EXTERNAL)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_access_mask(vk::AccessFlags::TRANSFER_READ);

    let attachments = &[color_attachment, depth_attachment];
    let subpasses = &[subpass];
    let dependencies = &[begin_dependency, end_dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    data.render_pass = device.create_render_pass(&info, None)?;

    info!("Render pass created.");
    Ok(())
}

/// Create the offscreen color and depth images, their views, and the
/// framebuffer tying them to the render pass, at the given size.
pub unsafe fn create_render_targets(
    instance: &Instance,
    device: &Device,
    data: &mut GpuData,
    width: u32,
    height: u32,
) -> Result<()> {
    let (color_image, color_image_memory) = create_image(
        instance,
        device,
        data,
        width,
        height,
        COLOR_FORMAT,
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
    )?;
    data.color_image = color_image;
    data.color_image_memory = color_image_memory;
    data.color_image_view = create_image_view(
        device,
        color_image,
        COLOR_FORMAT,
        vk::ImageAspectFlags::COLOR,
    )?;

    let (depth_image, depth_image_memory) = create_image(
        instance,
        device,
        data,
        width,
        height,
        data.depth_format,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    )?;
    data.depth_image = depth_image;
    data.depth_image_memory = depth_image_memory;
    data.depth_image_view = create_image_view(
        device,
        depth_image,
        data.depth_format,
        depth_aspects(data.depth_format),
    )?;

    let attachments = &[data.color_image_view, data.depth_image_view];
    let info = vk::FramebufferCreateInfo::builder()
        .render_pass(data.render_pass)
        .attachments(attachments)
        .width(width)
        .height(height)
        .layers(1);
    data.framebuffer = device.create_framebuffer(&info, None)?;

    data.width = width;
    data.height = height;

    info!("Render targets created at {width}x{height}.");
    Ok(())
}

pub unsafe fn destroy_render_targets(device: &Device, data: &mut GpuData) {
    device.destroy_framebuffer(data.framebuffer, None);
    device.destroy_image_view(data.color_image_view, None);
    device.destroy_image(data.color_image, None);
    device.free_memory(data.color_image_memory, None);
    device.destroy_image_view(data.depth_image_view, None);
    device.destroy_image(data.depth_image, None);
    device.free_memory(data.depth_image_memory, None);
}
