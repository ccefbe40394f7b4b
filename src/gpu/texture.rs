use crate::backend::WrapMode;
use crate::gpu::{
    commands::{begin_single_command_batch, end_single_command_batch},
    memory::*,
    GpuData,
};

use std::ptr::copy_nonoverlapping as memcpy;

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};
use log::info;

fn address_mode(mode: WrapMode) -> vk::SamplerAddressMode {
    match mode {
        WrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
        WrapMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

pub unsafe fn create_sampler(
    device: &Device,
    data: &mut GpuData,
    wrap_s: WrapMode,
    wrap_t: WrapMode,
) -> Result<()> {
    // Nearest-neighbor sampling, matching the software reference; the
    // per-axis address modes carry the clamp/repeat flags from
    // `textureMode`. There are no mipmaps, so the LOD range is pinned to
    // level zero.
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::NEAREST)
        .min_filter(vk::Filter::NEAREST)
        .address_mode_u(address_mode(wrap_s))
        .address_mode_v(address_mode(wrap_t))
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(false)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    data.sampler = device.create_sampler(&info, None)?;

    Ok(())
}

/// Upload tightly packed RGBA8 pixels as the current texture, replacing
/// whatever was bound before. The pixels are staged through a host-visible
/// buffer and copied on the queue, with the usual layout transitions
/// around the copy.
pub unsafe fn upload_texture(
    instance: &Instance,
    device: &Device,
    data: &mut GpuData,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<()> {
    let size = (width * height * 4) as u64;
    if pixels.len() as u64 != size {
        return Err(anyhow!("texture data size mismatch"));
    }

    // Stage the pixels in host memory.
    let (staging_buffer, staging_memory) = create_buffer(
        instance,
        device,
        data,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let memory = device.map_memory(staging_memory, 0, size, vk::MemoryMapFlags::empty())?;
    memcpy(pixels.as_ptr(), memory.cast(), pixels.len());
    device.unmap_memory(staging_memory);

    // The replacement image; the old one is destroyed only after the
    // queue has drained, which end_single_command_batch guarantees.
    let (texture_image, texture_image_memory) = create_image(
        instance,
        device,
        data,
        width,
        height,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
    )?;

    // Transition to the transfer layout, copy, and transition to the
    // shader-read layout, all in one one-shot batch.
    let command_buffer = begin_single_command_batch(device, data)?;

    transition_image_layout(
        device,
        command_buffer,
        texture_image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;

    let subresource = vk::ImageSubresourceLayers::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);

    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(subresource)
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });

    device.cmd_copy_buffer_to_image(
        command_buffer,
        staging_buffer,
        texture_image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
    );

    transition_image_layout(
        device,
        command_buffer,
        texture_image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;

    end_single_command_batch(device, data, command_buffer)?;

    device.destroy_buffer(staging_buffer, None);
    device.free_memory(staging_memory, None);

    // Retire the previous texture and its view.
    if data.texture_image_view != vk::ImageView::null() {
        device.destroy_image_view(data.texture_image_view, None);
        device.destroy_image(data.texture_image, None);
        device.free_memory(data.texture_image_memory, None);
    }

    data.texture_image = texture_image;
    data.texture_image_memory = texture_image_memory;
    data.texture_image_view = create_image_view(
        device,
        texture_image,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageAspectFlags::COLOR,
    )?;

    update_descriptor_set(device, data);

    info!("Texture uploaded at {width}x{height}.");
    Ok(())
}

/// Record an image memory barrier performing a layout transition. Only the
/// transitions the texture path needs are supported.
pub unsafe fn transition_image_layout(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    // A pipeline barrier synchronizes access to a resource; an image
    // memory barrier additionally changes the image's layout. The access
    // and stage masks depend on which sides of the transition we are on:
    // nothing has touched an UNDEFINED image yet, transfer writes happen
    // in the TRANSFER pseudo-stage, and sampling happens in the fragment
    // shader.
    let (src_access_mask, dst_access_mask, src_stage_mask, dst_stage_mask) =
        match (old_layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            _ => return Err(anyhow!("Unsupported layout transition!")),
        };

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask);

    device.cmd_pipeline_barrier(
        command_buffer,
        src_stage_mask,
        dst_stage_mask,
        vk::DependencyFlags::empty(),
        &[] as &[vk::MemoryBarrier],
        &[] as &[vk::BufferMemoryBarrier],
        &[barrier],
    );

    Ok(())
}

/// Point the descriptor set at the current sampler and texture view.
pub unsafe fn update_descriptor_set(device: &Device, data: &GpuData) {
    let sampler_info = vk::DescriptorImageInfo::builder().sampler(data.sampler);
    let image_info = vk::DescriptorImageInfo::builder()
        .image_view(data.texture_image_view)
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    let sampler_infos = &[sampler_info];
    let sampler_write = vk::WriteDescriptorSet::builder()
        .dst_set(data.descriptor_set)
        .dst_binding(0)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::SAMPLER)
        .image_info(sampler_infos);

    let image_infos = &[image_info];
    let image_write = vk::WriteDescriptorSet::builder()
        .dst_set(data.descriptor_set)
        .dst_binding(1)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
        .image_info(image_infos);

    device.update_descriptor_sets(
        &[sampler_write, image_write],
        &[] as &[vk::CopyDescriptorSet],
    );
}
