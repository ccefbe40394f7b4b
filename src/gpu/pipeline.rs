use crate::gpu::{shaders::*, GpuData};
use crate::regs::PipelineKey;
use crate::vertex::Vertex;

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use log::info;

/// The per-draw scalar state the fragment shader needs to reproduce the
/// software pipeline: mode words, chroma key, fog, color path and the
/// constant color, plus the dimensions the vertex shader divides by for
/// the NDC transform. Layout must match the WGSL push-constant struct
/// field for field.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PushConstants {
    pub width: f32,
    pub height: f32,
    pub fbz_mode: u32,
    pub alpha_mode: u32,
    pub chroma_key: u32,
    pub color_path: u32,
    pub fog_mode: u32,
    pub fog_color: u32,
    pub tex_enable: u32,
    pub constant_color: u32,
}

impl PushConstants {
    pub fn as_bytes(&self) -> &[u8] {
        // Plain scalars, no padding: the repr(C) layout is exactly the
        // bytes the shader expects.
        unsafe {
            std::slice::from_raw_parts(
                self as *const Self as *const u8,
                std::mem::size_of::<Self>(),
            )
        }
    }
}

pub unsafe fn create_descriptor_layout(device: &Device, data: &mut GpuData) -> Result<()> {
    // One descriptor set serves every draw: a sampler at binding 0 and
    // the current texture image at binding 1, both visible to the
    // fragment stage. The shader declares them as separate sampler and
    // texture objects, hence two bindings rather than a combined one.
    let sampler_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::SAMPLER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .build();

    let texture_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(1)
        .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .build();

    let bindings = [sampler_binding, texture_binding];
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    data.descriptor_set_layout = device.create_descriptor_set_layout(&info, None)?;

    // The pool only ever allocates this one set.
    let sizes = [
        vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::SAMPLER)
            .descriptor_count(1)
            .build(),
        vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(1)
            .build(),
    ];
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&sizes)
        .max_sets(1);
    data.descriptor_pool = device.create_descriptor_pool(&pool_info, None)?;

    let layouts = &[data.descriptor_set_layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(data.descriptor_pool)
        .set_layouts(layouts);
    data.descriptor_set = device.allocate_descriptor_sets(&alloc_info)?[0];

    info!("Descriptor set created.");
    Ok(())
}

pub unsafe fn create_pipeline_layout(device: &Device, data: &mut GpuData) -> Result<()> {
    // The push-constant block is shared by both stages; the vertex shader
    // reads the dimensions, the fragment shader everything else.
    let push_constant_range = vk::PushConstantRange::builder()
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(std::mem::size_of::<PushConstants>() as u32);

    let set_layouts = &[data.descriptor_set_layout];
    let push_constant_ranges = &[push_constant_range];
    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    data.pipeline_layout = device.create_pipeline_layout(&layout_info, None)?;

    info!("Pipeline layout created.");
    Ok(())
}

/// Build one fixed-function variant of the graphics pipeline. Everything
/// but the depth and blend state baked from the key is identical across
/// variants; viewport, scissor and blend constants are dynamic so a
/// resize or scissor change never invalidates the cache.
pub unsafe fn create_pipeline_variant(
    device: &Device,
    data: &GpuData,
    key: PipelineKey,
) -> Result<vk::Pipeline> {
    let binding_descriptions = &[Vertex::binding_description()];
    let attribute_descriptions = Vertex::attribute_descriptions();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(data.shader_module)
        .name(VERTEX_ENTRY);

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(data.shader_module)
        .name(FRAGMENT_ENTRY);

    // Viewport and scissor are set per draw; only their counts are baked.
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    // Culling is disabled: the engine normalizes winding but draws both
    // sides, like the original part.
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::_1);

    // A depth write with the test disabled still has to reach the depth
    // buffer, which fixed-function hardware only does when the test is
    // on; ALWAYS reproduces the reference behavior in that case.
    let (depth_test, depth_op) = if key.depth_test_enable {
        (true, key.depth_compare_op.to_vk())
    } else if key.depth_write_enable {
        (true, vk::CompareOp::ALWAYS)
    } else {
        (false, vk::CompareOp::ALWAYS)
    };
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(depth_test)
        .depth_write_enable(key.depth_write_enable)
        .depth_compare_op(depth_op)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::all())
        .blend_enable(key.blend_enable)
        .src_color_blend_factor(key.src_blend_factor.to_vk())
        .dst_color_blend_factor(key.dst_blend_factor.to_vk())
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(key.src_blend_factor.to_vk())
        .dst_alpha_blend_factor(key.dst_blend_factor.to_vk())
        .alpha_blend_op(vk::BlendOp::ADD);

    let attachments = &[attachment];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(attachments);

    let dynamic_states = &[
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::BLEND_CONSTANTS,
    ];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(dynamic_states);

    let stages = &[vert_stage, frag_stage];
    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(data.pipeline_layout)
        .render_pass(data.render_pass)
        .subpass(0)
        .base_pipeline_handle(vk::Pipeline::null())
        .base_pipeline_index(-1);

    let pipeline = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)?
        .0[0];

    info!("Pipeline variant created for {key:?}.");
    Ok(pipeline)
}
