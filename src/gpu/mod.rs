//! GPU rasterizer backend.
//!
//! Mirrors the software reference on an offscreen Vulkan device: the
//! engine's batches render into a color+depth image pair, the fragment
//! shader reproduces the per-pixel pipeline from push constants, and the
//! finished frame is copied into a host-visible buffer for the triple
//! buffer to publish. Fixed-function depth and blend state is baked into
//! pipeline variants cached by [`PipelineKey`]; variants are built on
//! demand and never evicted while the backend lives.

pub mod commands;
pub mod devices;
pub mod memory;
pub mod pipeline;
pub mod queues;
pub mod shaders;
pub mod target;
pub mod texture;

use std::collections::HashMap;
use std::ptr::copy_nonoverlapping as memcpy;

use anyhow::{anyhow, Result};
use log::info;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::ExtDebugUtilsExtension;

use crate::backend::{
    ChromaKey, FogState, PipelineState, Rasterizer, Scissor, WrapMode, MAX_BATCH, MAX_HEIGHT,
    MAX_WIDTH,
};
use crate::regs::{ColorCombine, FbzMode, PipelineKey};
use crate::vertex::{Triangle, Vertex};

use self::pipeline::PushConstants;

/// Raw handles and sizes for every Vulkan object the backend owns,
/// mutated by the `create_*` functions in the submodules.
#[derive(Default)]
pub struct GpuData {
    pub debug_messenger: vk::DebugUtilsMessengerEXT,
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,

    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,

    pub vertex_buffer: vk::Buffer,
    pub vertex_buffer_memory: vk::DeviceMemory,
    pub readback_buffer: vk::Buffer,
    pub readback_buffer_memory: vk::DeviceMemory,

    pub depth_format: vk::Format,
    pub color_image: vk::Image,
    pub color_image_memory: vk::DeviceMemory,
    pub color_image_view: vk::ImageView,
    pub depth_image: vk::Image,
    pub depth_image_memory: vk::DeviceMemory,
    pub depth_image_view: vk::ImageView,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,

    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub descriptor_pool: vk::DescriptorPool,
    pub descriptor_set: vk::DescriptorSet,
    pub sampler: vk::Sampler,
    pub texture_image: vk::Image,
    pub texture_image_memory: vk::DeviceMemory,
    pub texture_image_view: vk::ImageView,

    pub shader_module: vk::ShaderModule,
    pub pipeline_layout: vk::PipelineLayout,

    pub width: u32,
    pub height: u32,
}

pub struct GpuRasterizer {
    _entry: Entry,
    instance: Instance,
    device: Device,
    data: GpuData,

    /// Lazily populated pipeline-variant cache. Never evicted; all
    /// variants are destroyed together at teardown.
    pipelines: HashMap<PipelineKey, vk::Pipeline>,
    current_key: PipelineKey,

    // Mirror of the engine-pushed raster state, forwarded to the shader
    // as push constants each draw.
    state: PipelineState,
    scissor: Scissor,
    chroma: ChromaKey,
    fog: FogState,
    combine: ColorCombine,
    constant_color: [f32; 4],
    texture_enabled: bool,
    clear_color: [f32; 4],
    clear_depth: f32,

    /// Host copies of the last rendered and last published frames.
    back: Vec<u8>,
    front: Vec<u8>,
    destroyed: bool,
}

impl GpuRasterizer {
    /// Bring up the whole offscreen device. Any failure here is reported
    /// to the engine, which falls back to the software reference.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        unsafe {
            let entry = devices::load_entry()?;
            let mut data = GpuData::default();
            let instance = devices::create_instance(&entry, &mut data)?;

            let (device, pipelines) =
                match Self::create_device(&entry, &instance, &mut data, width, height) {
                    Ok(pair) => pair,
                    Err(error) => {
                        if devices::VALIDATION_ENABLED {
                            instance
                                .destroy_debug_utils_messenger_ext(data.debug_messenger, None);
                        }
                        instance.destroy_instance(None);
                        return Err(error);
                    }
                };
            let baseline = PipelineKey::default();

            info!("GPU rasterizer created at {width}x{height}.");
            Ok(Self {
                _entry: entry,
                instance,
                device,
                data,
                pipelines,
                current_key: baseline,
                state: PipelineState::default(),
                scissor: Scissor::default(),
                chroma: ChromaKey::default(),
                fog: FogState::default(),
                combine: ColorCombine::resolve(None),
                constant_color: [0.0; 4],
                texture_enabled: false,
                clear_color: [0.0, 0.0, 0.0, 1.0],
                clear_depth: 1.0,
                back: vec![0u8; (width * height * 4) as usize],
                front: vec![0u8; (width * height * 4) as usize],
                destroyed: false,
            })
        }
    }

    /// Pick a device, create the logical device and every resource,
    /// including the baseline pipeline variant (the default key: LESS, no
    /// blending). Cleans up the device on failure so only the instance is
    /// left for the caller to release.
    unsafe fn create_device(
        entry: &Entry,
        instance: &Instance,
        data: &mut GpuData,
        width: u32,
        height: u32,
    ) -> Result<(Device, HashMap<PipelineKey, vk::Pipeline>)> {
        devices::pick_physical_device(instance, data)?;
        let device = devices::create_logical_device(entry, instance, data)?;

        if let Err(error) = Self::create_resources(instance, &device, data, width, height) {
            device.destroy_device(None);
            return Err(error);
        }

        let baseline = PipelineKey::default();
        match pipeline::create_pipeline_variant(&device, data, baseline) {
            Ok(p) => {
                let mut pipelines = HashMap::new();
                pipelines.insert(baseline, p);
                Ok((device, pipelines))
            }
            Err(error) => {
                Self::destroy_resources(&device, data);
                device.destroy_device(None);
                Err(error)
            }
        }
    }

    unsafe fn create_resources(
        instance: &Instance,
        device: &Device,
        data: &mut GpuData,
        width: u32,
        height: u32,
    ) -> Result<()> {
        commands::create_command_objects(device, data)?;

        // A host-visible vertex buffer sized to the batch bound, mapped
        // and filled on every flush.
        let vertex_size = (MAX_BATCH * 3 * std::mem::size_of::<Vertex>()) as u64;
        let (vertex_buffer, vertex_buffer_memory) = memory::create_buffer(
            instance,
            device,
            data,
            vertex_size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        data.vertex_buffer = vertex_buffer;
        data.vertex_buffer_memory = vertex_buffer_memory;

        // The readback buffer is allocated at the dimension cap so a
        // resize never has to touch it.
        let readback_size = (MAX_WIDTH * MAX_HEIGHT * 4) as u64;
        let (readback_buffer, readback_buffer_memory) = memory::create_buffer(
            instance,
            device,
            data,
            readback_size,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        data.readback_buffer = readback_buffer;
        data.readback_buffer_memory = readback_buffer_memory;

        let spirv = shaders::compile_shaders()?;
        data.shader_module = shaders::create_shader_module(device, &spirv)?;

        pipeline::create_descriptor_layout(device, data)?;
        pipeline::create_pipeline_layout(device, data)?;

        data.depth_format = target::get_depth_format(instance, data)?;
        target::create_render_pass(device, data)?;
        target::create_render_targets(instance, device, data, width, height)?;

        texture::create_sampler(device, data, WrapMode::Repeat, WrapMode::Repeat)?;
        // A 1x1 opaque white default keeps the descriptor set valid (and
        // doubles as the stand-in for unsupported formats).
        texture::upload_texture(instance, device, data, 1, 1, &[0xFF, 0xFF, 0xFF, 0xFF])?;

        Ok(())
    }

    unsafe fn destroy_resources(device: &Device, data: &mut GpuData) {
        target::destroy_render_targets(device, data);
        device.destroy_render_pass(data.render_pass, None);

        if data.texture_image_view != vk::ImageView::null() {
            device.destroy_image_view(data.texture_image_view, None);
            device.destroy_image(data.texture_image, None);
            device.free_memory(data.texture_image_memory, None);
        }
        device.destroy_sampler(data.sampler, None);

        device.destroy_pipeline_layout(data.pipeline_layout, None);
        device.destroy_descriptor_pool(data.descriptor_pool, None);
        device.destroy_descriptor_set_layout(data.descriptor_set_layout, None);
        device.destroy_shader_module(data.shader_module, None);

        device.destroy_buffer(data.vertex_buffer, None);
        device.free_memory(data.vertex_buffer_memory, None);
        device.destroy_buffer(data.readback_buffer, None);
        device.free_memory(data.readback_buffer_memory, None);

        device.destroy_fence(data.fence, None);
        device.destroy_command_pool(data.command_pool, None);
    }

    /// The pipeline for the current key, building the variant on first
    /// use.
    unsafe fn variant(&mut self) -> Result<vk::Pipeline> {
        if let Some(&pipeline) = self.pipelines.get(&self.current_key) {
            return Ok(pipeline);
        }
        let pipeline = pipeline::create_pipeline_variant(&self.device, &self.data, self.current_key)?;
        self.pipelines.insert(self.current_key, pipeline);
        Ok(pipeline)
    }

    fn push_constants(&self) -> PushConstants {
        let pack_rgb = |rgb: [u8; 3]| {
            ((rgb[0] as u32) << 16) | ((rgb[1] as u32) << 8) | rgb[2] as u32
        };
        let pack_rgba = |rgba: [f32; 4]| {
            let b = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u32;
            (b(rgba[3]) << 24) | (b(rgba[0]) << 16) | (b(rgba[1]) << 8) | b(rgba[2])
        };
        let fog_rgb = [
            (self.fog.color[0] * 255.0).round() as u8,
            (self.fog.color[1] * 255.0).round() as u8,
            (self.fog.color[2] * 255.0).round() as u8,
        ];
        PushConstants {
            width: self.data.width as f32,
            height: self.data.height as f32,
            fbz_mode: self.state.fbz_mode,
            alpha_mode: self.state.alpha_mode,
            chroma_key: pack_rgb(self.chroma.rgb),
            color_path: self.combine.to_bits(),
            fog_mode: if self.fog.enabled { 1 } else { 0 },
            fog_color: pack_rgb(fog_rgb),
            tex_enable: if self.texture_enabled { 1 } else { 0 },
            constant_color: pack_rgba(self.constant_color),
        }
    }

    /// Record, submit and wait out one frame, then read the color image
    /// back into the host-side back buffer. The blocking wait is the
    /// synchronization point `SWAP_BUFFER_CMD` relies on.
    fn render(&mut self, triangles: &[Triangle]) -> Result<()> {
        let pipeline = unsafe { self.variant() }?;
        let device = &self.device;
        let data = &self.data;
        let count = triangles.len().min(MAX_BATCH);

        unsafe {
            // Fill the vertex buffer from the batch.
            if count > 0 {
                let size = (count * 3 * std::mem::size_of::<Vertex>()) as u64;
                let memory = device.map_memory(
                    data.vertex_buffer_memory,
                    0,
                    size,
                    vk::MemoryMapFlags::empty(),
                )?;
                memcpy(
                    triangles.as_ptr() as *const u8,
                    memory.cast(),
                    size as usize,
                );
                device.unmap_memory(data.vertex_buffer_memory);
            }

            device.reset_command_buffer(
                data.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?;
            let inheritance = vk::CommandBufferInheritanceInfo::builder();
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
                .inheritance_info(&inheritance);
            device.begin_command_buffer(data.command_buffer, &begin_info)?;

            // The render pass clears color to the fast-fill color and
            // depth to the value the active compare expects.
            let render_area = vk::Rect2D::builder()
                .offset(vk::Offset2D::default())
                .extent(vk::Extent2D {
                    width: data.width,
                    height: data.height,
                });
            let clear_values = &[
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: self.clear_color,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: self.clear_depth,
                        stencil: 0,
                    },
                },
            ];
            let pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(data.render_pass)
                .framebuffer(data.framebuffer)
                .render_area(render_area)
                .clear_values(clear_values);

            device.cmd_begin_render_pass(
                data.command_buffer,
                &pass_info,
                vk::SubpassContents::INLINE,
            );
            device.cmd_bind_pipeline(
                data.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );

            let viewport = vk::Viewport::builder()
                .x(0.0)
                .y(0.0)
                .width(data.width as f32)
                .height(data.height as f32)
                .min_depth(0.0)
                .max_depth(1.0);
            device.cmd_set_viewport(data.command_buffer, 0, &[viewport]);

            // The guest scissor applies only when clipping is enabled in
            // fbzMode; otherwise the full target is drawable.
            let scissor = if FbzMode(self.state.fbz_mode).clipping() {
                let left = self.scissor.left.min(data.width);
                let top = self.scissor.top.min(data.height);
                let right = (self.scissor.right + 1).min(data.width);
                let bottom = (self.scissor.bottom + 1).min(data.height);
                vk::Rect2D {
                    offset: vk::Offset2D {
                        x: left as i32,
                        y: top as i32,
                    },
                    extent: vk::Extent2D {
                        width: right.saturating_sub(left),
                        height: bottom.saturating_sub(top),
                    },
                }
            } else {
                vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: vk::Extent2D {
                        width: data.width,
                        height: data.height,
                    },
                }
            };
            device.cmd_set_scissor(data.command_buffer, 0, &[scissor]);
            device.cmd_set_blend_constants(data.command_buffer, self.constant_color);

            device.cmd_bind_descriptor_sets(
                data.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                data.pipeline_layout,
                0,
                &[data.descriptor_set],
                &[],
            );
            device.cmd_bind_vertex_buffers(data.command_buffer, 0, &[data.vertex_buffer], &[0]);

            let constants = self.push_constants();
            device.cmd_push_constants(
                data.command_buffer,
                data.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                constants.as_bytes(),
            );

            if count > 0 {
                device.cmd_draw(data.command_buffer, (count * 3) as u32, 1, 0, 0);
            }
            device.cmd_end_render_pass(data.command_buffer);

            // The color attachment is in TRANSFER_SRC layout now; copy it
            // into the host-visible readback buffer in the same
            // submission.
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
                .image_offset(vk::Offset3D::default())
                .image_extent(vk::Extent3D {
                    width: data.width,
                    height: data.height,
                    depth: 1,
                });
            device.cmd_copy_image_to_buffer(
                data.command_buffer,
                data.color_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                data.readback_buffer,
                &[region],
            );

            device.end_command_buffer(data.command_buffer)?;

            let command_buffers = &[data.command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(command_buffers);
            device.queue_submit(data.graphics_queue, &[submit_info], data.fence)?;
            device.wait_for_fences(&[data.fence], true, u64::MAX)?;
            device.reset_fences(&[data.fence])?;

            // Read the finished frame back.
            let size = (data.width * data.height * 4) as u64;
            let memory =
                device.map_memory(data.readback_buffer_memory, 0, size, vk::MemoryMapFlags::empty())?;
            self.back.resize(size as usize, 0);
            memcpy(memory.cast::<u8>(), self.back.as_mut_ptr(), size as usize);
            device.unmap_memory(data.readback_buffer_memory);
        }

        Ok(())
    }
}

impl Rasterizer for GpuRasterizer {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width > MAX_WIDTH || height > MAX_HEIGHT {
            return Err(anyhow!("dimensions {width}x{height} exceed the device cap"));
        }
        unsafe {
            self.device.device_wait_idle()?;
            target::destroy_render_targets(&self.device, &mut self.data);
            target::create_render_targets(&self.instance, &self.device, &mut self.data, width, height)?;
        }
        self.back = vec![0u8; (width * height * 4) as usize];
        self.front = vec![0u8; (width * height * 4) as usize];
        Ok(())
    }

    fn update_pipeline_state(&mut self, state: &PipelineState) -> Result<()> {
        self.state = *state;
        self.current_key = state.key;
        // Resolve the variant eagerly so a pipeline-compile failure
        // surfaces at state-update time, not mid-frame.
        unsafe { self.variant() }?;
        Ok(())
    }

    fn set_scissor(&mut self, scissor: Scissor) {
        self.scissor = scissor;
    }

    fn set_chroma_key(&mut self, key: ChromaKey) {
        self.chroma = key;
    }

    fn set_texture_data(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
        unsafe {
            texture::upload_texture(
                &self.instance,
                &self.device,
                &mut self.data,
                width,
                height,
                pixels,
            )
        }
    }

    fn set_texture_enabled(&mut self, enabled: bool) {
        self.texture_enabled = enabled;
    }

    fn set_texture_wrap_mode(&mut self, wrap_s: WrapMode, wrap_t: WrapMode) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
            self.device.destroy_sampler(self.data.sampler, None);
            texture::create_sampler(&self.device, &mut self.data, wrap_s, wrap_t)?;
            texture::update_descriptor_set(&self.device, &self.data);
        }
        Ok(())
    }

    fn set_color_path(&mut self, combine: ColorCombine) {
        self.combine = combine;
    }

    fn set_fog_state(&mut self, fog: FogState) {
        self.fog = fog;
    }

    fn set_constant_color(&mut self, rgba: [f32; 4]) {
        self.constant_color = rgba;
    }

    fn flush_triangles(&mut self, triangles: &[Triangle]) -> Result<()> {
        self.render(triangles)
    }

    fn clear_framebuffer(&mut self, color: [f32; 4], depth: f32) -> Result<()> {
        self.clear_color = color;
        self.clear_depth = depth;
        // Render an empty batch so the back buffer holds the cleared
        // frame immediately, like the software reference.
        self.render(&[])
    }

    fn swap_buffers(&mut self) -> Result<()> {
        std::mem::swap(&mut self.front, &mut self.back);
        Ok(())
    }

    fn frame(&self) -> &[u8] {
        &self.front
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        unsafe {
            let _ = self.device.device_wait_idle();
            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
            }
            Self::destroy_resources(&self.device, &mut self.data);
            self.device.destroy_device(None);
            if devices::VALIDATION_ENABLED {
                self.instance
                    .destroy_debug_utils_messenger_ext(self.data.debug_messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("GPU rasterizer destroyed.");
    }
}

impl Drop for GpuRasterizer {
    fn drop(&mut self) {
        self.destroy();
    }
}
