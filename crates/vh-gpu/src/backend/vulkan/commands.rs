//! Command recording and submission
//!
//! All work goes through the single command buffer and fence. Every
//! submission waits for the fence, records, then resets the fence right
//! before submitting with it, so at rest the fence is either signaled or
//! guarding exactly one batch.

use ash::vk;

use vh_core::error::RenderError;

use super::device::GpuDevice;
use super::resources::{GpuResources, COLOR_RANGE};
use super::{GpuError, VkResultExt};
use crate::push_constants::PUSH_CONSTANT_SIZE;
use crate::texture::TEXEL_SIZE;
use crate::vertex::GpuVertex;

/// How a render pass starts
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum PassLoad {
    /// Clear color and depth to these values
    Clear { color: [f32; 4], depth: f32 },
    /// Keep what is already in the targets
    Load,
}

/// One recorded draw
pub(super) struct DrawCall<'a> {
    pub pipeline: vk::Pipeline,
    pub scissor: vk::Rect2D,
    pub push_constants: [u8; PUSH_CONSTANT_SIZE],
    pub vertices: &'a [GpuVertex],
}

impl GpuResources {
    fn wait_fence(&self, device: &ash::Device) -> Result<(), GpuError> {
        // SAFETY: the fence belongs to `device`
        unsafe { device.wait_for_fences(&[self.fence], true, u64::MAX) }.step("vkWaitForFences")
    }

    /// Reset and begin the command buffer for a one-shot recording
    unsafe fn begin(&self, device: &ash::Device) -> Result<vk::CommandBuffer, GpuError> {
        let cmd = self.command_buffer;
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .step("vkResetCommandBuffer")?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(cmd, &begin_info).step("vkBeginCommandBuffer")?;
        Ok(cmd)
    }

    unsafe fn submit(&self, gpu: &GpuDevice, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        gpu.device.end_command_buffer(cmd).step("vkEndCommandBuffer")?;
        gpu.device.reset_fences(&[self.fence]).step("vkResetFences")?;
        let cmds = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmds);
        gpu.device
            .queue_submit(gpu.queue, std::slice::from_ref(&submit_info), self.fence)
            .step("vkQueueSubmit")
    }

    /// Record one render pass, optionally drawing, and submit it
    pub fn render_pass(&mut self, gpu: &GpuDevice, load: PassLoad, draw: Option<DrawCall<'_>>) -> Result<(), GpuError> {
        let device = &gpu.device;
        self.wait_fence(device)?;
        if let Some(draw) = &draw {
            self.vertex_buffer.write(bytemuck::cast_slice(draw.vertices))?;
        }

        let (render_pass, clear_values) = match load {
            PassLoad::Clear { color, depth } => (
                self.clear_pass,
                [
                    vk::ClearValue {
                        color: vk::ClearColorValue { float32: color },
                    },
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                    },
                ],
            ),
            PassLoad::Load => (self.load_pass, [vk::ClearValue::default(); 2]),
        };
        let area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: self.width,
                height: self.height,
            },
        };

        // SAFETY: the fence wait above guarantees the command buffer is idle
        unsafe {
            let cmd = self.begin(device)?;
            let pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(render_pass)
                .framebuffer(self.framebuffer)
                .render_area(area)
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);

            if let Some(draw) = draw.filter(|d| !d.vertices.is_empty()) {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
                device.cmd_set_scissor(cmd, 0, &[draw.scissor]);
                device.cmd_push_constants(
                    cmd,
                    self.pipeline_layout,
                    vk::ShaderStageFlags::FRAGMENT,
                    0,
                    &draw.push_constants,
                );
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline_layout,
                    0,
                    &[self.descriptor_set],
                    &[],
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
                device.cmd_draw(cmd, draw.vertices.len() as u32, 1, 0, 0);
            }

            device.cmd_end_render_pass(cmd);
            self.submit(gpu, cmd)
        }
    }

    /// Copy the color target into `out` as tightly packed RGBA8 rows
    pub fn read_back(&mut self, gpu: &GpuDevice, out: &mut Vec<u8>) -> Result<(), GpuError> {
        let device = &gpu.device;
        self.wait_fence(device)?;

        // SAFETY: the fence wait above guarantees the command buffer is idle
        unsafe {
            let cmd = self.begin(device)?;
            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: self.width,
                    height: self.height,
                    depth: 1,
                });
            device.cmd_copy_image_to_buffer(
                cmd,
                self.color.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.readback.buffer,
                &[region],
            );

            let to_host = vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(self.readback.buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                std::slice::from_ref(&to_host),
                &[],
            );
            self.submit(gpu, cmd)?;
        }
        self.wait_fence(device)?;

        let pixels = self.readback.contents()?;
        out.clear();
        out.extend_from_slice(pixels);
        Ok(())
    }

    /// Upload RGBA8 texels and point the descriptor at them
    pub fn upload_texture(&mut self, gpu: &GpuDevice, pixels: &[u8], width: u32, height: u32) -> Result<(), GpuError> {
        let device = &gpu.device;
        // Storage may be recreated below, so nothing may still be sampling it
        self.wait_fence(device)?;
        self.ensure_texture_storage(device, width, height)?;
        let expected = width as usize * height as usize * TEXEL_SIZE;
        let texels = pixels.get(..expected).ok_or(RenderError::TextureSizeMismatch {
            expected,
            actual: pixels.len(),
        })?;
        self.texture_staging.write(texels)?;

        // SAFETY: the fence wait above guarantees the command buffer is idle
        unsafe {
            let cmd = self.begin(device)?;
            let to_transfer = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.texture.image)
                .subresource_range(COLOR_RANGE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_transfer),
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D { width, height, depth: 1 });
            device.cmd_copy_buffer_to_image(
                cmd,
                self.texture_staging.buffer,
                self.texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_shader = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.texture.image)
                .subresource_range(COLOR_RANGE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_shader),
            );
            self.submit(gpu, cmd)?;
        }
        self.wait_fence(device)?;

        let image_info = vk::DescriptorImageInfo::default()
            .sampler(self.sampler)
            .image_view(self.texture.view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&image_info));
        // SAFETY: the set is not referenced by any pending submission
        unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
        Ok(())
    }
}
