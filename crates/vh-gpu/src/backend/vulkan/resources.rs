//! GPU objects owned by an initialized Vulkan backend
//!
//! Everything is created by [`GpuResources::create`]. A failure part way
//! through releases whatever was already built, so callers never see a
//! half-initialized set.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;

use vh_core::gpu_debug;

use super::device::GpuDevice;
use super::{GpuError, VkResultExt};
use crate::push_constants::PUSH_CONSTANT_SIZE;
use crate::shader::{ShaderBinaries, SpirVModule};
use crate::texture::TEXEL_SIZE;
use crate::vertex::{GpuVertex, MAX_BATCH_VERTICES};

pub(super) const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub(super) const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

pub(super) const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Image, its view and backing memory
#[derive(Default)]
pub(super) struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub width: u32,
    pub height: u32,
    allocation: Option<Allocation>,
}

impl GpuImage {
    fn create(
        device: &ash::Device,
        allocator: &mut Allocator,
        name: &str,
        extent: (u32, u32),
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self, GpuError> {
        let mut image = Self {
            width: extent.0,
            height: extent.1,
            ..Self::default()
        };
        if let Err(e) = image.build(device, allocator, name, format, usage, aspect) {
            image.destroy(device, allocator);
            return Err(e);
        }
        Ok(image)
    }

    fn build(
        &mut self,
        device: &ash::Device,
        allocator: &mut Allocator,
        name: &str,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<(), GpuError> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: all handles below belong to `device`
        unsafe {
            self.image = device.create_image(&info, None).step("vkCreateImage")?;
            let requirements = device.get_image_memory_requirements(self.image);
            let allocation = allocator.allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;
            let bound = device.bind_image_memory(self.image, allocation.memory(), allocation.offset());
            self.allocation = Some(allocation);
            bound.step("vkBindImageMemory")?;

            let view_info = vk::ImageViewCreateInfo::default()
                .image(self.image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    ..COLOR_RANGE
                });
            self.view = device.create_image_view(&view_info, None).step("vkCreateImageView")?;
        }
        Ok(())
    }

    fn destroy(&mut self, device: &ash::Device, allocator: &mut Allocator) {
        // SAFETY: the caller guarantees the GPU no longer uses the image
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = allocator.free(allocation) {
                tracing::warn!("Failed to free image memory: {e}");
            }
        }
        *self = Self::default();
    }
}

/// Host-visible buffer
#[derive(Default)]
pub(super) struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,
    allocation: Option<Allocation>,
}

impl GpuBuffer {
    fn create(
        device: &ash::Device,
        allocator: &mut Allocator,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self, GpuError> {
        let mut buffer = Self {
            size,
            ..Self::default()
        };
        if let Err(e) = buffer.build(device, allocator, name, usage, location) {
            buffer.destroy(device, allocator);
            return Err(e);
        }
        Ok(buffer)
    }

    fn build(
        &mut self,
        device: &ash::Device,
        allocator: &mut Allocator,
        name: &str,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<(), GpuError> {
        let info = vk::BufferCreateInfo::default()
            .size(self.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        // SAFETY: all handles below belong to `device`
        unsafe {
            self.buffer = device.create_buffer(&info, None).step("vkCreateBuffer")?;
            let requirements = device.get_buffer_memory_requirements(self.buffer);
            let allocation = allocator.allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;
            let bound = device.bind_buffer_memory(self.buffer, allocation.memory(), allocation.offset());
            self.allocation = Some(allocation);
            bound.step("vkBindBufferMemory")?;
        }
        Ok(())
    }

    /// Copy `bytes` to the start of the mapped buffer
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), GpuError> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or(GpuError::Unmapped)?;
        let dst = mapped.get_mut(..bytes.len()).ok_or(GpuError::Unmapped)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Mapped contents
    pub fn contents(&self) -> Result<&[u8], GpuError> {
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .ok_or(GpuError::Unmapped)?;
        mapped.get(..self.size as usize).ok_or(GpuError::Unmapped)
    }

    fn destroy(&mut self, device: &ash::Device, allocator: &mut Allocator) {
        // SAFETY: the caller guarantees the GPU no longer uses the buffer
        unsafe { device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = allocator.free(allocation) {
                tracing::warn!("Failed to free buffer memory: {e}");
            }
        }
        *self = Self::default();
    }
}

/// Render targets, buffers, descriptors and command objects for one backend
pub(super) struct GpuResources {
    pub width: u32,
    pub height: u32,
    allocator: Option<Allocator>,
    pub color: GpuImage,
    pub depth: GpuImage,
    /// Clears both attachments on load
    pub clear_pass: vk::RenderPass,
    /// Preserves previous contents
    pub load_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    /// Fragment stage writes a second blend source and the device can consume it
    pub dual_source: bool,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_pool: vk::DescriptorPool,
    pub descriptor_set: vk::DescriptorSet,
    pub sampler: vk::Sampler,
    pub texture: GpuImage,
    pub texture_staging: GpuBuffer,
    pub vertex_buffer: GpuBuffer,
    pub readback: GpuBuffer,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled whenever no submission is in flight
    pub fence: vk::Fence,
}

impl GpuResources {
    fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            allocator: None,
            color: GpuImage::default(),
            depth: GpuImage::default(),
            clear_pass: vk::RenderPass::null(),
            load_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            vertex_shader: vk::ShaderModule::null(),
            fragment_shader: vk::ShaderModule::null(),
            dual_source: false,
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            sampler: vk::Sampler::null(),
            texture: GpuImage::default(),
            texture_staging: GpuBuffer::default(),
            vertex_buffer: GpuBuffer::default(),
            readback: GpuBuffer::default(),
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
        }
    }

    /// Build every object and upload a 1x1 white placeholder texture
    pub fn create(gpu: &GpuDevice, shaders: &ShaderBinaries, width: u32, height: u32) -> Result<Self, GpuError> {
        let mut res = Self::empty(width, height);
        if let Err(e) = res.build(gpu, shaders) {
            tracing::warn!("GPU resource creation failed, releasing partial set: {e}");
            res.destroy(gpu);
            return Err(e);
        }
        gpu_debug!(width, height, "GPU resources created");
        Ok(res)
    }

    fn build(&mut self, gpu: &GpuDevice, shaders: &ShaderBinaries) -> Result<(), GpuError> {
        let device = &gpu.device;
        let allocator = self.allocator.insert(Allocator::new(&AllocatorCreateDesc {
            instance: gpu.instance.clone(),
            device: device.clone(),
            physical_device: gpu.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?);

        let extent = (self.width, self.height);
        self.color = GpuImage::create(
            device,
            allocator,
            "color target",
            extent,
            COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        )?;
        self.depth = GpuImage::create(
            device,
            allocator,
            "depth target",
            extent,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;

        self.vertex_buffer = GpuBuffer::create(
            device,
            allocator,
            "vertex buffer",
            (MAX_BATCH_VERTICES * GpuVertex::STRIDE as usize) as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        self.readback = GpuBuffer::create(
            device,
            allocator,
            "readback",
            self.width as u64 * self.height as u64 * TEXEL_SIZE as u64,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        )?;

        // SAFETY: every handle created here belongs to `device` and is recorded in
        // `self` immediately, so `destroy` can release it on a later failure
        unsafe {
            self.clear_pass = create_render_pass(device, true)?;
            self.load_pass = create_render_pass(device, false)?;

            let attachments = [self.color.view, self.depth.view];
            let fb_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.clear_pass)
                .attachments(&attachments)
                .width(self.width)
                .height(self.height)
                .layers(1);
            self.framebuffer = device.create_framebuffer(&fb_info, None).step("vkCreateFramebuffer")?;

            self.vertex_shader = create_shader_module(device, &shaders.vertex)?;
            let (fragment, dual_source) = shaders.fragment_for(gpu.dual_source_blend);
            self.fragment_shader = create_shader_module(device, fragment)?;
            self.dual_source = dual_source;

            let binding = vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT);
            let dsl_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(std::slice::from_ref(&binding));
            self.descriptor_set_layout = device
                .create_descriptor_set_layout(&dsl_info, None)
                .step("vkCreateDescriptorSetLayout")?;

            let push_range = vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .offset(0)
                .size(PUSH_CONSTANT_SIZE as u32);
            let set_layouts = [self.descriptor_set_layout];
            let layout_info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&set_layouts)
                .push_constant_ranges(std::slice::from_ref(&push_range));
            self.pipeline_layout = device
                .create_pipeline_layout(&layout_info, None)
                .step("vkCreatePipelineLayout")?;

            let pool_size = vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
            };
            let pool_info = vk::DescriptorPoolCreateInfo::default()
                .max_sets(1)
                .pool_sizes(std::slice::from_ref(&pool_size));
            self.descriptor_pool = device
                .create_descriptor_pool(&pool_info, None)
                .step("vkCreateDescriptorPool")?;
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(self.descriptor_pool)
                .set_layouts(&set_layouts);
            self.descriptor_set = device
                .allocate_descriptor_sets(&alloc_info)
                .step("vkAllocateDescriptorSets")?[0];

            let sampler_info = vk::SamplerCreateInfo::default()
                .mag_filter(vk::Filter::NEAREST)
                .min_filter(vk::Filter::NEAREST)
                .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .max_lod(0.0);
            self.sampler = device.create_sampler(&sampler_info, None).step("vkCreateSampler")?;

            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(gpu.queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            self.command_pool = device.create_command_pool(&pool_info, None).step("vkCreateCommandPool")?;
            let cb_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            self.command_buffer = device
                .allocate_command_buffers(&cb_info)
                .step("vkAllocateCommandBuffers")?[0];

            let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            self.fence = device.create_fence(&fence_info, None).step("vkCreateFence")?;
        }

        self.upload_texture(gpu, &[0xFF; TEXEL_SIZE], 1, 1)
    }

    /// Replace the sampled image when the texture dimensions change
    pub(super) fn ensure_texture_storage(&mut self, device: &ash::Device, width: u32, height: u32) -> Result<(), GpuError> {
        if self.texture.image != vk::Image::null() && self.texture.width == width && self.texture.height == height {
            return Ok(());
        }
        let allocator = self.allocator.as_mut().ok_or(GpuError::Uninitialized)?;
        self.texture.destroy(device, allocator);
        self.texture_staging.destroy(device, allocator);

        self.texture = GpuImage::create(
            device,
            allocator,
            "texture",
            (width, height),
            COLOR_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        self.texture_staging = GpuBuffer::create(
            device,
            allocator,
            "texture staging",
            width as u64 * height as u64 * TEXEL_SIZE as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        gpu_debug!(width, height, "texture storage recreated");
        Ok(())
    }

    /// Release everything in reverse creation order. The device must be idle.
    pub fn destroy(&mut self, gpu: &GpuDevice) {
        gpu.wait_idle();
        let device = &gpu.device;
        // SAFETY: the device is idle and null handles are ignored by vkDestroy*
        unsafe {
            device.destroy_fence(self.fence, None);
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_sampler(self.sampler, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            device.destroy_shader_module(self.fragment_shader, None);
            device.destroy_shader_module(self.vertex_shader, None);
            device.destroy_framebuffer(self.framebuffer, None);
            device.destroy_render_pass(self.load_pass, None);
            device.destroy_render_pass(self.clear_pass, None);
        }
        if let Some(allocator) = self.allocator.as_mut() {
            self.texture_staging.destroy(device, allocator);
            self.texture.destroy(device, allocator);
            self.readback.destroy(device, allocator);
            self.vertex_buffer.destroy(device, allocator);
            self.depth.destroy(device, allocator);
            self.color.destroy(device, allocator);
        }
        *self = Self::empty(self.width, self.height);
    }
}

/// Render pass over the color and depth targets. Both variants end with
/// color in TRANSFER_SRC_OPTIMAL so readback needs no extra transition.
unsafe fn create_render_pass(device: &ash::Device, clear: bool) -> Result<vk::RenderPass, GpuError> {
    let (load_op, color_initial, depth_initial) = if clear {
        (
            vk::AttachmentLoadOp::CLEAR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::UNDEFINED,
        )
    } else {
        (
            vk::AttachmentLoadOp::LOAD,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
    };

    let attachments = [
        vk::AttachmentDescription::default()
            .format(COLOR_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(color_initial)
            .final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
        vk::AttachmentDescription::default()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(depth_initial)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];
    let color_ref = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref)
        .depth_stencil_attachment(&depth_ref);

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_access = vk::AccessFlags::COLOR_ATTACHMENT_READ
        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages | vk::PipelineStageFlags::TRANSFER)
            .dst_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_access_mask(attachment_access),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ),
    ];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(&dependencies);
    device.create_render_pass(&info, None).step("vkCreateRenderPass")
}

unsafe fn create_shader_module(device: &ash::Device, module: &SpirVModule) -> Result<vk::ShaderModule, GpuError> {
    let info = vk::ShaderModuleCreateInfo::default().code(&module.words);
    device.create_shader_module(&info, None).step("vkCreateShaderModule")
}
