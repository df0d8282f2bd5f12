//! Vulkan backend
//!
//! Renders through a cached pipeline variant per fixed-function key, with
//! per-fragment state pushed as constants. Register state lives in an
//! embedded [`Rasterizer`] either way: while the GPU is up it is only a
//! state mirror, and if Vulkan cannot be brought up at init it renders
//! every frame itself.
//!
//! Lifecycle: `Uninitialized -> Initializing -> Ready | ReadyFallback -> Destroyed`.

mod commands;
mod device;
mod library;
mod pipelines;
mod resources;

use std::sync::Arc;

use ash::vk;
use parking_lot::RwLock;
use thiserror::Error;

use vh_core::error::{RenderError, Result};
use vh_core::{gpu_debug, gpu_trace};

use super::{FramebufferData, RenderBackend};
use crate::cache::{CacheStats, PipelineVariantCache};
use crate::pipeline::PipelineKey;
use crate::raster::{Rasterizer, RenderState, Scissor};
use crate::regs::{self, FbzMode};
use crate::shader::ShaderBinaries;
use crate::texture::TEXEL_SIZE;
use crate::vertex::{convert_batch, GpuVertex, Triangle, MAX_BATCH_TRIANGLES, MAX_BATCH_VERTICES};

use commands::{DrawCall, PassLoad};
use device::GpuDevice;
use pipelines::VkPipelineFactory;
use resources::GpuResources;

pub use library::{probe_vulkan, AdapterInfo, VulkanLibrary};

/// Far depth on the GPU, where the depth attachment is normalized
pub const GPU_DEPTH_FAR: f32 = 1.0;

/// Vulkan setup and submission errors
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Vulkan library unavailable: {0}")]
    Loader(String),

    #[error("No Vulkan device with a graphics queue")]
    NoSuitableDevice,

    #[error("{step} failed: {result}")]
    Vulkan { step: &'static str, result: vk::Result },

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("Shader binaries not loaded")]
    MissingShaders,

    #[error("Buffer memory is not host-mapped")]
    Unmapped,

    #[error("GPU resources are not initialized")]
    Uninitialized,

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Tag a raw Vulkan result with the call that produced it
pub(crate) trait VkResultExt<T> {
    fn step(self, step: &'static str) -> std::result::Result<T, GpuError>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn step(self, step: &'static str) -> std::result::Result<T, GpuError> {
        self.map_err(|result| GpuError::Vulkan { step, result })
    }
}

/// Where the backend is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Initializing,
    /// GPU rendering active
    Ready,
    /// Initialized, rendering in software
    ReadyFallback,
    Destroyed,
}

/// Scissor for a draw: the clamped register rectangle while clipping is on,
/// otherwise the whole target. `None` when nothing can pass.
pub(crate) fn gpu_scissor(state: &RenderState, width: u32, height: u32) -> Option<vk::Rect2D> {
    let sc = if state.fbz().contains(FbzMode::CLIPPING) {
        state.scissor.clamped(width, height)
    } else {
        Scissor::full(width, height)
    };
    (!sc.is_empty()).then(|| vk::Rect2D {
        offset: vk::Offset2D { x: sc.left, y: sc.top },
        extent: vk::Extent2D {
            width: (sc.right - sc.left) as u32,
            height: (sc.bottom - sc.top) as u32,
        },
    })
}

/// Clear color as normalized floats
fn clear_color(argb: u32) -> [f32; 4] {
    regs::unpack_clear_color(argb).map(|c| c as f32 / 255.0)
}

/// Settle a texture upload against the state mirror. A texture the GPU did
/// not receive is unbound from the mirror too, so both paths sample nothing.
fn settle_upload(raster: &mut Rasterizer, upload: std::result::Result<(), GpuError>) -> Result<()> {
    match upload {
        Ok(()) => {
            gpu_debug!("texture uploaded");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Texture upload failed: {e}");
            raster.unbind_texture();
            Err(RenderError::TextureUpload(e.to_string()))
        }
    }
}

/// Live GPU state. Dropping it releases pipelines, then resources, then the device.
struct GpuContext {
    pipelines: PipelineVariantCache<vk::Pipeline>,
    resources: GpuResources,
    device: GpuDevice,
    vertices: Vec<GpuVertex>,
    /// Clear to apply at the start of the next pass
    pending_clear: Option<([f32; 4], f32)>,
    /// Last frame read back by `present`
    frame: Vec<u8>,
}

impl GpuContext {
    fn create(
        library: &VulkanLibrary,
        shaders: Option<&ShaderBinaries>,
        validation: bool,
        width: u32,
        height: u32,
    ) -> std::result::Result<Self, GpuError> {
        let shaders = shaders.ok_or(GpuError::MissingShaders)?;
        let entry = library.ensure_initialized()?;
        let device = GpuDevice::create(entry, validation)?;
        let resources = GpuResources::create(&device, shaders, width, height)?;

        let mut ctx = Self {
            pipelines: PipelineVariantCache::new(),
            resources,
            device,
            vertices: Vec::with_capacity(MAX_BATCH_VERTICES),
            pending_clear: Some(([0.0; 4], GPU_DEPTH_FAR)),
            frame: vec![0; width as usize * height as usize * TEXEL_SIZE],
        };
        // Build the power-on variant now so broken shaders surface at init
        let mut factory = VkPipelineFactory::new(&ctx.device.device, &ctx.resources);
        ctx.pipelines.get_or_create(&PipelineKey::default(), &mut factory)?;
        Ok(ctx)
    }

    /// Draw `batch`, consuming any pending clear. An empty batch with no
    /// pending clear records nothing.
    fn flush(&mut self, state: &RenderState, texture_bound: bool, batch: &[Triangle]) -> std::result::Result<(), GpuError> {
        if batch.is_empty() {
            // Clear-only pass; with nothing pending the load pass would be a no-op
            if let Some((color, depth)) = self.pending_clear.take() {
                self.resources
                    .render_pass(&self.device, PassLoad::Clear { color, depth }, None)?;
            }
            return Ok(());
        }
        let (width, height) = (self.resources.width, self.resources.height);
        let scissor = gpu_scissor(state, width, height);
        let push_constants = state.push_constants(texture_bound).to_bytes();

        let mut factory = VkPipelineFactory::new(&self.device.device, &self.resources);
        let pipeline = self.pipelines.bind(&state.key, &mut factory);

        for chunk in batch.chunks(MAX_BATCH_TRIANGLES) {
            convert_batch(chunk, width, height, &mut self.vertices);
            let load = match self.pending_clear.take() {
                Some((color, depth)) => PassLoad::Clear { color, depth },
                None => PassLoad::Load,
            };
            let draw = match (pipeline, scissor) {
                (Some(pipeline), Some(scissor)) => Some(DrawCall {
                    pipeline,
                    scissor,
                    push_constants,
                    vertices: &self.vertices,
                }),
                _ => None,
            };
            self.resources.render_pass(&self.device, load, draw)?;
        }
        gpu_trace!(triangles = batch.len(), "flushed batch");
        Ok(())
    }

    fn clear(&mut self, argb: u32, key: &PipelineKey) {
        self.pending_clear = Some((clear_color(argb), key.depth_clear_value(GPU_DEPTH_FAR)));
    }

    fn present(&mut self) -> std::result::Result<(), GpuError> {
        if let Some((color, depth)) = self.pending_clear.take() {
            self.resources
                .render_pass(&self.device, PassLoad::Clear { color, depth }, None)?;
        }
        self.resources.read_back(&self.device, &mut self.frame)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        self.device.wait_idle();
        let mut factory = VkPipelineFactory::new(&self.device.device, &self.resources);
        self.pipelines.destroy_all(&mut factory);
        self.resources.destroy(&self.device);
    }
}

struct VulkanInner {
    state: BackendState,
    raster: Rasterizer,
    gpu: Option<GpuContext>,
}

/// GPU renderer with transparent software fallback
pub struct VulkanBackend {
    library: Arc<VulkanLibrary>,
    shaders: Option<ShaderBinaries>,
    validation: bool,
    inner: RwLock<VulkanInner>,
}

impl VulkanBackend {
    pub fn new(library: Arc<VulkanLibrary>, shaders: Option<ShaderBinaries>, validation: bool) -> Self {
        Self {
            library,
            shaders,
            validation,
            inner: RwLock::new(VulkanInner {
                state: BackendState::Uninitialized,
                raster: Rasterizer::new(),
                gpu: None,
            }),
        }
    }

    pub fn state(&self) -> BackendState {
        self.inner.read().state
    }

    /// Name of the device in use, if the GPU path is active
    pub fn adapter_name(&self) -> Option<String> {
        self.inner.read().gpu.as_ref().map(|gpu| gpu.device.name.clone())
    }

    /// Pipeline cache counters; zero while rendering in software
    pub fn pipeline_stats(&self) -> CacheStats {
        self.inner
            .read()
            .gpu
            .as_ref()
            .map(|gpu| gpu.pipelines.stats())
            .unwrap_or_default()
    }

    /// Number of compiled pipeline variants
    pub fn pipeline_variants(&self) -> usize {
        self.inner.read().gpu.as_ref().map_or(0, |gpu| gpu.pipelines.len())
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("state", &self.state())
            .field("shaders", &self.shaders.is_some())
            .field("validation", &self.validation)
            .finish()
    }
}

impl RenderBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn init(&self, width: u32, height: u32) {
        let mut inner = self.inner.write();
        if inner.state == BackendState::Destroyed {
            tracing::warn!("init called on a destroyed Vulkan backend");
            return;
        }
        inner.gpu = None;
        inner.raster.init(width, height);
        inner.state = BackendState::Initializing;

        let (width, height) = inner.raster.dimensions();
        match GpuContext::create(&self.library, self.shaders.as_ref(), self.validation, width, height) {
            Ok(gpu) => {
                tracing::info!("Vulkan rendering on {} ({}x{})", gpu.device.name, width, height);
                inner.gpu = Some(gpu);
                inner.state = BackendState::Ready;
            }
            Err(e) => {
                tracing::warn!("Vulkan unavailable, rendering in software: {e}");
                inner.state = BackendState::ReadyFallback;
            }
        }
    }

    fn update_pipeline_state(&self, fbz_mode: u32, alpha_mode: u32) {
        self.inner.write().raster.update_pipeline_state(fbz_mode, alpha_mode);
    }

    fn set_scissor(&self, left: i32, top: i32, right: i32, bottom: i32) {
        self.inner.write().raster.set_scissor(left, top, right, bottom);
    }

    fn set_chroma_key(&self, rgb: u32) {
        self.inner.write().raster.set_chroma_key(rgb);
    }

    fn set_texture(&self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.raster.set_texture(pixels, width, height)?;
        match inner.gpu.as_mut().filter(|_| width > 0 && height > 0) {
            Some(gpu) => {
                let upload = gpu.resources.upload_texture(&gpu.device, pixels, width, height);
                settle_upload(&mut inner.raster, upload)
            }
            None => Ok(()),
        }
    }

    fn set_texture_mode(&self, mode: u32) {
        self.inner.write().raster.set_texture_mode(mode);
    }

    fn set_fog(&self, color: u32, start: f32, end: f32) {
        self.inner.write().raster.set_fog(color, start, end);
    }

    fn set_fog_mode(&self, mode: u32) {
        self.inner.write().raster.set_fog_mode(mode);
    }

    fn set_color_path(&self, mode: u32) {
        self.inner.write().raster.set_color_path(mode);
    }

    fn flush_triangles(&self, batch: &[Triangle]) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        match inner.gpu.as_mut() {
            Some(gpu) => {
                if let Err(e) = gpu.flush(inner.raster.state(), inner.raster.has_texture(), batch) {
                    tracing::error!("Dropped batch of {} triangles: {e}", batch.len());
                }
            }
            None => inner.raster.flush_triangles(batch),
        }
    }

    fn clear(&self, argb: u32) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        match inner.gpu.as_mut() {
            Some(gpu) => gpu.clear(argb, &inner.raster.state().key),
            None => inner.raster.clear(argb),
        }
    }

    fn swap(&self, _wait_vsync: bool) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        match inner.gpu.as_mut() {
            Some(gpu) => {
                if let Err(e) = gpu.present() {
                    tracing::error!("Frame readback failed: {e}");
                }
            }
            None => inner.raster.swap(),
        }
    }

    fn get_frame(&self) -> FramebufferData {
        let inner = self.inner.read();
        let (width, height) = inner.raster.dimensions();
        let pixels = match &inner.gpu {
            Some(gpu) => gpu.frame.clone(),
            None => inner.raster.front_buffer().to_vec(),
        };
        FramebufferData { width, height, pixels }
    }

    fn get_dimensions(&self) -> (u32, u32) {
        self.inner.read().raster.dimensions()
    }

    fn has_texture(&self) -> bool {
        self.inner.read().raster.has_texture()
    }

    fn is_accelerated(&self) -> bool {
        self.inner.read().state == BackendState::Ready
    }

    fn destroy(&self) {
        let mut inner = self.inner.write();
        inner.gpu = None;
        inner.raster.destroy();
        inner.state = BackendState::Destroyed;
        gpu_debug!("Vulkan backend destroyed");
    }
}
