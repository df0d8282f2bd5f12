//! Rendering backends
//!
//! Both backends expose the same operation surface through
//! [`RenderBackend`]. Each instance guards its state with one
//! reader/writer lock, so a backend can be shared across threads behind an
//! `Arc`; mutators take the lock exclusively and the accessors share it.

pub mod software;
pub mod vulkan;

use std::sync::Arc;

use vh_core::config::{BackendPreference, RenderConfig};
use vh_core::error::Result;

use crate::shader::ShaderBinaries;
use crate::vertex::Triangle;

pub use software::SoftwareBackend;
pub use vulkan::{probe_vulkan, AdapterInfo, GpuError, VulkanBackend, VulkanLibrary};

/// Snapshot of a presented frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramebufferData {
    pub width: u32,
    pub height: u32,
    /// RGBA8, rows top to bottom
    pub pixels: Vec<u8>,
}

impl FramebufferData {
    /// RGBA bytes at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels.get(idx..idx + 4)?.try_into().ok()
    }
}

/// Operation surface shared by the software and Vulkan renderers
pub trait RenderBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// (Re)allocate framebuffers and reset register state. Never fails:
    /// accelerated setup problems degrade to software rendering.
    fn init(&self, width: u32, height: u32);

    /// Latch `fbzMode` and `alphaMode`
    fn update_pipeline_state(&self, fbz_mode: u32, alpha_mode: u32);

    /// Scissor rectangle, honored while `fbzMode` clipping is on
    fn set_scissor(&self, left: i32, top: i32, right: i32, bottom: i32);

    /// 24-bit RGB chroma key
    fn set_chroma_key(&self, rgb: u32);

    /// Replace the bound RGBA8 texture
    fn set_texture(&self, pixels: &[u8], width: u32, height: u32) -> Result<()>;

    /// Latch `textureMode` (enable, filter, clamp bits)
    fn set_texture_mode(&self, mode: u32);

    /// Fog color (0x00RRGGBB) and normalized depth bounds
    fn set_fog(&self, color: u32, start: f32, end: f32);

    /// Latch `fogMode`
    fn set_fog_mode(&self, mode: u32);

    /// Latch `fbzColorPath`
    fn set_color_path(&self, mode: u32);

    /// Rasterize a triangle list with the current state
    fn flush_triangles(&self, batch: &[Triangle]);

    /// Clear color to `argb` and depth to the far sentinel of the current depth function
    fn clear(&self, argb: u32);

    /// Present the rendered frame to [`RenderBackend::get_frame`]
    fn swap(&self, wait_vsync: bool);

    /// Copy of the last presented frame
    fn get_frame(&self) -> FramebufferData;

    fn get_dimensions(&self) -> (u32, u32);

    fn has_texture(&self) -> bool;

    /// True while GPU rendering is active
    fn is_accelerated(&self) -> bool;

    /// Release every resource; the backend is unusable afterwards
    fn destroy(&self);
}

/// Construct and initialize the backend chosen by `config`.
///
/// Shaders come from `shader_dir` when set, otherwise from the copy compiled
/// into the crate. `Auto` probes for a Vulkan device and requires shader
/// binaries; either missing means the software rasterizer is used.
pub fn create_backend(config: &RenderConfig) -> Arc<dyn RenderBackend> {
    let (width, height) = config.dimensions();
    let shaders = match config.shader_dir.as_deref() {
        Some(dir) => match ShaderBinaries::load_from_dir(dir) {
            Ok(binaries) => Some(binaries),
            Err(e) => {
                tracing::warn!("Failed to load shaders from {}: {e}", dir.display());
                None
            }
        },
        None => ShaderBinaries::embedded(),
    };

    let backend: Arc<dyn RenderBackend> = match config.backend {
        BackendPreference::Software => Arc::new(SoftwareBackend::new()),
        BackendPreference::Vulkan => Arc::new(VulkanBackend::new(VulkanLibrary::global(), shaders, config.validation)),
        BackendPreference::Auto => match (&shaders, probe_vulkan(&VulkanLibrary::global())) {
            (Some(_), Ok(adapter)) => {
                tracing::info!("Vulkan adapter found: {}", adapter.name);
                Arc::new(VulkanBackend::new(VulkanLibrary::global(), shaders, config.validation))
            }
            (None, _) => {
                tracing::info!("No usable shader binaries, using software rasterizer");
                Arc::new(SoftwareBackend::new())
            }
            (_, Err(e)) => {
                tracing::info!("Vulkan unavailable ({e}), using software rasterizer");
                Arc::new(SoftwareBackend::new())
            }
        },
    };

    backend.init(width, height);
    tracing::info!(
        "Render backend: {} ({}x{}, accelerated: {})",
        backend.name(),
        width,
        height,
        backend.is_accelerated()
    );
    backend
}
