//! Software backend

use parking_lot::RwLock;

use vh_core::error::Result;

use super::{FramebufferData, RenderBackend};
use crate::raster::Rasterizer;
use crate::vertex::Triangle;

/// [`Rasterizer`] behind a reader/writer lock
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    inner: RwLock<Rasterizer>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Rasterizer::new()),
        }
    }

    /// Run `f` against the rasterizer under a shared lock
    pub fn with_rasterizer<R>(&self, f: impl FnOnce(&Rasterizer) -> R) -> R {
        f(&self.inner.read())
    }
}

impl RenderBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn init(&self, width: u32, height: u32) {
        self.inner.write().init(width, height);
    }

    fn update_pipeline_state(&self, fbz_mode: u32, alpha_mode: u32) {
        self.inner.write().update_pipeline_state(fbz_mode, alpha_mode);
    }

    fn set_scissor(&self, left: i32, top: i32, right: i32, bottom: i32) {
        self.inner.write().set_scissor(left, top, right, bottom);
    }

    fn set_chroma_key(&self, rgb: u32) {
        self.inner.write().set_chroma_key(rgb);
    }

    fn set_texture(&self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        self.inner.write().set_texture(pixels, width, height)
    }

    fn set_texture_mode(&self, mode: u32) {
        self.inner.write().set_texture_mode(mode);
    }

    fn set_fog(&self, color: u32, start: f32, end: f32) {
        self.inner.write().set_fog(color, start, end);
    }

    fn set_fog_mode(&self, mode: u32) {
        self.inner.write().set_fog_mode(mode);
    }

    fn set_color_path(&self, mode: u32) {
        self.inner.write().set_color_path(mode);
    }

    fn flush_triangles(&self, batch: &[Triangle]) {
        self.inner.write().flush_triangles(batch);
    }

    fn clear(&self, argb: u32) {
        self.inner.write().clear(argb);
    }

    fn swap(&self, _wait_vsync: bool) {
        self.inner.write().swap();
    }

    fn get_frame(&self) -> FramebufferData {
        let raster = self.inner.read();
        let (width, height) = raster.dimensions();
        FramebufferData {
            width,
            height,
            pixels: raster.front_buffer().to_vec(),
        }
    }

    fn get_dimensions(&self) -> (u32, u32) {
        self.inner.read().dimensions()
    }

    fn has_texture(&self) -> bool {
        self.inner.read().has_texture()
    }

    fn is_accelerated(&self) -> bool {
        false
    }

    fn destroy(&self) {
        self.inner.write().destroy();
    }
}
