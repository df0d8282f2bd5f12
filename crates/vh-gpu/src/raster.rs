//! Software rasterizer
//!
//! Reference implementation of the chip's fragment pipeline over a
//! CPU-resident RGBA8 color plane and f32 depth plane. The Vulkan backend
//! reads its per-fragment state from here as well, so both paths always
//! agree on what the registers mean.
//!
//! Per fragment, in order: depth test, texture sample and color combine,
//! clamp, alpha test, chroma key, fog, dither, blend/write, depth write.

use vh_core::config::{MAX_HEIGHT, MAX_WIDTH};
use vh_core::error::Result;
use vh_core::{raster_debug, raster_trace};

use crate::pipeline::PipelineKey;
use crate::push_constants::PushConstants;
use crate::regs::{
    self, AlphaMode, ColorCombine, CompareFunc, FbzMode, FogMode, TextureMode,
};
use crate::texture::Texture;
use crate::vertex::{normalize_depth, Triangle, Vertex};

/// High depth sentinel written by clears under "less-than" style functions
pub const DEPTH_FAR: f32 = f32::MAX;

/// Chroma key match tolerance, one 8-bit step per channel
pub const CHROMA_TOLERANCE: f32 = 1.0 / 255.0;

const BAYER_4X4: [f32; 16] = [
    0.0 / 16.0, 8.0 / 16.0, 2.0 / 16.0, 10.0 / 16.0,
    12.0 / 16.0, 4.0 / 16.0, 14.0 / 16.0, 6.0 / 16.0,
    3.0 / 16.0, 11.0 / 16.0, 1.0 / 16.0, 9.0 / 16.0,
    15.0 / 16.0, 7.0 / 16.0, 13.0 / 16.0, 5.0 / 16.0,
];

const BAYER_2X2: [f32; 4] = [0.0 / 4.0, 2.0 / 4.0, 3.0 / 4.0, 1.0 / 4.0];

/// Scissor rectangle, half-open on the right and bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scissor {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Scissor {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }

    /// Intersect with a `width` x `height` framebuffer
    pub fn clamped(self, width: u32, height: u32) -> Self {
        Self {
            left: self.left.max(0),
            top: self.top.max(0),
            right: self.right.min(width as i32),
            bottom: self.bottom.min(height as i32),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// Fog color and depth bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fog {
    pub mode: FogMode,
    /// 0x00RRGGBB
    pub color: u32,
    pub start: f32,
    pub end: f32,
}

impl Default for Fog {
    fn default() -> Self {
        Self {
            mode: FogMode::empty(),
            color: 0,
            start: 0.0,
            end: 1.0,
        }
    }
}

impl Fog {
    pub fn enabled(&self) -> bool {
        self.mode.contains(FogMode::ENABLE)
    }

    /// Blend factor toward the fog color for a normalized depth
    pub fn factor(&self, depth: f32) -> f32 {
        let f = if self.end > self.start {
            (depth - self.start) / (self.end - self.start)
        } else {
            depth
        };
        f.clamp(0.0, 1.0)
    }
}

/// Register-derived state that shapes every fragment
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub fbz_mode: u32,
    pub alpha_mode: u32,
    pub key: PipelineKey,
    pub scissor: Scissor,
    pub chroma_key: u32,
    pub fog: Fog,
    /// `None` until the color path register is written
    pub color_path: Option<u32>,
    pub texture_mode: TextureMode,
}

impl RenderState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            fbz_mode: FbzMode::DEFAULT_BITS,
            alpha_mode: 0,
            key: PipelineKey::default(),
            scissor: Scissor::full(width, height),
            chroma_key: 0,
            fog: Fog::default(),
            color_path: None,
            texture_mode: TextureMode::default(),
        }
    }

    pub fn fbz(&self) -> FbzMode {
        FbzMode::from_raw(self.fbz_mode)
    }

    pub fn alpha(&self) -> AlphaMode {
        AlphaMode::from_raw(self.alpha_mode)
    }

    /// Constant block for the fragment shader
    pub fn push_constants(&self, texture_bound: bool) -> PushConstants {
        PushConstants {
            fbz_mode: self.fbz_mode,
            alpha_mode: self.alpha_mode,
            chroma_key: self.chroma_key,
            fog_color: PushConstants::pack_fog(self.fog.mode, self.fog.color),
            fog_start: self.fog.start,
            fog_end: self.fog.end,
            color_combine: PushConstants::pack_color_path(self.color_path),
            texture_enable: PushConstants::pack_texture(self.texture_mode, texture_bound),
        }
    }
}

/// Per-flush decode of the render state
struct Setup<'a> {
    depth_test: Option<CompareFunc>,
    depth_write: bool,
    rgb_write: bool,
    alpha_test: Option<(CompareFunc, f32)>,
    chroma: Option<[f32; 3]>,
    fog: Option<(Fog, [f32; 3])>,
    dither: Option<bool>,
    texture: Option<(&'a Texture, TextureMode)>,
    combine: ColorCombine,
    key: PipelineKey,
}

/// CPU rasterizer with its own color, depth and front planes
#[derive(Debug, Clone)]
pub struct Rasterizer {
    width: u32,
    height: u32,
    color: Vec<u8>,
    depth: Vec<f32>,
    front: Vec<u8>,
    state: RenderState,
    texture: Option<Texture>,
}

impl Rasterizer {
    /// An uninitialized (0x0) rasterizer
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            color: Vec::new(),
            depth: Vec::new(),
            front: Vec::new(),
            state: RenderState::new(0, 0),
            texture: None,
        }
    }

    /// Allocate planes and reset all state; dimensions are clamped to the chip's range
    pub fn init(&mut self, width: u32, height: u32) {
        let width = width.clamp(1, MAX_WIDTH);
        let height = height.clamp(1, MAX_HEIGHT);
        let pixels = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.color = vec![0; pixels * 4];
        self.depth = vec![DEPTH_FAR; pixels];
        self.front = vec![0; pixels * 4];
        self.state = RenderState::new(width, height);
        self.texture = None;
        raster_debug!(width, height, "software rasterizer initialized");
    }

    /// Release the planes; the rasterizer reads as 0x0 afterwards
    pub fn destroy(&mut self) {
        *self = Self::new();
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn texture(&self) -> Option<&Texture> {
        self.texture.as_ref()
    }

    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    /// Working color plane, RGBA8 rows top to bottom
    pub fn color_plane(&self) -> &[u8] {
        &self.color
    }

    pub fn depth_plane(&self) -> &[f32] {
        &self.depth
    }

    /// Last swapped frame
    pub fn front_buffer(&self) -> &[u8] {
        &self.front
    }

    pub fn update_pipeline_state(&mut self, fbz_mode: u32, alpha_mode: u32) {
        self.state.fbz_mode = fbz_mode;
        self.state.alpha_mode = alpha_mode;
        self.state.key = PipelineKey::from_registers(fbz_mode, alpha_mode);
    }

    pub fn set_scissor(&mut self, left: i32, top: i32, right: i32, bottom: i32) {
        self.state.scissor = Scissor {
            left,
            top,
            right,
            bottom,
        }
        .clamped(self.width, self.height);
    }

    pub fn set_chroma_key(&mut self, rgb: u32) {
        self.state.chroma_key = rgb & 0x00FF_FFFF;
    }

    /// Replace the bound texture. A 0x0 upload unbinds it.
    pub fn set_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        let texture = Texture::new(pixels, width, height)?;
        self.texture = if texture.is_empty() { None } else { Some(texture) };
        Ok(())
    }

    pub fn unbind_texture(&mut self) {
        self.texture = None;
    }

    pub fn set_texture_mode(&mut self, mode: u32) {
        self.state.texture_mode = TextureMode::from_raw(mode);
    }

    pub fn set_fog(&mut self, color: u32, start: f32, end: f32) {
        self.state.fog.color = color & 0x00FF_FFFF;
        self.state.fog.start = start;
        self.state.fog.end = end;
    }

    pub fn set_fog_mode(&mut self, mode: u32) {
        self.state.fog.mode = FogMode::from_bits_retain(mode);
    }

    pub fn set_color_path(&mut self, mode: u32) {
        self.state.color_path = Some(mode);
    }

    /// Depth a clear writes under the current depth function
    pub fn depth_clear_value(&self) -> f32 {
        self.state.key.depth_clear_value(DEPTH_FAR)
    }

    /// Fill the color plane with `argb` and the depth plane with the far sentinel
    pub fn clear(&mut self, argb: u32) {
        let rgba = regs::unpack_clear_color(argb);
        for px in self.color.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        let depth = self.depth_clear_value();
        self.depth.fill(depth);
    }

    /// Present the working color plane
    pub fn swap(&mut self) {
        self.front.copy_from_slice(&self.color);
    }

    /// RGBA bytes of one working-plane pixel
    /// Working-plane RGBA at (x, y), `None` outside the target
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let idx = self.index(x, y)? * 4;
        self.color.get(idx..idx + 4)?.try_into().ok()
    }

    pub fn depth_at(&self, x: u32, y: u32) -> Option<f32> {
        self.depth.get(self.index(x, y)?).copied()
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    /// Rasterize a triangle list
    pub fn flush_triangles(&mut self, batch: &[Triangle]) {
        if self.color.is_empty() {
            return;
        }
        raster_trace!(triangles = batch.len(), "flush");

        // The texture is moved out so the setup can borrow it while planes are written
        let texture = self.texture.take();
        {
            let setup = self.setup(texture.as_ref());
            for tri in batch {
                self.draw_triangle(tri, &setup);
            }
        }
        self.texture = texture;
    }

    fn setup<'a>(&self, texture: Option<&'a Texture>) -> Setup<'a> {
        let fbz = self.state.fbz();
        let alpha = self.state.alpha();
        let fog = self.state.fog;
        Setup {
            depth_test: fbz
                .contains(FbzMode::DEPTH_ENABLE)
                .then(|| fbz.depth_function()),
            depth_write: fbz.contains(FbzMode::DEPTH_ENABLE | FbzMode::DEPTH_WRITE),
            rgb_write: self.state.key.color_write,
            alpha_test: alpha
                .contains(AlphaMode::TEST_ENABLE)
                .then(|| (alpha.test_function(), alpha.reference())),
            chroma: fbz
                .contains(FbzMode::CHROMAKEY)
                .then(|| regs::unpack_rgb(self.state.chroma_key)),
            fog: fog.enabled().then(|| (fog, regs::unpack_rgb(fog.color))),
            dither: fbz
                .contains(FbzMode::DITHER)
                .then(|| fbz.contains(FbzMode::DITHER_2X2)),
            texture: texture
                .filter(|_| self.state.texture_mode.contains(TextureMode::ENABLE))
                .map(|t| (t, self.state.texture_mode)),
            combine: ColorCombine::from_color_path(self.state.color_path),
            key: self.state.key,
        }
    }

    fn draw_triangle(&mut self, tri: &Triangle, setup: &Setup<'_>) {
        let [mut v0, v1, mut v2] = tri.vertices;
        let mut area = edge(&v0, &v1, v2.x, v2.y);
        if area == 0.0 {
            return;
        }
        if area < 0.0 {
            std::mem::swap(&mut v0, &mut v2);
            area = -area;
        }
        let inv_area = 1.0 / area;

        let mut min_x = v0.x.min(v1.x).min(v2.x).floor() as i32;
        let mut max_x = v0.x.max(v1.x).max(v2.x).ceil() as i32;
        let mut min_y = v0.y.min(v1.y).min(v2.y).floor() as i32;
        let mut max_y = v0.y.max(v1.y).max(v2.y).ceil() as i32;

        min_x = min_x.max(0);
        min_y = min_y.max(0);
        max_x = max_x.min(self.width as i32);
        max_y = max_y.min(self.height as i32);

        if self.state.fbz().contains(FbzMode::CLIPPING) {
            let sc = self.state.scissor;
            min_x = min_x.max(sc.left);
            min_y = min_y.max(sc.top);
            max_x = max_x.min(sc.right);
            max_y = max_y.min(sc.bottom);
        }

        for y in min_y..max_y {
            let py = y as f32 + 0.5;
            for x in min_x..max_x {
                let px = x as f32 + 0.5;
                let w0 = edge(&v1, &v2, px, py);
                let w1 = edge(&v2, &v0, px, py);
                let w2 = edge(&v0, &v1, px, py);
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let b = [w0 * inv_area, w1 * inv_area, w2 * inv_area];
                self.shade_fragment(x as usize, y as usize, [&v0, &v1, &v2], b, setup);
            }
        }
    }

    fn shade_fragment(
        &mut self,
        x: usize,
        y: usize,
        verts: [&Vertex; 3],
        b: [f32; 3],
        setup: &Setup<'_>,
    ) {
        let idx = y * self.width as usize + x;
        let lerp = |f: fn(&Vertex) -> f32| b[0] * f(verts[0]) + b[1] * f(verts[1]) + b[2] * f(verts[2]);

        let z = lerp(|v| v.z);
        if let Some(func) = setup.depth_test {
            if !func.passes(z, self.depth[idx]) {
                return;
            }
        }

        let vert_color: [f32; 4] = std::array::from_fn(|i| {
            b[0] * verts[0].color[i] + b[1] * verts[1].color[i] + b[2] * verts[2].color[i]
        });

        let mut color = match setup.texture {
            Some((texture, mode)) => {
                let tex = texture.sample(lerp(|v| v.s), lerp(|v| v.t), mode);
                setup.combine.apply(vert_color, tex)
            }
            None => vert_color,
        };
        for c in color.iter_mut() {
            *c = c.clamp(0.0, 1.0);
        }

        if let Some((func, reference)) = setup.alpha_test {
            if !func.passes(color[3], reference) {
                return;
            }
        }

        if let Some(key) = setup.chroma {
            if (0..3).all(|i| (color[i] - key[i]).abs() <= CHROMA_TOLERANCE) {
                return;
            }
        }

        if let Some((fog, fog_rgb)) = setup.fog {
            let f = fog.factor(normalize_depth(z));
            for i in 0..3 {
                color[i] = (color[i] + (fog_rgb[i] - color[i]) * f).clamp(0.0, 1.0);
            }
        }

        if let Some(use_2x2) = setup.dither {
            let threshold = dither_threshold(x, y, use_2x2);
            for c in color.iter_mut().take(3) {
                *c = apply_dither(*c, threshold);
            }
        }

        if setup.rgb_write {
            let off = idx * 4;
            let out = if setup.key.blend_enable {
                let dst: [f32; 4] = std::array::from_fn(|i| self.color[off + i] as f32 / 255.0);
                let sf = setup.key.src_factor.weight(color, dst);
                let df = setup.key.dst_factor.weight(color, dst);
                let sa = setup.key.src_factor.alpha_weight(color, dst);
                let da = setup.key.dst_factor.alpha_weight(color, dst);
                std::array::from_fn(|i| {
                    let (s, d) = if i == 3 { (sa, da) } else { (sf, df) };
                    (color[i] * s + dst[i] * d).clamp(0.0, 1.0)
                })
            } else {
                color
            };
            for (i, c) in out.iter().enumerate() {
                self.color[off + i] = quantize(*c);
            }
        }

        if setup.depth_write {
            self.depth[idx] = z;
        }
    }
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Signed edge function of point (px, py) against edge a -> b
fn edge(a: &Vertex, b: &Vertex, px: f32, py: f32) -> f32 {
    (px - a.x) * (b.y - a.y) - (py - a.y) * (b.x - a.x)
}

/// Ordered-dither threshold in [0,1) for a pixel
pub fn dither_threshold(x: usize, y: usize, use_2x2: bool) -> f32 {
    if use_2x2 {
        BAYER_2X2[((y & 1) << 1) | (x & 1)]
    } else {
        BAYER_4X4[((y & 3) << 2) | (x & 3)]
    }
}

/// Offset by the threshold and snap to an 8-bit level
pub fn apply_dither(value: f32, threshold: f32) -> f32 {
    let level = value * 255.0 + (threshold - 0.5);
    let snapped = (level + 0.5).floor().max(0.0) / 255.0;
    snapped.clamp(0.0, 1.0)
}

/// Normalized channel to a byte, rounding to nearest like a UNORM attachment
pub fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}
