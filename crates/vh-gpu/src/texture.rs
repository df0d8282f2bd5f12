//! Texture storage and sampling
//!
//! Textures are RGBA8, uploaded whole and never patched. Sampling follows
//! the chip's magnification filter and per-axis wrap/clamp bits from
//! `textureMode`.

use vh_core::error::{RenderError, Result};

use crate::regs::TextureMode;

/// Bytes per RGBA8 texel
pub const TEXEL_SIZE: usize = 4;

/// An uploaded RGBA8 texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Texture {
    /// Copy `pixels` into a new texture, checking the buffer covers exactly
    /// `width * height` texels
    pub fn new(pixels: &[u8], width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * TEXEL_SIZE;
        if pixels.len() != expected {
            return Err(RenderError::TextureSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.to_vec(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Normalized texel at integer coordinates (must be in range)
    fn texel(&self, x: usize, y: usize) -> [f32; 4] {
        let idx = (y * self.width as usize + x) * TEXEL_SIZE;
        let p = &self.pixels[idx..idx + TEXEL_SIZE];
        [
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
            p[3] as f32 / 255.0,
        ]
    }

    /// Sample at normalized (s, t)
    pub fn sample(&self, s: f32, t: f32, mode: TextureMode) -> [f32; 4] {
        if self.is_empty() {
            return [1.0; 4];
        }
        let s = wrap_coord(s, mode.contains(TextureMode::CLAMP_S));
        let t = wrap_coord(t, mode.contains(TextureMode::CLAMP_T));
        if mode.bilinear() {
            self.sample_bilinear(s, t, mode)
        } else {
            self.sample_nearest(s, t)
        }
    }

    fn sample_nearest(&self, s: f32, t: f32) -> [f32; 4] {
        let w = self.width as usize;
        let h = self.height as usize;
        let x = ((s * w as f32) as usize).min(w - 1);
        let y = ((t * h as f32) as usize).min(h - 1);
        self.texel(x, y)
    }

    fn sample_bilinear(&self, s: f32, t: f32, mode: TextureMode) -> [f32; 4] {
        let fx = s * self.width as f32 - 0.5;
        let fy = t * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let ax = fx - x0;
        let ay = fy - y0;

        let clamp_s = mode.contains(TextureMode::CLAMP_S);
        let clamp_t = mode.contains(TextureMode::CLAMP_T);
        let x0i = x0 as i64;
        let y0i = y0 as i64;
        let xa = texel_index(x0i, self.width, clamp_s);
        let xb = texel_index(x0i + 1, self.width, clamp_s);
        let ya = texel_index(y0i, self.height, clamp_t);
        let yb = texel_index(y0i + 1, self.height, clamp_t);

        let c00 = self.texel(xa, ya);
        let c10 = self.texel(xb, ya);
        let c01 = self.texel(xa, yb);
        let c11 = self.texel(xb, yb);

        std::array::from_fn(|i| {
            let top = c00[i] + (c10[i] - c00[i]) * ax;
            let bottom = c01[i] + (c11[i] - c01[i]) * ax;
            top + (bottom - top) * ay
        })
    }
}

/// Fold a coordinate into [0,1), or clamp it to [0,1] for clamped axes
pub fn wrap_coord(v: f32, clamp: bool) -> f32 {
    if clamp {
        v.clamp(0.0, 1.0)
    } else {
        v - v.floor()
    }
}

/// Resolve a possibly out-of-range texel index on one axis
fn texel_index(i: i64, size: u32, clamp: bool) -> usize {
    let size = size as i64;
    if clamp {
        i.clamp(0, size - 1) as usize
    } else {
        i.rem_euclid(size) as usize
    }
}
