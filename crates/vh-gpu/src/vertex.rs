//! Vertex and triangle types

use bytemuck::{Pod, Zeroable};

/// Maximum triangles accepted per flush; larger batches are split
pub const MAX_BATCH_TRIANGLES: usize = 4096;
pub const MAX_BATCH_VERTICES: usize = MAX_BATCH_TRIANGLES * 3;

/// Depth values above 1.0 use the chip's 16.16-style range and are scaled down by this
pub const LEGACY_DEPTH_SCALE: f32 = 65536.0;

/// A screen-space vertex as produced by the setup unit
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    /// Screen-space X in pixels
    pub x: f32,
    /// Screen-space Y in pixels, origin top-left
    pub y: f32,
    /// Depth
    pub z: f32,
    /// RGBA in [0,1]
    pub color: [f32; 4],
    /// Texture S coordinate
    pub s: f32,
    /// Texture T coordinate
    pub t: f32,
}

impl Vertex {
    pub fn new(x: f32, y: f32, z: f32, color: [f32; 4]) -> Self {
        Self {
            x,
            y,
            z,
            color,
            s: 0.0,
            t: 0.0,
        }
    }

    pub fn with_tex(mut self, s: f32, t: f32) -> Self {
        self.s = s;
        self.t = t;
        self
    }
}

/// Unit of submission
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Triangle {
    pub vertices: [Vertex; 3],
}

impl Triangle {
    pub fn new(a: Vertex, b: Vertex, c: Vertex) -> Self {
        Self {
            vertices: [a, b, c],
        }
    }

    /// Triangle with the same color at every vertex
    pub fn flat(points: [(f32, f32); 3], z: f32, color: [f32; 4]) -> Self {
        Self {
            vertices: points.map(|(x, y)| Vertex::new(x, y, z, color)),
        }
    }
}

/// Map a chip depth value into [0,1]
pub fn normalize_depth(z: f32) -> f32 {
    if (0.0..=1.0).contains(&z) {
        z
    } else {
        (z / LEGACY_DEPTH_SCALE).clamp(0.0, 1.0)
    }
}

/// Interleaved vertex as consumed by the vertex shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GpuVertex {
    /// NDC x, NDC y, normalized depth
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub tex_coord: [f32; 2],
}

impl GpuVertex {
    pub const STRIDE: u32 = std::mem::size_of::<GpuVertex>() as u32;
    pub const POSITION_OFFSET: u32 = 0;
    pub const COLOR_OFFSET: u32 = 12;
    pub const TEX_COORD_OFFSET: u32 = 28;

    /// Convert a screen-space vertex for a `width` x `height` target
    pub fn from_screen(v: &Vertex, width: u32, height: u32) -> Self {
        Self {
            position: [
                v.x / width as f32 * 2.0 - 1.0,
                v.y / height as f32 * 2.0 - 1.0,
                normalize_depth(v.z),
            ],
            color: v.color,
            tex_coord: [v.s, v.t],
        }
    }
}

/// Flatten a triangle batch into GPU vertices, appending to `out`
pub fn convert_batch(batch: &[Triangle], width: u32, height: u32, out: &mut Vec<GpuVertex>) {
    out.clear();
    out.reserve(batch.len() * 3);
    for tri in batch {
        for v in &tri.vertices {
            out.push(GpuVertex::from_screen(v, width, height));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_vertex_layout() {
        assert_eq!(GpuVertex::STRIDE, 36);
        let v = GpuVertex {
            position: [1.0, 2.0, 3.0],
            color: [4.0, 5.0, 6.0, 7.0],
            tex_coord: [8.0, 9.0],
        };
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&v));
        assert_eq!(floats[(GpuVertex::COLOR_OFFSET / 4) as usize], 4.0);
        assert_eq!(floats[(GpuVertex::TEX_COORD_OFFSET / 4) as usize], 8.0);
    }

    #[test]
    fn test_ndc_conversion() {
        let v = Vertex::new(0.0, 480.0, 0.5, [1.0; 4]).with_tex(0.25, 0.75);
        let g = GpuVertex::from_screen(&v, 640, 480);
        assert_eq!(g.position, [-1.0, 1.0, 0.5]);
        assert_eq!(g.tex_coord, [0.25, 0.75]);

        let center = GpuVertex::from_screen(&Vertex::new(320.0, 240.0, 0.0, [1.0; 4]), 640, 480);
        assert_eq!(&center.position[..2], &[0.0, 0.0]);
    }

    #[test]
    fn test_normalize_depth() {
        assert_eq!(normalize_depth(0.0), 0.0);
        assert_eq!(normalize_depth(0.75), 0.75);
        assert_eq!(normalize_depth(1.0), 1.0);
        assert_eq!(normalize_depth(32768.0), 0.5);
        assert_eq!(normalize_depth(1.0e9), 1.0);
        assert_eq!(normalize_depth(-4.0), 0.0);
    }

    #[test]
    fn test_convert_batch() {
        let tri = Triangle::flat([(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)], 0.0, [1.0, 0.0, 0.0, 1.0]);
        let mut out = vec![GpuVertex::default(); 7];
        convert_batch(&[tri, tri], 10, 10, &mut out);
        assert_eq!(out.len(), 6);
        assert_eq!(out[1].position, [1.0, -1.0, 0.0]);
    }
}
