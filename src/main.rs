//! voodoo-hle - headless Voodoo Graphics renderer
//!
//! Renders a short test scene through the configured backend and writes the
//! presented frame as a binary PPM.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use vh_core::config::Config;
use vh_gpu::regs::{
    AlphaMode, FbzMode, FogMode, TextureMode, ALPHA_DST_RGB_SHIFT, ALPHA_SRC_RGB_SHIFT, COMBINE_ITERATED,
    COMBINE_MODULATE,
};
use vh_gpu::{FramebufferData, RenderBackend, Triangle, Vertex};

fn main() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    vh_core::logging::init(&config);

    let output = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("frame.ppm"));

    tracing::info!("Starting voodoo-hle");

    let backend = vh_gpu::create_backend(&config.render);
    tracing::info!(
        "Backend {} ready (accelerated: {})",
        backend.name(),
        backend.is_accelerated()
    );

    render_scene(backend.as_ref())?;
    let frame = backend.get_frame();
    write_ppm(&output, &frame).with_context(|| format!("writing {}", output.display()))?;
    tracing::info!("Wrote {}x{} frame to {}", frame.width, frame.height, output.display());

    backend.destroy();
    Ok(())
}

fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            if (x / cell + y / cell) % 2 == 0 {
                [240, 240, 240, 255]
            } else {
                [40, 60, 160, 255]
            }
        })
        .collect()
}

/// Textured floor quad under fog, with a translucent Gouraud triangle on top
fn render_scene(backend: &dyn RenderBackend) -> anyhow::Result<()> {
    let (w, h) = backend.get_dimensions();
    let (w, h) = (w as f32, h as f32);

    backend.update_pipeline_state(FbzMode::DEFAULT_BITS | FbzMode::DITHER.bits(), 0);
    backend.clear(0xFF101020);

    backend.set_texture(&checkerboard(64, 8), 64, 64)?;
    backend.set_texture_mode((TextureMode::ENABLE | TextureMode::MINIFY | TextureMode::MAGNIFY).bits());
    backend.set_color_path(COMBINE_MODULATE);
    backend.set_fog(0x00101020, 0.3, 1.0);
    backend.set_fog_mode(FogMode::ENABLE.bits());

    let white = [1.0; 4];
    let corners = [
        Vertex::new(0.0, h * 0.45, 0.95, white).with_tex(0.0, 0.0),
        Vertex::new(w, h * 0.45, 0.95, white).with_tex(8.0, 0.0),
        Vertex::new(w, h, 0.1, white).with_tex(8.0, 8.0),
        Vertex::new(0.0, h, 0.1, white).with_tex(0.0, 8.0),
    ];
    backend.flush_triangles(&[
        Triangle::new(corners[0], corners[1], corners[2]),
        Triangle::new(corners[0], corners[2], corners[3]),
    ]);

    // Src-alpha / one-minus-src-alpha
    backend.set_fog_mode(0);
    backend.set_texture_mode(0);
    backend.set_color_path(COMBINE_ITERATED);
    backend.update_pipeline_state(
        FbzMode::DEFAULT_BITS | FbzMode::DITHER.bits(),
        AlphaMode::BLEND_ENABLE.bits() | 1 << ALPHA_SRC_RGB_SHIFT | 5 << ALPHA_DST_RGB_SHIFT,
    );
    backend.flush_triangles(&[Triangle::new(
        Vertex::new(w * 0.5, h * 0.1, 0.05, [1.0, 0.1, 0.1, 0.85]),
        Vertex::new(w * 0.85, h * 0.8, 0.05, [0.1, 1.0, 0.1, 0.85]),
        Vertex::new(w * 0.15, h * 0.8, 0.05, [0.1, 0.1, 1.0, 0.85]),
    )]);

    backend.swap(false);
    Ok(())
}

fn write_ppm(path: &Path, frame: &FramebufferData) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P6\n{} {}\n255\n", frame.width, frame.height)?;
    for px in frame.pixels.chunks_exact(4) {
        out.write_all(&px[..3])?;
    }
    out.flush()
}
