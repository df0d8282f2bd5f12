//! Voodoo Graphics rasterization pipeline
//!
//! Consumes triangle batches plus the chip's mode registers (`fbzMode`,
//! `alphaMode`, `fogMode`, `textureMode`, `fbzColorPath`) and produces RGBA8
//! frames. Two interchangeable backends sit behind [`RenderBackend`]: a
//! software reference rasterizer and a Vulkan renderer that falls back to
//! it when no usable GPU is present.

pub mod backend;
pub mod cache;
pub mod pipeline;
pub mod push_constants;
pub mod raster;
pub mod regs;
pub mod shader;
pub mod texture;
pub mod vertex;

pub use backend::vulkan::{BackendState, GPU_DEPTH_FAR};
pub use backend::{
    create_backend, probe_vulkan, AdapterInfo, FramebufferData, GpuError, RenderBackend, SoftwareBackend,
    VulkanBackend, VulkanLibrary,
};
pub use cache::{CacheStats, PipelineFactory, PipelineVariantCache};
pub use pipeline::PipelineKey;
pub use push_constants::PushConstants;
pub use raster::{Rasterizer, RenderState, Scissor, DEPTH_FAR};
pub use regs::{AlphaMode, BlendFactor, ColorCombine, CompareFunc, FbzMode, FogMode, TextureMode};
pub use shader::ShaderBinaries;
pub use texture::Texture;
pub use vertex::{GpuVertex, Triangle, Vertex};
