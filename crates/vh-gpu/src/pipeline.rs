//! Pipeline state translation
//!
//! Maps `fbzMode`/`alphaMode` onto the fixed-function state baked into a
//! Vulkan pipeline. Everything evaluated per fragment (color combine, fog,
//! chroma key, alpha test, dither) travels in push constants instead and
//! is deliberately absent from [`PipelineKey`].

use ash::vk;

use crate::regs::{AlphaMode, BlendFactor, CompareFunc, FbzMode, FBZ_DEPTH_FUNC_SHIFT};

/// Canonical fixed-function configuration; one Vulkan pipeline per distinct key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunc,
    /// `fbzMode` RGB write mask, baked into the color write mask
    pub color_write: bool,
    pub blend_enable: bool,
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

impl PipelineKey {
    /// Derive the key from raw mode registers
    pub fn from_registers(fbz_mode: u32, alpha_mode: u32) -> Self {
        let fbz = FbzMode::from_raw(fbz_mode);
        let alpha = AlphaMode::from_raw(alpha_mode);
        let blend_enable = alpha.contains(AlphaMode::BLEND_ENABLE);
        let (src_factor, dst_factor) = if blend_enable {
            (
                BlendFactor::from_bits(alpha.src_factor_bits()),
                BlendFactor::from_bits(alpha.dst_factor_bits()),
            )
        } else {
            (BlendFactor::One, BlendFactor::Zero)
        };

        Self {
            depth_test: fbz.contains(FbzMode::DEPTH_ENABLE),
            depth_write: fbz.contains(FbzMode::DEPTH_WRITE),
            depth_compare: fbz.depth_function(),
            color_write: fbz.contains(FbzMode::RGB_WRITE),
            blend_enable,
            src_factor,
            dst_factor,
        }
    }

    /// Depth value a clear must write so any rendered fragment beats it
    pub fn depth_clear_value(&self, high: f32) -> f32 {
        if self.depth_compare.clears_to_low() {
            0.0
        } else {
            high
        }
    }

    pub fn vk_depth_compare(&self) -> vk::CompareOp {
        depth_compare_to_vk(self.depth_compare as u32)
    }

    /// Source and destination blend factors. With `dual_source` the
    /// source-color factors read the fragment shader's second output.
    pub fn vk_blend_factors(&self, dual_source: bool) -> (vk::BlendFactor, vk::BlendFactor) {
        (
            blend_factor_to_vk(self.src_factor as u32, dual_source),
            blend_factor_to_vk(self.dst_factor as u32, dual_source),
        )
    }

    /// Whether this key blends by source color, which needs a second blend source
    pub fn uses_source_color(&self) -> bool {
        self.blend_enable
            && [self.src_factor, self.dst_factor]
                .iter()
                .any(|f| matches!(f, BlendFactor::Color | BlendFactor::InvColor))
    }
}

impl Default for PipelineKey {
    fn default() -> Self {
        Self::from_registers(FbzMode::DEFAULT_BITS, 0)
    }
}

/// The chip's compare ordering is VkCompareOp's; out-of-range selectors become ALWAYS
pub fn depth_compare_to_vk(func: u32) -> vk::CompareOp {
    if func <= vk::CompareOp::ALWAYS.as_raw() as u32 {
        vk::CompareOp::from_raw(func as i32)
    } else {
        vk::CompareOp::ALWAYS
    }
}

/// Chip blend-factor encoding to Vulkan; undefined encodings become ONE.
///
/// The source-color factors (2 and 6) map to the second blend source when
/// the device and shader provide one, otherwise to the blend constants,
/// which are never set and read as zero.
pub fn blend_factor_to_vk(factor: u32, dual_source: bool) -> vk::BlendFactor {
    match factor {
        0 => vk::BlendFactor::ZERO,
        1 => vk::BlendFactor::SRC_ALPHA,
        2 if dual_source => vk::BlendFactor::SRC1_COLOR,
        2 => vk::BlendFactor::CONSTANT_COLOR,
        3 => vk::BlendFactor::DST_ALPHA,
        4 => vk::BlendFactor::ONE,
        5 => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        6 if dual_source => vk::BlendFactor::ONE_MINUS_SRC1_COLOR,
        6 => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        7 => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        15 => vk::BlendFactor::SRC_ALPHA_SATURATE,
        _ => vk::BlendFactor::ONE,
    }
}

/// Raw `fbzMode` with only the depth function replaced
pub fn with_depth_function(fbz_mode: u32, func: CompareFunc) -> u32 {
    (fbz_mode & !FbzMode::DEPTH_FUNC.bits()) | ((func as u32) << FBZ_DEPTH_FUNC_SHIFT)
}
