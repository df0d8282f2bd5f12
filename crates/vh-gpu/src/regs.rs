//! Mode register bit layouts
//!
//! `fbzMode`, `alphaMode`, `fogMode`, `textureMode`, `fbzColorPath` and
//! `chromaKey` arrive as raw 32-bit words from the register front-end. The
//! layouts below are a wire contract and must stay bit-exact.

use bitflags::bitflags;

bitflags! {
    /// `fbzMode`: framebuffer and depth-buffer control
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FbzMode: u32 {
        const CLIPPING = 1 << 0;
        const CHROMAKEY = 1 << 1;
        const STIPPLE = 1 << 2;
        const WBUFFER = 1 << 3;
        const DEPTH_ENABLE = 1 << 4;
        const DEPTH_FUNC = 7 << 5;
        const DITHER = 1 << 8;
        const RGB_WRITE = 1 << 9;
        const DEPTH_WRITE = 1 << 10;
        const DITHER_2X2 = 1 << 11;
        const ALPHA_WRITE = 1 << 12;
        const DRAW_FRONT = 1 << 14;
        const DRAW_BACK = 1 << 15;
        const Y_ORIGIN = 1 << 17;
    }
}

pub const FBZ_DEPTH_FUNC_SHIFT: u32 = 5;

impl FbzMode {
    /// Register value after reset: depth test LESS with depth and RGB writes on
    pub const DEFAULT_BITS: u32 = Self::DEPTH_ENABLE.bits()
        | Self::RGB_WRITE.bits()
        | Self::DEPTH_WRITE.bits()
        | ((CompareFunc::Less as u32) << FBZ_DEPTH_FUNC_SHIFT);

    pub fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    pub fn depth_function(self) -> CompareFunc {
        CompareFunc::from_bits(self.bits() >> FBZ_DEPTH_FUNC_SHIFT)
    }
}

impl Default for FbzMode {
    fn default() -> Self {
        Self::from_raw(Self::DEFAULT_BITS)
    }
}

bitflags! {
    /// `alphaMode`: alpha test and alpha blending control
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AlphaMode: u32 {
        const TEST_ENABLE = 1 << 0;
        const TEST_FUNC = 7 << 1;
        const BLEND_ENABLE = 1 << 4;
        const ANTIALIAS = 1 << 5;
        const SRC_RGB = 0xF << 8;
        const DST_RGB = 0xF << 12;
        const SRC_A = 0xF << 16;
        const DST_A = 0xF << 20;
        const REFERENCE = 0xFF << 24;
    }
}

pub const ALPHA_FUNC_SHIFT: u32 = 1;
pub const ALPHA_SRC_RGB_SHIFT: u32 = 8;
pub const ALPHA_DST_RGB_SHIFT: u32 = 12;
pub const ALPHA_REF_SHIFT: u32 = 24;

impl AlphaMode {
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    pub fn test_function(self) -> CompareFunc {
        CompareFunc::from_bits(self.bits() >> ALPHA_FUNC_SHIFT)
    }

    /// Raw 4-bit source RGB blend factor field
    pub fn src_factor_bits(self) -> u32 {
        (self.bits() >> ALPHA_SRC_RGB_SHIFT) & 0xF
    }

    /// Raw 4-bit destination RGB blend factor field
    pub fn dst_factor_bits(self) -> u32 {
        (self.bits() >> ALPHA_DST_RGB_SHIFT) & 0xF
    }

    /// Alpha test reference, normalized to [0,1]
    pub fn reference(self) -> f32 {
        ((self.bits() >> ALPHA_REF_SHIFT) & 0xFF) as f32 / 255.0
    }
}

bitflags! {
    /// `fogMode`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FogMode: u32 {
        const ENABLE = 1 << 0;
        const ADD = 1 << 1;
        const MULT = 1 << 2;
        const ZALPHA = 1 << 3;
        const CONSTANT = 1 << 4;
        const DITHER = 1 << 5;
        const ZONES = 1 << 6;
    }
}

bitflags! {
    /// `textureMode`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureMode: u32 {
        const ENABLE = 1 << 0;
        const MINIFY = 7 << 1;
        /// Bilinear magnification (point sampling when clear)
        const MAGNIFY = 1 << 4;
        const CLAMP_S = 1 << 5;
        const CLAMP_T = 1 << 6;
    }
}

impl TextureMode {
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    pub fn bilinear(self) -> bool {
        self.contains(Self::MAGNIFY)
    }
}

impl Default for TextureMode {
    fn default() -> Self {
        Self::ENABLE
    }
}

/// The chip's 3-bit compare selector, shared by depth and alpha tests.
///
/// Numbering matches `VkCompareOp` one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CompareFunc {
    Never = 0,
    Less = 1,
    Equal = 2,
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    Always = 7,
}

impl CompareFunc {
    pub const ALL: [CompareFunc; 8] = [
        CompareFunc::Never,
        CompareFunc::Less,
        CompareFunc::Equal,
        CompareFunc::LessEqual,
        CompareFunc::Greater,
        CompareFunc::NotEqual,
        CompareFunc::GreaterEqual,
        CompareFunc::Always,
    ];

    /// Decode the low three bits of `bits`
    pub fn from_bits(bits: u32) -> Self {
        Self::ALL[(bits & 7) as usize]
    }

    /// Evaluate `new <op> old`
    pub fn passes(self, new: f32, old: f32) -> bool {
        match self {
            CompareFunc::Never => false,
            CompareFunc::Less => new < old,
            CompareFunc::Equal => new == old,
            CompareFunc::LessEqual => new <= old,
            CompareFunc::Greater => new > old,
            CompareFunc::NotEqual => new != old,
            CompareFunc::GreaterEqual => new >= old,
            CompareFunc::Always => true,
        }
    }

    /// True when a cleared depth plane must hold the low sentinel
    pub fn clears_to_low(self) -> bool {
        matches!(self, CompareFunc::Greater | CompareFunc::GreaterEqual)
    }
}

/// Blend factor encoding of the `alphaMode` source/destination fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlendFactor {
    Zero = 0,
    SrcAlpha = 1,
    /// Mean of the source RGB channels
    Color = 2,
    DstAlpha = 3,
    One = 4,
    InvSrcAlpha = 5,
    InvColor = 6,
    InvDstAlpha = 7,
    /// min(srcAlpha, 1 - dstAlpha)
    Saturate = 15,
}

impl BlendFactor {
    /// Decode a 4-bit factor field; encodings the chip leaves undefined act as ONE
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0xF {
            0 => BlendFactor::Zero,
            1 => BlendFactor::SrcAlpha,
            2 => BlendFactor::Color,
            3 => BlendFactor::DstAlpha,
            5 => BlendFactor::InvSrcAlpha,
            6 => BlendFactor::InvColor,
            7 => BlendFactor::InvDstAlpha,
            15 => BlendFactor::Saturate,
            _ => BlendFactor::One,
        }
    }

    /// Scalar weight for one blend operand
    pub fn weight(self, src: [f32; 4], dst: [f32; 4]) -> f32 {
        match self {
            BlendFactor::Zero => 0.0,
            BlendFactor::SrcAlpha => src[3],
            BlendFactor::Color => (src[0] + src[1] + src[2]) / 3.0,
            BlendFactor::DstAlpha => dst[3],
            BlendFactor::One => 1.0,
            BlendFactor::InvSrcAlpha => 1.0 - src[3],
            BlendFactor::InvColor => 1.0 - (src[0] + src[1] + src[2]) / 3.0,
            BlendFactor::InvDstAlpha => 1.0 - dst[3],
            BlendFactor::Saturate => src[3].min(1.0 - dst[3]),
        }
    }

    /// Weight applied to the alpha channel. Saturate is 1 there, as in
    /// `VK_BLEND_FACTOR_SRC_ALPHA_SATURATE`; every other factor matches [`Self::weight`].
    pub fn alpha_weight(self, src: [f32; 4], dst: [f32; 4]) -> f32 {
        match self {
            BlendFactor::Saturate => 1.0,
            _ => self.weight(src, dst),
        }
    }
}

// fbzColorPath

pub const FCP_RGB_SELECT_MASK: u32 = 0x3;
pub const FCP_CC_MSELECT_SHIFT: u32 = 4;
pub const FCP_CC_MSELECT_MASK: u32 = 0x7 << FCP_CC_MSELECT_SHIFT;
pub const FCP_TEXTURE_ENABLE: u32 = 1 << 27;

/// `rgbSelect` sources
pub const CC_ITERATED: u32 = 0;
pub const CC_TEXTURE: u32 = 1;
pub const CC_COLOR1: u32 = 2;
pub const CC_LFB: u32 = 3;

/// `cc_mselect` functions
pub const CC_ZERO: u32 = 0;
pub const CC_CSUB_CL: u32 = 1;
pub const CC_ALOCAL: u32 = 2;
pub const CC_AOTHER: u32 = 3;
pub const CC_CLOCAL: u32 = 4;
pub const CC_ALOCAL_T: u32 = 5;
pub const CC_CLOC_MUL: u32 = 6;
pub const CC_AOTHER_T: u32 = 7;

/// Convenience combine values recognized before the generic decode
pub const COMBINE_ITERATED: u32 = CC_ITERATED;
pub const COMBINE_TEXTURE: u32 = CC_TEXTURE;
pub const COMBINE_MODULATE: u32 = CC_TEXTURE | (CC_CLOC_MUL << FCP_CC_MSELECT_SHIFT);
pub const COMBINE_ADD: u32 = CC_TEXTURE | (0x08 << FCP_CC_MSELECT_SHIFT);
pub const COMBINE_SUBTRACT: u32 = CC_TEXTURE | (0x09 << FCP_CC_MSELECT_SHIFT);
pub const COMBINE_BLEND: u32 = CC_TEXTURE | (0x0A << FCP_CC_MSELECT_SHIFT);
pub const COMBINE_DECAL: u32 = CC_TEXTURE | (CC_CLOCAL << FCP_CC_MSELECT_SHIFT);
/// Pushed to the shader when no color path has been written
pub const COMBINE_UNSET: u32 = 0xFFFF_FFFF;

/// Resolved texture/vertex color combine rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorCombine {
    /// Vertex color only
    Iterated,
    /// Texture color only
    Texture,
    /// tex * vert
    Modulate,
    /// clamp(tex + vert)
    Add,
    /// clamp(tex - vert)
    Subtract,
    /// vert.rgb lerped toward tex.rgb by tex.a, vertex alpha kept
    Blend,
    /// Always black
    Zero,
    /// vert, ignoring the texture
    Local,
}

impl ColorCombine {
    /// Decode `fbzColorPath`; `None` means the register was never written
    pub fn from_color_path(path: Option<u32>) -> Self {
        let Some(mode) = path else {
            return ColorCombine::Modulate;
        };
        match mode {
            COMBINE_UNSET | COMBINE_MODULATE => return ColorCombine::Modulate,
            COMBINE_ADD => return ColorCombine::Add,
            COMBINE_SUBTRACT => return ColorCombine::Subtract,
            COMBINE_BLEND => return ColorCombine::Blend,
            _ => {}
        }
        match mode & FCP_RGB_SELECT_MASK {
            CC_ITERATED => ColorCombine::Iterated,
            CC_TEXTURE => ColorCombine::Texture,
            _ => match (mode & FCP_CC_MSELECT_MASK) >> FCP_CC_MSELECT_SHIFT {
                CC_ZERO => ColorCombine::Zero,
                CC_CSUB_CL => ColorCombine::Subtract,
                CC_CLOCAL => ColorCombine::Local,
                _ => ColorCombine::Modulate,
            },
        }
    }

    pub fn apply(self, vert: [f32; 4], tex: [f32; 4]) -> [f32; 4] {
        match self {
            ColorCombine::Iterated | ColorCombine::Local => vert,
            ColorCombine::Texture => tex,
            ColorCombine::Modulate => std::array::from_fn(|i| tex[i] * vert[i]),
            ColorCombine::Add => std::array::from_fn(|i| (tex[i] + vert[i]).min(1.0)),
            ColorCombine::Subtract => std::array::from_fn(|i| (tex[i] - vert[i]).max(0.0)),
            ColorCombine::Blend => {
                let t = tex[3];
                [
                    vert[0] + (tex[0] - vert[0]) * t,
                    vert[1] + (tex[1] - vert[1]) * t,
                    vert[2] + (tex[2] - vert[2]) * t,
                    vert[3],
                ]
            }
            ColorCombine::Zero => [0.0; 4],
        }
    }
}

/// Unpack a 24-bit `0x00RRGGBB` word into normalized RGB
pub fn unpack_rgb(word: u32) -> [f32; 3] {
    [
        ((word >> 16) & 0xFF) as f32 / 255.0,
        ((word >> 8) & 0xFF) as f32 / 255.0,
        (word & 0xFF) as f32 / 255.0,
    ]
}

/// Unpack an `0xAARRGGBB` clear color into RGBA bytes, treating alpha 0 as opaque
pub fn unpack_clear_color(argb: u32) -> [u8; 4] {
    let a = (argb >> 24) as u8;
    [
        (argb >> 16) as u8,
        (argb >> 8) as u8,
        argb as u8,
        if a == 0 { 0xFF } else { a },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fbz_mode() {
        let fbz = FbzMode::default();
        assert!(fbz.contains(FbzMode::DEPTH_ENABLE | FbzMode::RGB_WRITE | FbzMode::DEPTH_WRITE));
        assert_eq!(fbz.depth_function(), CompareFunc::Less);
        assert!(!fbz.contains(FbzMode::CLIPPING));
    }

    #[test]
    fn test_depth_function_field() {
        for func in CompareFunc::ALL {
            let fbz = FbzMode::from_raw((func as u32) << FBZ_DEPTH_FUNC_SHIFT);
            assert_eq!(fbz.depth_function(), func);
        }
    }

    #[test]
    fn test_alpha_mode_fields() {
        let alpha = AlphaMode::from_raw(
            AlphaMode::TEST_ENABLE.bits()
                | (CompareFunc::GreaterEqual as u32) << ALPHA_FUNC_SHIFT
                | 5 << ALPHA_SRC_RGB_SHIFT
                | 3 << ALPHA_DST_RGB_SHIFT
                | 0x80 << ALPHA_REF_SHIFT,
        );
        assert!(alpha.contains(AlphaMode::TEST_ENABLE));
        assert!(!alpha.contains(AlphaMode::BLEND_ENABLE));
        assert_eq!(alpha.test_function(), CompareFunc::GreaterEqual);
        assert_eq!(alpha.src_factor_bits(), 5);
        assert_eq!(alpha.dst_factor_bits(), 3);
        assert!((alpha.reference() - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_compare_table() {
        let cases = [
            (CompareFunc::Never, [false, false, false]),
            (CompareFunc::Less, [true, false, false]),
            (CompareFunc::Equal, [false, true, false]),
            (CompareFunc::LessEqual, [true, true, false]),
            (CompareFunc::Greater, [false, false, true]),
            (CompareFunc::NotEqual, [true, false, true]),
            (CompareFunc::GreaterEqual, [false, true, true]),
            (CompareFunc::Always, [true, true, true]),
        ];
        // new values below, equal to and above old = 0.5
        for (func, expected) in cases {
            let got = [
                func.passes(0.25, 0.5),
                func.passes(0.5, 0.5),
                func.passes(0.75, 0.5),
            ];
            assert_eq!(got, expected, "{func:?}");
        }
    }

    #[test]
    fn test_clear_sentinel_direction() {
        assert!(CompareFunc::Greater.clears_to_low());
        assert!(CompareFunc::GreaterEqual.clears_to_low());
        assert!(!CompareFunc::Less.clears_to_low());
        assert!(!CompareFunc::Always.clears_to_low());
    }

    #[test]
    fn test_blend_factor_decode() {
        assert_eq!(BlendFactor::from_bits(0), BlendFactor::Zero);
        assert_eq!(BlendFactor::from_bits(15), BlendFactor::Saturate);
        assert_eq!(BlendFactor::from_bits(9), BlendFactor::One);
    }

    #[test]
    fn test_blend_weights() {
        let src = [0.3, 0.6, 0.9, 0.25];
        let dst = [0.0, 0.0, 0.0, 0.5];
        assert_eq!(BlendFactor::Zero.weight(src, dst), 0.0);
        assert_eq!(BlendFactor::One.weight(src, dst), 1.0);
        assert_eq!(BlendFactor::SrcAlpha.weight(src, dst), 0.25);
        assert_eq!(BlendFactor::InvSrcAlpha.weight(src, dst), 0.75);
        assert_eq!(BlendFactor::DstAlpha.weight(src, dst), 0.5);
        assert_eq!(BlendFactor::InvDstAlpha.weight(src, dst), 0.5);
        assert!((BlendFactor::Color.weight(src, dst) - 0.6).abs() < 1e-6);
        assert!((BlendFactor::InvColor.weight(src, dst) - 0.4).abs() < 1e-6);
        assert_eq!(BlendFactor::Saturate.weight(src, dst), 0.25);
    }

    #[test]
    fn test_alpha_weights() {
        let src = [0.3, 0.6, 0.9, 0.25];
        let dst = [0.0, 0.0, 0.0, 0.5];
        assert_eq!(BlendFactor::Saturate.alpha_weight(src, dst), 1.0);
        assert_eq!(BlendFactor::SrcAlpha.alpha_weight(src, dst), 0.25);
        assert!((BlendFactor::Color.alpha_weight(src, dst) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_color_combine_decode() {
        assert_eq!(ColorCombine::from_color_path(None), ColorCombine::Modulate);
        assert_eq!(ColorCombine::from_color_path(Some(COMBINE_UNSET)), ColorCombine::Modulate);
        assert_eq!(ColorCombine::from_color_path(Some(COMBINE_ITERATED)), ColorCombine::Iterated);
        assert_eq!(ColorCombine::from_color_path(Some(COMBINE_TEXTURE)), ColorCombine::Texture);
        assert_eq!(ColorCombine::from_color_path(Some(COMBINE_MODULATE)), ColorCombine::Modulate);
        assert_eq!(ColorCombine::from_color_path(Some(COMBINE_ADD)), ColorCombine::Add);
        assert_eq!(ColorCombine::from_color_path(Some(COMBINE_SUBTRACT)), ColorCombine::Subtract);
        assert_eq!(ColorCombine::from_color_path(Some(COMBINE_BLEND)), ColorCombine::Blend);
        // DECAL has rgbSelect = texture, so it resolves as texture-only
        assert_eq!(ColorCombine::from_color_path(Some(COMBINE_DECAL)), ColorCombine::Texture);
    }

    #[test]
    fn test_color_combine_generic_family() {
        let generic = |msel: u32| Some(CC_COLOR1 | (msel << FCP_CC_MSELECT_SHIFT));
        assert_eq!(ColorCombine::from_color_path(generic(CC_ZERO)), ColorCombine::Zero);
        assert_eq!(ColorCombine::from_color_path(generic(CC_CSUB_CL)), ColorCombine::Subtract);
        assert_eq!(ColorCombine::from_color_path(generic(CC_CLOCAL)), ColorCombine::Local);
        assert_eq!(ColorCombine::from_color_path(generic(CC_CLOC_MUL)), ColorCombine::Modulate);
        assert_eq!(ColorCombine::from_color_path(generic(CC_AOTHER_T)), ColorCombine::Modulate);
    }

    fn assert_rgba_eq(got: [f32; 4], want: [f32; 4]) {
        for i in 0..4 {
            assert!((got[i] - want[i]).abs() < 1e-5, "{got:?} != {want:?}");
        }
    }

    #[test]
    fn test_color_combine_apply() {
        let vert = [0.5, 0.5, 0.5, 1.0];
        let tex = [0.8, 0.2, 1.0, 0.5];
        assert_eq!(ColorCombine::Iterated.apply(vert, tex), vert);
        assert_eq!(ColorCombine::Texture.apply(vert, tex), tex);
        assert_rgba_eq(ColorCombine::Modulate.apply(vert, tex), [0.4, 0.1, 0.5, 0.5]);
        assert_rgba_eq(ColorCombine::Add.apply(vert, tex), [1.0, 0.7, 1.0, 1.0]);
        assert_rgba_eq(ColorCombine::Subtract.apply(vert, tex), [0.3, 0.0, 0.5, 0.0]);
        assert_rgba_eq(ColorCombine::Blend.apply(vert, tex), [0.65, 0.35, 0.75, 1.0]);
        assert_eq!(ColorCombine::Zero.apply(vert, tex), [0.0; 4]);
    }

    #[test]
    fn test_unpack_clear_color() {
        assert_eq!(unpack_clear_color(0x00FF8040), [0xFF, 0x80, 0x40, 0xFF]);
        assert_eq!(unpack_clear_color(0x80102030), [0x10, 0x20, 0x30, 0x80]);
    }

    #[test]
    fn test_texture_mode_default() {
        let mode = TextureMode::default();
        assert!(mode.contains(TextureMode::ENABLE));
        assert!(!mode.bilinear());
        assert!(!mode.contains(TextureMode::CLAMP_S));
    }
}
