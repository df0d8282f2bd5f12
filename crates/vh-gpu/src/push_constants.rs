//! Per-draw constant block shared with the fragment shader
//!
//! Layout (32 bytes, little-endian), matching `shaders/voodoo.frag`:
//!
//! | offset | field          | type |
//! |--------|----------------|------|
//! | 0      | fbz_mode       | u32  |
//! | 4      | alpha_mode     | u32  |
//! | 8      | chroma_key     | u32  |
//! | 12     | fog_color      | u32  |
//! | 16     | fog_start      | f32  |
//! | 20     | fog_end        | f32  |
//! | 24     | color_combine  | u32  |
//! | 28     | texture_enable | u32  |

use crate::regs::{FogMode, TextureMode, COMBINE_UNSET};

pub const PUSH_CONSTANT_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PushConstants {
    pub fbz_mode: u32,
    pub alpha_mode: u32,
    pub chroma_key: u32,
    /// RGB in bits 0..24, low byte of `fogMode` in bits 24..32
    pub fog_color: u32,
    pub fog_start: f32,
    pub fog_end: f32,
    /// Raw `fbzColorPath`, or `COMBINE_UNSET`
    pub color_combine: u32,
    /// `textureMode` bits; bit 0 clear when nothing is bound
    pub texture_enable: u32,
}

impl PushConstants {
    /// Pack fog mode and color into the single pushed word
    pub fn pack_fog(mode: FogMode, color: u32) -> u32 {
        (color & 0x00FF_FFFF) | ((mode.bits() & 0xFF) << 24)
    }

    /// Texture word for the shader; texturing is forced off without a bound texture
    pub fn pack_texture(mode: TextureMode, bound: bool) -> u32 {
        if bound {
            mode.bits()
        } else {
            mode.bits() & !TextureMode::ENABLE.bits()
        }
    }

    pub fn pack_color_path(path: Option<u32>) -> u32 {
        path.unwrap_or(COMBINE_UNSET)
    }

    /// Serialize to the wire layout
    pub fn to_bytes(&self) -> [u8; PUSH_CONSTANT_SIZE] {
        let mut out = [0u8; PUSH_CONSTANT_SIZE];
        out[0..4].copy_from_slice(&self.fbz_mode.to_le_bytes());
        out[4..8].copy_from_slice(&self.alpha_mode.to_le_bytes());
        out[8..12].copy_from_slice(&self.chroma_key.to_le_bytes());
        out[12..16].copy_from_slice(&self.fog_color.to_le_bytes());
        out[16..20].copy_from_slice(&self.fog_start.to_le_bytes());
        out[20..24].copy_from_slice(&self.fog_end.to_le_bytes());
        out[24..28].copy_from_slice(&self.color_combine.to_le_bytes());
        out[28..32].copy_from_slice(&self.texture_enable.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_field_offsets() {
        let pc = PushConstants {
            fbz_mode: 0x0000_0610,
            alpha_mode: 0x8000_5411,
            chroma_key: 0x00FF_00FF,
            fog_color: 0x0180_8080,
            fog_start: 0.25,
            fog_end: 0.75,
            color_combine: 0x61,
            texture_enable: 1,
        };
        let bytes = pc.to_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(word(&bytes, 0), 0x0000_0610);
        assert_eq!(word(&bytes, 4), 0x8000_5411);
        assert_eq!(word(&bytes, 8), 0x00FF_00FF);
        assert_eq!(word(&bytes, 12), 0x0180_8080);
        assert_eq!(f32::from_bits(word(&bytes, 16)), 0.25);
        assert_eq!(f32::from_bits(word(&bytes, 20)), 0.75);
        assert_eq!(word(&bytes, 24), 0x61);
        assert_eq!(word(&bytes, 28), 1);
    }

    #[test]
    fn test_little_endian_bytes() {
        let pc = PushConstants {
            fbz_mode: 0x0403_0201,
            ..Default::default()
        };
        assert_eq!(&pc.to_bytes()[0..4], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_pack_fog() {
        assert_eq!(PushConstants::pack_fog(FogMode::ENABLE, 0xAA11_2233), 0x0111_2233);
        assert_eq!(PushConstants::pack_fog(FogMode::empty(), 0x0011_2233), 0x0011_2233);
    }

    #[test]
    fn test_pack_texture() {
        let mode = TextureMode::ENABLE | TextureMode::MAGNIFY;
        assert_eq!(PushConstants::pack_texture(mode, true), 0x11);
        assert_eq!(PushConstants::pack_texture(mode, false), 0x10);
    }

    #[test]
    fn test_pack_color_path() {
        assert_eq!(PushConstants::pack_color_path(None), COMBINE_UNSET);
        assert_eq!(PushConstants::pack_color_path(Some(0x81)), 0x81);
    }
}
