//! SPIR-V for the Vulkan backend
//!
//! The shading program lives in `shaders/` as GLSL. `build.rs` compiles it
//! with naga and the result is embedded here; a `shader_dir` in the config
//! overrides the embedded copy. Without usable binaries the Vulkan backend
//! stays on the software path.
//!
//! The fragment stage optionally comes in a second build that writes a
//! second blend source, used only on devices with `dualSrcBlend`.

use std::fs::File;
use std::io::{self, Cursor};
use std::path::Path;

pub const VERTEX_SHADER_FILE: &str = "voodoo.vert.spv";
pub const FRAGMENT_SHADER_FILE: &str = "voodoo.frag.spv";
pub const DUAL_FRAGMENT_SHADER_FILE: &str = "voodoo.frag.dual.spv";

/// Empty when the build could not compile the GLSL
const EMBEDDED_VERTEX: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/voodoo.vert.spv"));
const EMBEDDED_FRAGMENT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/voodoo.frag.spv"));
const EMBEDDED_DUAL_FRAGMENT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/voodoo.frag.dual.spv"));

const SPIRV_HEADER_WORDS: usize = 5;
const OP_DECORATE: u32 = 71;
const DECORATION_INDEX: u32 = 32;

/// One validated SPIR-V module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpirVModule {
    pub words: Vec<u32>,
}

impl SpirVModule {
    /// Parse SPIR-V from raw bytes, validating magic and alignment
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
        Ok(Self { words })
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let words = ash::util::read_spv(&mut file)?;
        Ok(Self { words })
    }

    /// True if any `OpDecorate` applies `decoration`
    fn has_decoration(&self, decoration: u32) -> bool {
        let mut at = SPIRV_HEADER_WORDS;
        while let Some(&word) = self.words.get(at) {
            if word & 0xFFFF == OP_DECORATE && self.words.get(at + 2) == Some(&decoration) {
                return true;
            }
            let count = (word >> 16) as usize;
            if count == 0 {
                break;
            }
            at += count;
        }
        false
    }
}

/// Vertex and fragment stages of the rendering program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinaries {
    pub vertex: SpirVModule,
    pub fragment: SpirVModule,
    /// Fragment stage with a second blend source, if one was built
    pub dual_fragment: Option<SpirVModule>,
}

impl ShaderBinaries {
    /// Load `voodoo.vert.spv` and `voodoo.frag.spv` from `dir`, plus
    /// `voodoo.frag.dual.spv` when present
    pub fn load_from_dir(dir: &Path) -> io::Result<Self> {
        let dual_path = dir.join(DUAL_FRAGMENT_SHADER_FILE);
        let dual_fragment = if dual_path.exists() {
            Some(SpirVModule::load(&dual_path)?)
        } else {
            None
        };
        Ok(Self {
            vertex: SpirVModule::load(&dir.join(VERTEX_SHADER_FILE))?,
            fragment: SpirVModule::load(&dir.join(FRAGMENT_SHADER_FILE))?,
            dual_fragment,
        })
    }

    pub fn from_bytes(vertex: &[u8], fragment: &[u8]) -> io::Result<Self> {
        Ok(Self {
            vertex: SpirVModule::from_bytes(vertex)?,
            fragment: SpirVModule::from_bytes(fragment)?,
            dual_fragment: None,
        })
    }

    /// The program compiled at build time, if the build managed to compile it
    pub fn embedded() -> Option<Self> {
        if EMBEDDED_VERTEX.is_empty() || EMBEDDED_FRAGMENT.is_empty() {
            return None;
        }
        let mut binaries = Self::from_bytes(EMBEDDED_VERTEX, EMBEDDED_FRAGMENT).ok()?;
        if !EMBEDDED_DUAL_FRAGMENT.is_empty() {
            binaries.dual_fragment = SpirVModule::from_bytes(EMBEDDED_DUAL_FRAGMENT).ok();
        }
        Some(binaries)
    }

    /// Whether a fragment stage writing a second blend source
    /// (`layout(location = 0, index = 1)`) is available
    pub fn dual_source(&self) -> bool {
        self.dual_fragment
            .as_ref()
            .is_some_and(|module| module.has_decoration(DECORATION_INDEX))
    }

    /// Fragment stage for a device, and whether it is the dual-source build
    pub fn fragment_for(&self, dual_source_blend: bool) -> (&SpirVModule, bool) {
        match &self.dual_fragment {
            Some(module) if dual_source_blend && self.dual_source() => (module, true),
            _ => (&self.fragment, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Header-only module: magic, version 1.0, generator, bound, schema
    fn header_words() -> Vec<u32> {
        vec![0x0723_0203, 0x0001_0000, 0, 8, 0]
    }

    fn to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_from_bytes() {
        let module = SpirVModule::from_bytes(&to_bytes(&header_words())).unwrap();
        assert_eq!(module.words, header_words());
    }

    #[test]
    fn test_rejects_misaligned() {
        assert!(SpirVModule::from_bytes(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn test_rejects_bad_magic() {
        assert!(SpirVModule::from_bytes(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_missing_dir() {
        let dir = std::env::temp_dir().join("vh-gpu-no-such-shader-dir");
        assert!(ShaderBinaries::load_from_dir(&dir).is_err());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = std::env::temp_dir().join(format!("vh-gpu-shaders-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(VERTEX_SHADER_FILE), to_bytes(&header_words())).unwrap();
        std::fs::write(dir.join(FRAGMENT_SHADER_FILE), to_bytes(&header_words())).unwrap();

        let binaries = ShaderBinaries::load_from_dir(&dir).unwrap();
        assert_eq!(binaries.vertex.words.len(), SPIRV_HEADER_WORDS);
        assert_eq!(binaries.dual_fragment, None);
        assert!(!binaries.dual_source());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_dual_source_detection() {
        let mut words = header_words();
        // OpDecorate %7 Location 0
        words.extend([4 << 16 | OP_DECORATE, 7, 30, 0]);
        let single = SpirVModule { words: words.clone() };
        // OpDecorate %7 Index 1
        words.extend([4 << 16 | OP_DECORATE, 7, DECORATION_INDEX, 1]);
        let dual = SpirVModule { words };

        let mut binaries = ShaderBinaries {
            vertex: SpirVModule { words: header_words() },
            fragment: single.clone(),
            dual_fragment: Some(single.clone()),
        };
        assert!(!binaries.dual_source());
        assert_eq!(binaries.fragment_for(true), (&single, false));

        binaries.dual_fragment = Some(dual.clone());
        assert!(binaries.dual_source());
        assert_eq!(binaries.fragment_for(true), (&dual, true));
        // Devices without dualSrcBlend get the single-output build
        assert_eq!(binaries.fragment_for(false), (&single, false));
    }

    #[test]
    fn test_embedded_program_parses_when_present() {
        // The build leaves the embedded files empty when naga rejects the GLSL
        if EMBEDDED_VERTEX.is_empty() {
            assert!(ShaderBinaries::embedded().is_none());
            return;
        }
        let binaries = ShaderBinaries::embedded().unwrap();
        assert_eq!(binaries.vertex.words[0], 0x0723_0203);
        assert_eq!(binaries.fragment.words[0], 0x0723_0203);
    }
}
