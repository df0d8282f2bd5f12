// build.rs
//
// Compiles shaders/voodoo.{vert,frag} to SPIR-V with naga and drops the
// words into OUT_DIR for `shader.rs` to embed. The fragment stage is built
// twice, once with a second blend output. A shader naga rejects is written
// as an empty file: the crate still builds and the Vulkan backend runs on
// its software path.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::ShaderStage;

fn compile(source: &str, stage: ShaderStage, defines: &[&str]) -> Result<Vec<u32>, String> {
    let mut options = glsl::Options::from(stage);
    for define in defines {
        options.defines.insert((*define).to_string(), "1".to_string());
    }
    let module = glsl::Frontend::default()
        .parse(&options, source)
        .map_err(|e| format!("parse: {e:?}"))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| format!("validate: {e:?}"))?;

    // Vertices are already in Vulkan NDC; no Y flip
    let spv_options = spv::Options {
        lang_version: (1, 0),
        flags: spv::WriterFlags::empty(),
        ..Default::default()
    };
    let pipeline = spv::PipelineOptions {
        shader_stage: stage,
        entry_point: "main".to_string(),
    };
    spv::write_vec(&module, &info, &spv_options, Some(&pipeline)).map_err(|e| format!("spv-out: {e:?}"))
}

fn write_words(path: &Path, words: &[u32]) {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    if let Err(e) = fs::write(path, bytes) {
        panic!("failed to write {}: {e}", path.display());
    }
}

fn build_stage(shader_dir: &Path, out_dir: &Path, name: &str, out_name: &str, stage: ShaderStage, defines: &[&str]) {
    let path = shader_dir.join(name);
    println!("cargo:rerun-if-changed={}", path.display());
    let out = out_dir.join(out_name);

    let words = fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))
        .and_then(|source| compile(&source, stage, defines));
    match words {
        Ok(words) => write_words(&out, &words),
        Err(e) => {
            println!("cargo:warning={out_name}: {e}");
            write_words(&out, &[]);
        }
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap_or_default());
    let shader_dir = manifest_dir.join("shaders");

    build_stage(&shader_dir, &out_dir, "voodoo.vert", "voodoo.vert.spv", ShaderStage::Vertex, &[]);
    build_stage(&shader_dir, &out_dir, "voodoo.frag", "voodoo.frag.spv", ShaderStage::Fragment, &[]);
    // Only usable on devices with dualSrcBlend
    build_stage(
        &shader_dir,
        &out_dir,
        "voodoo.frag",
        "voodoo.frag.dual.spv",
        ShaderStage::Fragment,
        &["DUAL_SOURCE"],
    );
}
