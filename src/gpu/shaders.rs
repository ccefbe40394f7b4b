use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};

/// The vertex and fragment stages, embedded as WGSL source and translated
/// to SPIR-V when the backend initializes. Both entry points live in the
/// same module.
pub const SHADER_SOURCE: &str = include_str!("../../shaders/ariel.wgsl");

pub const VERTEX_ENTRY: &[u8] = b"vs_main\0";
pub const FRAGMENT_ENTRY: &[u8] = b"fs_main\0";

/// Translate the embedded WGSL to SPIR-V. A translation failure is a
/// backend-init failure, which the engine answers by degrading to the
/// software rasterizer.
pub fn compile_shaders() -> Result<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(SHADER_SOURCE)
        .map_err(|e| anyhow!("{}", e.emit_to_string(SHADER_SOURCE)))?;

    // Push constants are gated behind a capability; validation is
    // otherwise kept permissive, the source is fixed at build time.
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::empty(),
        naga::valid::Capabilities::PUSH_CONSTANT,
    )
    .validate(&module)?;

    let spirv = naga::back::spv::write_vec(
        &module,
        &info,
        &naga::back::spv::Options {
            flags: naga::back::spv::WriterFlags::empty(),
            ..Default::default()
        },
        None,
    )?;

    Ok(spirv)
}

pub unsafe fn create_shader_module(device: &Device, code: &[u32]) -> Result<vk::ShaderModule> {
    // Shader modules are a thin wrapper around the SPIR-V words; the info
    // struct takes the size in bytes and the word slice.
    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(code.len() * 4)
        .code(code);

    Ok(device.create_shader_module(&info, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_shaders_translate() {
        let spirv = compile_shaders().unwrap();
        // 0x07230203 is the SPIR-V magic number.
        assert_eq!(spirv[0], 0x0723_0203);
    }
}
