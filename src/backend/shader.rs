// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. Files come in as raw bytes;
// this turns them into the aligned 32-bit words a shader module needs.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;

use super::error::RendererError;
use super::gpu::GpuDevice;

/// Decode SPIR-V bytes into words.
///
/// Byte buffers have no alignment guarantee, so the words are copied out
/// rather than reinterpreted in place. Big-endian modules are swapped.
pub fn spirv_words(code: &[u8]) -> Result<Vec<u32>> {
    if code.is_empty() || code.len() % 4 != 0 {
        return Err(RendererError::InvalidShaderCode { len: code.len() }.into());
    }

    ash::util::read_spv(&mut Cursor::new(code)).context("Failed to decode SPIR-V")
}

/// Create a shader module from SPIR-V bytes.
pub fn create_shader_module<D: GpuDevice>(device: &D, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = spirv_words(code)?;
    device.create_shader_module(&words)
}
