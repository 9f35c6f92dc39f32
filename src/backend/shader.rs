// Shader module loading
//
// Compiled SPIR-V arrives as raw bytes from a loader; this module only
// checks that the bytes are SPIR-V words and turns them into modules.

use ash::vk;
use std::io;
use std::path::{Path, PathBuf};

use super::driver::GpuDriver;
use crate::error::{GfxError, GfxResult};

/// Supplies compiled shader bytes by logical name ("triangle.vert", "blur.comp", ...).
pub trait ShaderSource {
    fn load(&self, name: &str) -> io::Result<Vec<u8>>;
}

/// Reads `<dir>/<name>.spv`.
#[derive(Debug, Clone)]
pub struct DirectoryShaderSource {
    root: PathBuf,
}

impl DirectoryShaderSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.spv", name))
    }
}

impl ShaderSource for DirectoryShaderSource {
    fn load(&self, name: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.path_for(name))
    }
}

/// Decode SPIR-V bytes into aligned words.
///
/// Rejects lengths that are not a multiple of four and a wrong magic number.
pub fn decode_spirv(bytes: &[u8]) -> GfxResult<Vec<u32>> {
    let words = ash::util::read_spv(&mut io::Cursor::new(bytes))
        .map_err(|e| GfxError::InvalidShader(e.to_string()))?;
    match words.first() {
        Some(&magic) if magic == 0x0723_0203 => Ok(words),
        Some(&magic) => Err(GfxError::InvalidShader(format!(
            "bad magic number {:#010x}",
            magic
        ))),
        None => Err(GfxError::InvalidShader("empty shader binary".into())),
    }
}

pub fn create_shader_module<D: GpuDriver + ?Sized>(
    driver: &D,
    bytes: &[u8],
) -> GfxResult<vk::ShaderModule> {
    let words = decode_spirv(bytes)?;
    driver.create_shader_module(&words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv_header() -> Vec<u8> {
        [0x0723_0203u32, 0x0001_0300, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    #[test]
    fn decodes_valid_words() {
        let words = decode_spirv(&spirv_header()).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn rejects_truncated_and_foreign_bytes() {
        let mut truncated = spirv_header();
        truncated.pop();
        assert!(matches!(
            decode_spirv(&truncated),
            Err(GfxError::InvalidShader(_))
        ));
        assert!(decode_spirv(b"#version 450").is_err());
        assert!(decode_spirv(&[]).is_err());
    }

    #[test]
    fn directory_source_appends_spv() {
        let dir = std::env::temp_dir().join("gfx-device-shader-source");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("clear.comp.spv"), spirv_header()).unwrap();

        let source = DirectoryShaderSource::new(&dir);
        assert_eq!(source.load("clear.comp").unwrap(), spirv_header());
        assert!(source.load("missing").is_err());
    }
}
