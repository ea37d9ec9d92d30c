// Shader resources
//
// Compiled shaders live on disk as `<shader_dir>/<name>.spv` and are read
// as opaque bytes. The renderer core decodes them; nothing here looks
// inside.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Caller-side mistakes and I/O failures at the resource boundary.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("resource `{0}` is already loaded")]
    AlreadyLoaded(String),

    #[error("resource `{0}` has not been loaded")]
    NotLoaded(String),

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ResourceResult<T> = std::result::Result<T, ResourceError>;

/// Read a whole file as bytes.
pub fn read_file_binary(path: impl AsRef<Path>) -> ResourceResult<Vec<u8>> {
    let path = path.as_ref();

    std::fs::read(path).map_err(|source| ResourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Path of the compiled shader with this logical name.
pub fn shader_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.spv"))
}

/// Read `<dir>/<name>.spv`.
pub fn read_shader_binary(dir: impl AsRef<Path>, name: &str) -> ResourceResult<Vec<u8>> {
    read_file_binary(shader_path(dir.as_ref(), name))
}

/// Shader bytecode cached by logical name, loaded once.
#[derive(Debug)]
pub struct ShaderLibrary {
    dir: PathBuf,
    loaded: HashMap<String, Vec<u8>>,
}

impl ShaderLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a shader into the library. Loading the same name twice is a
    /// caller error.
    pub fn load(&mut self, name: &str) -> ResourceResult<&[u8]> {
        if self.loaded.contains_key(name) {
            return Err(ResourceError::AlreadyLoaded(name.to_string()));
        }

        let bytes = read_shader_binary(&self.dir, name)?;
        log::debug!("Loaded shader `{}` ({} bytes)", name, bytes.len());

        Ok(self.loaded.entry(name.to_string()).or_insert(bytes).as_slice())
    }

    /// Bytecode of a shader loaded earlier.
    pub fn get(&self, name: &str) -> ResourceResult<&[u8]> {
        self.loaded
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ResourceError::NotLoaded(name.to_string()))
    }

    pub fn get_or_load(&mut self, name: &str) -> ResourceResult<&[u8]> {
        if self.loaded.contains_key(name) {
            return self.get(name);
        }
        self.load(name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }
}
