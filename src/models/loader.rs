//! Model and vocabulary file loading.

use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::vocab::{VocabBackend, VocabSpec};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid model format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Basic file metadata.
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub name: String,
    pub size_bytes: u64,
}

impl ModelMetadata {
    pub fn read(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let size_bytes = std::fs::metadata(path)?.len();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(Self { name, size_bytes })
    }
}

/// Memory-mapped file for zero-copy reads.
pub struct MappedFile {
    mmap: Mmap,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
            _ => LoadError::Io(e),
        })?;
        // SAFETY: File is opened read-only and not modified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// Load a JSON vocabulary file into a vocabulary-only backend.
pub fn load_vocab(path: impl AsRef<Path>) -> Result<VocabBackend, LoadError> {
    let path = path.as_ref();
    let mapped = MappedFile::open(path)?;
    let spec: VocabSpec = serde_json::from_slice(mapped.as_bytes())
        .map_err(|e| LoadError::InvalidFormat(format!("{}: {e}", path.display())))?;
    let backend = VocabBackend::from_spec(spec)?;
    info!(
        path = %path.display(),
        model = %backend.name(),
        n_vocab = backend.len(),
        "vocabulary loaded"
    );
    Ok(backend)
}

/// Load a GGUF model through llama.cpp.
#[cfg(feature = "gguf")]
pub fn load_gguf(
    path: impl AsRef<Path>,
    config: &crate::engine::GgufConfig,
) -> Result<crate::engine::GgufBackend, LoadError> {
    let path = path.as_ref();
    let meta = ModelMetadata::read(path)?;
    if meta.size_bytes < 4 {
        return Err(LoadError::InvalidFormat(format!("{} is too small", path.display())));
    }
    let mapped = MappedFile::open(path)?;
    if &mapped.as_bytes()[..4] != b"GGUF" {
        return Err(LoadError::InvalidFormat(format!("{} is not a GGUF file", path.display())));
    }
    drop(mapped);
    crate::engine::GgufBackend::load(path, config).map_err(|e| LoadError::Backend(e.to_string()))
}
