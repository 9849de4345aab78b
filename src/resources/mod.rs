use std::path::PathBuf;

/// Supplies raw bytes for the built-in images the app uploads.
pub trait ResourceProvider: Send + Sync {
    fn load(&self, name: &str) -> Option<Vec<u8>>;
}

/// Reads resources from a directory on disk.
pub struct DirResources {
    dir: PathBuf,
}

impl DirResources {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ResourceProvider for DirResources {
    fn load(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(
                    filename = %name,
                    path = %path.display(),
                    error = %err,
                    "resource unavailable"
                );
                None
            }
        }
    }
}
