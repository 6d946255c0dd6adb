use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::ObjectStore;

/// Object store backed by a local directory
pub struct LocalObjectStore {
    directory: PathBuf,
}

impl LocalObjectStore {
    pub fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create output directory: {}", directory.display()))?;
        Ok(Self { directory })
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        if name.contains(['/', '\\']) {
            anyhow::bail!("Object name must not contain path separators: {}", name);
        }

        let path = self.directory.join(name);
        let tmp = self.directory.join(format!(".{}.tmp", name));
        fs::write(&tmp, &bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!(path = %path.display(), bytes = bytes.len(), "Wrote object");

        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        let meta = fs::metadata(&self.directory)
            .with_context(|| format!("Output directory missing: {}", self.directory.display()))?;
        if meta.permissions().readonly() {
            anyhow::bail!("Output directory is read-only: {}", self.directory.display());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.directory.display().to_string()
    }
}
