use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;

use super::TokenStore;

/// Stores each key as `<key>.json` inside a directory.
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(&['/', '\\'][..]) || key.starts_with('.') {
            bail!("Invalid storage key: {:?}", key);
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read storage file: {}", path.display()))?;
        Ok(Some(contents))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create storage directory: {}", self.dir.display()))?;

        // Write then rename so a concurrent reader never sees a half-written value
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .with_context(|| format!("Failed to write storage file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace storage file: {}", path.display()))?;
        debug!(key = key, "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove storage file: {}", path.display()))?;
            debug!(key = key, "Removed value");
        }
        Ok(())
    }
}
