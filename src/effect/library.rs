//! Effect clip lookup

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory of effect clips addressed by loose name
#[derive(Debug, Clone)]
pub struct ClipLibrary {
    dir: PathBuf,
}

impl ClipLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory being searched
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names of every clip, sorted
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names.sort();
        Ok(names)
    }

    /// First clip whose file name contains `name`, ignoring case
    pub async fn find(&self, name: &str) -> Result<PathBuf> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return Err(Error::ClipNotFound(name.to_string()));
        }

        self.list()
            .await?
            .into_iter()
            .find(|file| file.to_lowercase().contains(&wanted))
            .map(|file| self.dir.join(file))
            .ok_or_else(|| Error::ClipNotFound(name.to_string()))
    }
}
