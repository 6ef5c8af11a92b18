//! Directory repair for the volume skeleton
//!
//! Creates model-category and extension directories the web UI expects.

use crate::volume::VolumeLayout;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Result of skeleton repair
#[derive(Debug, Default)]
pub struct SkeletonResult {
    pub created: Vec<PathBuf>,
    pub already_existed: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, String)>,
}

impl SkeletonResult {
    /// Check if all directories were successfully created or existed
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get total count of directories processed
    pub fn total_count(&self) -> usize {
        self.created.len() + self.already_existed.len() + self.errors.len()
    }
}

/// Create a single directory with proper error handling
fn create_directory(path: &Path) -> Result<bool> {
    if path.exists() {
        if path.is_dir() {
            Ok(false) // Already exists
        } else {
            anyhow::bail!("Path exists but is not a directory: {}", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        Ok(true) // Newly created
    }
}

/// Ensure each volume-relative directory exists
pub fn repair_directories(layout: &VolumeLayout, directories: &[String]) -> SkeletonResult {
    let mut result = SkeletonResult::default();

    for relative in directories {
        let path = layout.join(relative);

        match create_directory(&path) {
            Ok(true) => {
                tracing::debug!(path = %path.display(), "created directory");
                result.created.push(path);
            }
            Ok(false) => {
                result.already_existed.push(path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "directory repair failed");
                result.errors.push((path, e.to_string()));
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs() -> Vec<String> {
        vec!["models/Lora".to_string(), "extensions".to_string()]
    }

    #[test]
    fn test_repair_creates_missing() {
        let volume = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());

        let result = repair_directories(&layout, &dirs());

        assert!(result.is_success());
        assert_eq!(result.created.len(), 2);
        assert!(volume.path().join("models/Lora").is_dir());
    }

    #[test]
    fn test_repair_is_idempotent() {
        let volume = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());
        repair_directories(&layout, &dirs());

        let result = repair_directories(&layout, &dirs());

        assert!(result.is_success());
        assert!(result.created.is_empty());
        assert_eq!(result.already_existed.len(), 2);
        assert_eq!(result.total_count(), 2);
    }

    #[test]
    fn test_file_in_the_way_is_reported() {
        let volume = tempfile::tempdir().unwrap();
        fs::write(volume.path().join("extensions"), "not a dir").unwrap();
        let layout = VolumeLayout::new(volume.path());

        let result = repair_directories(&layout, &dirs());

        assert!(!result.is_success());
        assert_eq!(result.errors.len(), 1);
        assert!(volume.path().join("models/Lora").is_dir());
    }
}
