//! First-run copy of the image-baked application tree into the volume
//!
//! The marker file is copied after everything else, so its presence means
//! the previous copy ran to completion. An interrupted copy leaves the
//! volume cold and the next start copies again over the partial tree.

use crate::error::{BootstrapError, SeedCopySnafu, SeedMissingSnafu};
use crate::volume::VolumeLayout;
use snafu::{ResultExt, ensure};
use std::fs;
use std::path::Path;

/// What the seed check found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedStatus {
    /// Marker was present; nothing copied
    AlreadySeeded,
    /// Volume was cold; `files` entries copied
    Copied { files: u64 },
}

/// Check for the marker and copy the seed tree when it is absent
pub fn ensure_seeded(
    layout: &VolumeLayout,
    seed: &Path,
    marker: &str,
) -> Result<SeedStatus, BootstrapError> {
    let marker_path = layout.join(marker);
    if marker_path.exists() {
        return Ok(SeedStatus::AlreadySeeded);
    }

    ensure!(seed.is_dir(), SeedMissingSnafu { path: seed });

    let seed_marker = seed.join(marker);
    ensure!(
        seed_marker.is_file(),
        SeedMissingSnafu { path: seed_marker.clone() }
    );

    tracing::info!(
        seed = %seed.display(),
        volume = %layout.root().display(),
        "volume is cold, copying seed tree"
    );

    fs::create_dir_all(layout.root()).context(SeedCopySnafu {
        from: seed,
        to: layout.root(),
    })?;

    let mut files = copy_tree(seed, layout.root(), Some(&seed_marker))?;

    replace_file(&seed_marker, &marker_path)?;
    files += 1;

    tracing::info!(files, "seed copy complete");
    Ok(SeedStatus::Copied { files })
}

/// Recursively copy `from` into `to`, skipping `exclude`
///
/// Existing files are replaced. Symlinks are recreated rather than
/// followed; virtualenvs link their interpreter outside the tree.
fn copy_tree(from: &Path, to: &Path, exclude: Option<&Path>) -> Result<u64, BootstrapError> {
    let mut copied = 0;

    let entries = fs::read_dir(from).context(SeedCopySnafu { from, to })?;
    for entry in entries {
        let entry = entry.context(SeedCopySnafu { from, to })?;
        let src = entry.path();
        if exclude == Some(src.as_path()) {
            continue;
        }
        let dest = to.join(entry.file_name());
        let file_type = entry.file_type().context(SeedCopySnafu {
            from: src.clone(),
            to: dest.clone(),
        })?;

        if file_type.is_symlink() {
            copy_symlink(&src, &dest)?;
            copied += 1;
        } else if file_type.is_dir() {
            fs::create_dir_all(&dest).context(SeedCopySnafu {
                from: src.clone(),
                to: dest.clone(),
            })?;
            copied += copy_tree(&src, &dest, exclude)?;
        } else {
            replace_file(&src, &dest)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Copy a regular file, unlinking whatever a previous attempt left at `dest`
///
/// `fs::copy` opens an existing destination for writing, which fails on
/// read-only files such as git pack files.
fn replace_file(src: &Path, dest: &Path) -> Result<(), BootstrapError> {
    if dest.symlink_metadata().is_ok() {
        fs::remove_file(dest).context(SeedCopySnafu { from: src, to: dest })?;
    }
    fs::copy(src, dest)
        .map(|_| ())
        .context(SeedCopySnafu { from: src, to: dest })
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<(), BootstrapError> {
    let target = fs::read_link(src).context(SeedCopySnafu { from: src, to: dest })?;
    if dest.symlink_metadata().is_ok() {
        fs::remove_file(dest).context(SeedCopySnafu { from: src, to: dest })?;
    }
    std::os::unix::fs::symlink(&target, dest).context(SeedCopySnafu { from: src, to: dest })
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<(), BootstrapError> {
    fs::copy(src, dest)
        .map(|_| ())
        .context(SeedCopySnafu { from: src, to: dest })
}
