//! Output tree management.
//!
//! Artifacts land in `<root>/<os>_<arch>/<artifact>`. The root is removed at
//! the start of every run so the tree only ever holds the current run's
//! artifacts.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::matrix::BuildTarget;
use crate::output;

/// Default output root, relative to the project directory.
pub const DEFAULT_OUTPUT_DIR: &str = "dist";

/// Remove the output root and everything under it.
///
/// Returns `Ok(false)` without printing anything when the root does not exist.
/// A failed removal is an error; the caller treats it as fatal.
pub fn clear_previous_builds(root: &Path) -> Result<bool> {
    let metadata = match std::fs::symlink_metadata(root) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to inspect output directory {}", root.display()));
        }
    };

    output::action("Clearing", &format!("old builds in {}", root.display()));
    // A symlink is removed itself, never the directory it points to.
    let removed = if metadata.is_dir() {
        std::fs::remove_dir_all(root)
    } else {
        std::fs::remove_file(root)
    };
    removed.with_context(|| format!("failed to remove old builds at {}", root.display()))?;
    Ok(true)
}

/// Output subdirectory for a target: `<root>/<os>_<arch>`.
pub fn target_dir(root: &Path, target: &BuildTarget) -> PathBuf {
    root.join(target.platform())
}

/// Create the output subdirectory for a target, including the root.
pub fn create_target_dir(root: &Path, target: &BuildTarget) -> Result<PathBuf> {
    let dir = target_dir(root, target);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(dir)
}

/// Move `source` to `dest`.
///
/// Hard-links `source` to `dest` and then removes `source`. If linking fails
/// (different filesystems, or links not permitted) the file is copied instead.
/// If `source` cannot be removed afterwards the artifact is still in place, so
/// that only produces a note.
pub fn relocate_artifact(source: &Path, dest: &Path) -> Result<()> {
    if !source.is_file() {
        bail!(
            "expected build artifact at {} but none was produced",
            source.display()
        );
    }

    if let Err(link_err) = std::fs::hard_link(source, dest) {
        output::verbose(&format!(
            "hard link {} -> {} failed ({link_err}); copying instead",
            source.display(),
            dest.display()
        ));
        std::fs::copy(source, dest).with_context(|| {
            format!(
                "failed to move {} to {} (link failed: {link_err})",
                source.display(),
                dest.display()
            )
        })?;
    }

    if let Err(e) = std::fs::remove_file(source) {
        output::note(&format!(
            "artifact moved to {} but {} could not be removed: {e}",
            dest.display(),
            source.display()
        ));
    }
    Ok(())
}
