//! Per-task working directories.
//!
//! Each task gets its own directory under the temp root, named from the
//! package, the input fingerprint and the task id. Directories are created
//! exclusively and never reused, so two tasks on the same artifact cannot
//! collide.

use std::path::{Path, PathBuf};

use crate::arch::Architecture;
use crate::hash::Fingerprint;
use crate::helpers::sanitize_component;

#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn allocate(
        temp_root: &Path,
        task_id: &str,
        package: &str,
        fp: &Fingerprint,
        pkgname_based_path: bool,
    ) -> std::io::Result<Self> {
        let name = if pkgname_based_path {
            format!("{}_{}_{}", sanitize_component(package), fp, task_id)
        } else {
            format!("{}_{}", fp, task_id)
        };
        std::fs::create_dir_all(temp_root)?;
        let dir = temp_root.join(name);
        std::fs::create_dir(&dir)?;
        Ok(Self { dir })
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tree(&self) -> PathBuf {
        self.dir.join("extracted")
    }

    pub fn unsigned(&self) -> PathBuf {
        self.dir.join("unsigned.apk")
    }

    pub fn aligned(&self) -> PathBuf {
        self.dir.join("aligned.apk")
    }

    /// Removes build intermediates; the unpacked tree stays.
    pub fn discard_intermediates(&self) {
        for path in [self.unsigned(), self.aligned()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => tracing::warn!("failed to remove {}: {}", path.display(), err),
            }
        }
    }
}

/// Location of a library slot relative to the unpacked tree.
pub fn slot_relative_path(arch: Architecture, slot: &str) -> PathBuf {
    Path::new("lib").join(arch.as_str()).join(slot)
}
