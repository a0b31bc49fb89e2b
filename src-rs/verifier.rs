use std::path::{Path, PathBuf};

use crate::arch::{ArchDetector, Architecture};
use crate::hash::{fingerprint, Fingerprint};
use crate::workspace::slot_relative_path;

/// Outcome of checking one replacement against the unpacked tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Changed {
        target: PathBuf,
        before: Fingerprint,
        after: Fingerprint,
    },
    Unchanged {
        target: PathBuf,
        fingerprint: Fingerprint,
    },
    MissingSlot {
        path: PathBuf,
    },
    ArchitectureMismatch {
        detected: Architecture,
    },
    Undetectable,
}

impl Verdict {
    #[cfg(test)]
    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Changed { .. } | Verdict::Unchanged { .. })
    }
}

/// Checks a replacement blob for `slot`. Architecture is checked before the
/// slot's presence in the tree. Reads the filesystem only; same inputs give
/// the same verdict.
pub fn verify_slot(
    detector: &dyn ArchDetector,
    tree: &Path,
    slot: &str,
    replacement: &[u8],
    declared: Architecture,
) -> Verdict {
    match detector.detect(replacement) {
        None => return Verdict::Undetectable,
        Some(detected) if detected != declared => {
            return Verdict::ArchitectureMismatch { detected };
        }
        Some(_) => {}
    }

    let relative = slot_relative_path(declared, slot);
    let target = tree.join(&relative);
    let existing = match std::fs::read(&target) {
        Ok(bytes) => bytes,
        Err(_) => return Verdict::MissingSlot { path: relative },
    };

    let before = fingerprint(&existing);
    let after = fingerprint(replacement);
    if before == after {
        Verdict::Unchanged {
            target,
            fingerprint: after,
        }
    } else {
        Verdict::Changed {
            target,
            before,
            after,
        }
    }
}
