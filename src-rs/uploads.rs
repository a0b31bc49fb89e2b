use std::io::Write;
use std::path::PathBuf;

use crate::hash::{fingerprint, Fingerprint};

/// Content-addressed store of original uploaded artifacts, kept so later
/// tasks can reuse them by fingerprint without a re-upload.
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path_for(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(format!("{}.apk", fp))
    }

    /// Path of the stored artifact for `fp`, if present.
    pub fn locate(&self, fp: &Fingerprint) -> Option<PathBuf> {
        let path = self.path_for(fp);
        path.is_file().then_some(path)
    }

    /// Stores `bytes` under their computed fingerprint. Writing the same
    /// content twice is a no-op.
    pub fn store(&self, bytes: &[u8]) -> std::io::Result<(Fingerprint, PathBuf)> {
        let fp = fingerprint(bytes);
        let dest = self.path_for(&fp);
        if !dest.is_file() {
            let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
            tmp.write_all(bytes)?;
            tmp.persist(&dest).map_err(|e| e.error)?;
        }
        Ok((fp, dest))
    }
}
