use std::fmt;
use std::path::Path;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

const FINGERPRINT_LEN: usize = 32;

/// Lowercase hex MD5 digest identifying an artifact or library blob.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid fingerprint {0:?}: must be 32 hexadecimal characters")]
pub struct InvalidFingerprint(pub String);

impl Fingerprint {
    pub fn parse(raw: &str) -> Result<Self, InvalidFingerprint> {
        let trimmed = raw.trim();
        if trimmed.len() != FINGERPRINT_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidFingerprint(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = InvalidFingerprint;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint(hex::encode(Md5::digest(bytes)))
}

/// Hashes a file in fixed-size chunks so large artifacts never sit in memory twice.
pub async fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprint> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}
