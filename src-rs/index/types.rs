use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arch::Architecture;
use crate::hash::Fingerprint;

/// Minimal persisted record of one successful task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub task_id: String,
    #[serde(alias = "pkg_name")]
    pub package_identifier: String,
    #[serde(alias = "so_architecture")]
    pub declared_architecture: Architecture,
    #[serde(alias = "signed_apk_path")]
    pub final_artifact_path: String,
    #[serde(alias = "file_md5_after")]
    pub output_fingerprint: Fingerprint,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// On-disk shape of one index key. Older files stored a single summary
/// per fingerprint instead of a list.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum StoredEntry {
    Many(Vec<Summary>),
    One(Box<Summary>),
}

impl StoredEntry {
    pub(crate) fn into_vec(self) -> Vec<Summary> {
        match self {
            StoredEntry::Many(list) => list,
            StoredEntry::One(single) => vec![*single],
        }
    }
}

/// Timestamps are stored as fractional unix seconds, which is also what
/// older index files contain.
mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        let secs = value.timestamp() as f64 + f64::from(value.timestamp_subsec_micros()) / 1e6;
        ser.serialize_f64(secs)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(de)?;
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
        Utc.timestamp_opt(whole as i64, nanos)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", secs)))
    }
}
