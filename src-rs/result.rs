use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arch::Architecture;
use crate::hash::Fingerprint;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOutcome {
    pub fingerprint_before: Fingerprint,
    pub fingerprint_after: Fingerprint,
    /// False when the replacement was byte-identical and nothing was written.
    pub changed: bool,
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResult {
    pub input_fingerprint: Fingerprint,
    pub output_fingerprint: Fingerprint,
    pub detected_architecture: Architecture,
    pub slots: BTreeMap<String, SlotOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_seconds: f64,
    pub final_artifact_path: String,
    pub download_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smb_path: Option<String>,
}
