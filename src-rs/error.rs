use std::fmt;

use serde::{Deserialize, Serialize};

use crate::arch::Architecture;
use crate::hash::Fingerprint;

/// Pipeline step, used to name where a timeout or tool failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Unpack,
    Fetch,
    Rebuild,
    Align,
    Sign,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Unpack => "unpack",
            Step::Fetch => "fetch",
            Step::Rebuild => "rebuild",
            Step::Align => "align",
            Step::Sign => "sign",
        };
        f.write_str(name)
    }
}

/// Why a task ended in `failed`. Serialized with a `kind` tag so clients can
/// branch on it; `Display` gives the human-readable form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind")]
pub enum FailureReason {
    #[error("original artifact {fingerprint} is not in the upload store")]
    ArtifactNotFound { fingerprint: Fingerprint },

    #[error("fingerprint mismatch: expected {expected}, computed {actual}")]
    FingerprintMismatch { expected: Fingerprint, actual: Fingerprint },

    #[error("failed to unpack artifact: {detail}")]
    UnpackFailed { detail: String },

    #[error("failed to download replacement for {slot}: {detail}")]
    DownloadFailed { slot: String, detail: String },

    #[error("architecture mismatch for {slot}: requested {expected}, but file is {actual}")]
    ArchitectureMismatch {
        slot: String,
        expected: Architecture,
        actual: Architecture,
    },

    #[error("could not detect architecture of replacement for {slot}")]
    ArchitectureUndetectable { slot: String },

    #[error("library {slot} not found in artifact at {path}")]
    LibraryNotFound { slot: String, path: String },

    #[error("failed to rebuild artifact: {detail}")]
    RebuildFailed { detail: String },

    #[error("failed to align artifact: {detail}")]
    AlignFailed { detail: String },

    #[error("failed to sign artifact: {detail}")]
    SignFailed { detail: String },

    #[error("step {step} timed out")]
    Timeout { step: Step },

    #[error("working directory error: {detail}")]
    WorkspaceFailed { detail: String },
}

impl FailureReason {
    pub fn workspace(err: impl fmt::Display) -> Self {
        FailureReason::WorkspaceFailed {
            detail: err.to_string(),
        }
    }
}

/// Error returned by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
