use std::fmt;
use std::str::FromStr;

use goblin::elf::header::{EM_AARCH64, EM_ARM};
use goblin::elf::Elf;
use serde::{Deserialize, Serialize};

/// CPU/bitness class a native library is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "arm64-v8a")]
    Arm64V8a,
    #[serde(rename = "armeabi-v7a")]
    ArmeabiV7a,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::Arm64V8a => "arm64-v8a",
            Architecture::ArmeabiV7a => "armeabi-v7a",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("architecture must be 'arm64-v8a' or 'armeabi-v7a', got {0:?}")]
pub struct UnknownArchitecture(pub String);

impl FromStr for Architecture {
    type Err = UnknownArchitecture;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "arm64-v8a" => Ok(Architecture::Arm64V8a),
            "armeabi-v7a" => Ok(Architecture::ArmeabiV7a),
            other => Err(UnknownArchitecture(other.to_string())),
        }
    }
}

/// Classifies a library blob. `None` means the blob could not be classified.
pub trait ArchDetector: Send + Sync {
    fn detect(&self, blob: &[u8]) -> Option<Architecture>;
}

/// Reads the ELF header's machine field.
#[derive(Clone, Copy, Debug, Default)]
pub struct ElfDetector;

impl ArchDetector for ElfDetector {
    fn detect(&self, blob: &[u8]) -> Option<Architecture> {
        let header = Elf::parse_header(blob).ok()?;
        match header.e_machine {
            EM_AARCH64 => Some(Architecture::Arm64V8a),
            EM_ARM => Some(Architecture::ArmeabiV7a),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn elf_stub(machine: u16) -> Vec<u8> {
    let is_64 = machine == EM_AARCH64;
    let mut bytes = vec![0u8; 64];
    bytes[..4].copy_from_slice(b"\x7fELF");
    bytes[4] = if is_64 { 2 } else { 1 };
    bytes[5] = 1;
    bytes[6] = 1;
    bytes[16] = 3;
    bytes[18..20].copy_from_slice(&machine.to_le_bytes());
    bytes[20] = 1;
    if is_64 {
        bytes[52..54].copy_from_slice(&64u16.to_le_bytes());
    } else {
        bytes[40..42].copy_from_slice(&52u16.to_le_bytes());
    }
    bytes
}
