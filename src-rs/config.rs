use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Service settings. Every field has a default so a TOML file only needs
/// the keys it wants to change.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub port: u16,
    pub workdir: PathBuf,
    /// Include the package name in working directory names.
    pub pkgname_based_path: bool,
    pub history_capacity: usize,
    pub persist_tasks: bool,
    pub max_upload_bytes: usize,
    pub download_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Prefix for `download_path` in results; empty means the API route.
    pub download_base_path: String,
    /// Prefix for `smb_path` in results; empty disables it.
    pub smb_base_path: String,
    pub tools: ToolConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub apktool: String,
    pub zipalign: String,
    pub apksigner: String,
    pub keystore: PathBuf,
    pub key_alias: String,
    pub keystore_pass: String,
    pub key_pass: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8800,
            workdir: PathBuf::from("./workdir"),
            pkgname_based_path: true,
            history_capacity: 10,
            persist_tasks: false,
            max_upload_bytes: 1024 * 1024 * 1024,
            download_timeout_secs: 300,
            tool_timeout_secs: 600,
            download_base_path: String::new(),
            smb_base_path: String::new(),
            tools: ToolConfig::default(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            apktool: "apktool".to_string(),
            zipalign: "zipalign".to_string(),
            apksigner: "apksigner".to_string(),
            keystore: PathBuf::from("keystore.jks"),
            key_alias: "relib".to_string(),
            keystore_pass: String::new(),
            key_pass: String::new(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.workdir.join("uploads")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.workdir.join("processed")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.workdir.join("temp")
    }

    pub fn index_file(&self) -> PathBuf {
        self.workdir.join("index.json")
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.workdir.join("tasks.json")
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}
