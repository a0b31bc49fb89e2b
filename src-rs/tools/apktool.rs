use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::types::PackageTool;
use crate::config::ToolConfig;
use crate::error::ToolError;

/// Android SDK tooling: apktool for unpack/rebuild, zipalign, apksigner.
#[derive(Clone, Debug)]
pub struct ApkTool {
    cfg: ToolConfig,
}

impl ApkTool {
    pub fn new(cfg: ToolConfig) -> Self {
        Self { cfg }
    }
}

async fn run<I, S>(program: &str, args: I) -> Result<(), ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    tracing::debug!("running {}", program);
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ToolError::Launch {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ToolError::Exit {
        program: program.to_string(),
        status: output.status.to_string(),
        stderr: stderr.trim().chars().take(2000).collect(),
    })
}

#[async_trait]
impl PackageTool for ApkTool {
    async fn unpack(&self, artifact: &Path, tree: &Path) -> Result<(), ToolError> {
        // -r/-s keep resources and dex untouched; only lib/ is swapped.
        run(
            &self.cfg.apktool,
            [
                OsStr::new("d"),
                OsStr::new("-r"),
                OsStr::new("-s"),
                artifact.as_os_str(),
                OsStr::new("-o"),
                tree.as_os_str(),
                OsStr::new("-f"),
            ],
        )
        .await
    }

    async fn rebuild(&self, tree: &Path, out: &Path) -> Result<(), ToolError> {
        run(
            &self.cfg.apktool,
            [OsStr::new("b"), tree.as_os_str(), OsStr::new("-o"), out.as_os_str()],
        )
        .await
    }

    async fn align(&self, input: &Path, out: &Path) -> Result<(), ToolError> {
        run(
            &self.cfg.zipalign,
            [
                OsStr::new("-f"),
                OsStr::new("-v"),
                OsStr::new("4"),
                input.as_os_str(),
                out.as_os_str(),
            ],
        )
        .await
    }

    async fn sign(&self, input: &Path, out: &Path) -> Result<(), ToolError> {
        if !self.cfg.keystore.is_file() {
            return Err(ToolError::Other(format!(
                "keystore {} not found",
                self.cfg.keystore.display()
            )));
        }
        let ks_pass = format!("pass:{}", self.cfg.keystore_pass);
        let key_pass = format!("pass:{}", self.cfg.key_pass);
        run(
            &self.cfg.apksigner,
            [
                OsStr::new("sign"),
                OsStr::new("--ks"),
                self.cfg.keystore.as_os_str(),
                OsStr::new("--ks-key-alias"),
                OsStr::new(&self.cfg.key_alias),
                OsStr::new("--ks-pass"),
                OsStr::new(&ks_pass),
                OsStr::new("--key-pass"),
                OsStr::new(&key_pass),
                OsStr::new("--in"),
                input.as_os_str(),
                OsStr::new("--out"),
                out.as_os_str(),
            ],
        )
        .await
    }
}
