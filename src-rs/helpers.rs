use std::env;
use std::path::PathBuf;

use crate::config::ServiceConfig;

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_opt(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring {}: cannot parse {:?}", key, raw);
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = env_opt(key)?;
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!("ignoring {}: not a boolean {:?}", key, raw);
            None
        }
    }
}

/// Applies `RELIB_*` environment overrides on top of `cfg`.
pub fn apply_env_overrides(cfg: &mut ServiceConfig) {
    if let Some(port) = env_parse("RELIB_PORT") {
        cfg.port = port;
    }
    if let Some(dir) = env_opt("RELIB_WORKDIR") {
        cfg.workdir = PathBuf::from(dir);
    }
    if let Some(flag) = env_bool("RELIB_PKGNAME_BASED_PATH") {
        cfg.pkgname_based_path = flag;
    }
    if let Some(flag) = env_bool("RELIB_PERSIST_TASKS") {
        cfg.persist_tasks = flag;
    }
    if let Some(secs) = env_parse("RELIB_DOWNLOAD_TIMEOUT_SECS") {
        cfg.download_timeout_secs = secs;
    }
    if let Some(secs) = env_parse("RELIB_TOOL_TIMEOUT_SECS") {
        cfg.tool_timeout_secs = secs;
    }
    if let Some(base) = env_opt("RELIB_DOWNLOAD_BASE_PATH") {
        cfg.download_base_path = base;
    }
    if let Some(base) = env_opt("RELIB_SMB_BASE_PATH") {
        cfg.smb_base_path = base;
    }
    if let Some(path) = env_opt("RELIB_KEYSTORE") {
        cfg.tools.keystore = PathBuf::from(path);
    }
    if let Some(alias) = env_opt("RELIB_KEY_ALIAS") {
        cfg.tools.key_alias = alias;
    }
    if let Some(pass) = env_opt("RELIB_KEYSTORE_PASS") {
        cfg.tools.keystore_pass = pass;
    }
    if let Some(pass) = env_opt("RELIB_KEY_PASS") {
        cfg.tools.key_pass = pass;
    }
}

/// Keeps a package name usable as a single path component.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "pkg".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A slot must name a single file inside the library directory.
pub fn is_valid_slot_name(slot: &str) -> bool {
    !slot.is_empty()
        && slot != "."
        && slot != ".."
        && !slot.contains('/')
        && !slot.contains('\\')
        && !slot.contains('\0')
}
