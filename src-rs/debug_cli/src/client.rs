use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use reqwest::blocking::{multipart, Client, Response};

use crate::models::{Accepted, CheckResponse, ReplaceRequest, TaskInfo};

pub struct HTTPClient {
    pub base_url: String,
    client: Client,
}

impl HTTPClient {
    pub fn new(base_url: &str) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn check_md5(&self, md5: &str) -> Result<CheckResponse, String> {
        let resp = self
            .client
            .get(self.url(&format!("/check_md5/{}", md5)))
            .send()
            .map_err(|err| err.to_string())?;
        parse_json(resp)
    }

    pub fn upload(&self, apk: &Path, md5: &str, req: &ReplaceRequest) -> Result<Accepted, String> {
        let form = multipart::Form::new()
            .text("pkg_name", req.package.clone())
            .text("so_architecture", req.architecture.clone())
            .text("so_files", req.so_files.clone())
            .text("md5", md5.to_string())
            .file("file", apk)
            .map_err(|err| format!("{}: {}", apk.display(), err))?;
        let resp = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .map_err(|err| err.to_string())?;
        parse_json(resp)
    }

    pub fn exist_pkg(&self, md5: &str, req: &ReplaceRequest) -> Result<Accepted, String> {
        let params = [
            ("md5", md5),
            ("pkg_name", req.package.as_str()),
            ("so_architecture", req.architecture.as_str()),
            ("so_files", req.so_files.as_str()),
        ];
        let resp = self
            .client
            .post(self.url("/exist_pkg"))
            .form(&params)
            .send()
            .map_err(|err| err.to_string())?;
        parse_json(resp)
    }

    pub fn task_status(&self, task_id: &str) -> Result<TaskInfo, String> {
        let resp = self
            .client
            .get(self.url(&format!("/task_status/{}", task_id)))
            .send()
            .map_err(|err| err.to_string())?;
        parse_json(resp)
    }

    pub fn list_tasks(&self, limit: usize) -> Result<Vec<TaskInfo>, String> {
        let resp = self
            .client
            .get(self.url(&format!("/tasks?limit={}", limit)))
            .send()
            .map_err(|err| err.to_string())?;
        let value: serde_json::Value = parse_json(resp)?;
        let tasks = value
            .get("tasks")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();
        for item in tasks {
            if let Ok(task) = serde_json::from_value::<TaskInfo>(item) {
                out.push(task);
            }
        }
        Ok(out)
    }

    pub fn index(&self) -> Result<serde_json::Value, String> {
        let resp = self
            .client
            .get(self.url("/index"))
            .send()
            .map_err(|err| err.to_string())?;
        parse_json(resp)
    }

    /// Saves the signed artifact of a completed task under `dir`.
    pub fn download(&self, task_id: &str, dir: &Path) -> Result<PathBuf, String> {
        let resp = self
            .client
            .get(self.url(&format!("/download/{}", task_id)))
            .send()
            .map_err(|err| err.to_string())?;
        save(resp, dir, &format!("{}_signed.apk", task_id))
    }

    pub fn download_cached(&self, md5: &str, arch: Option<&str>, dir: &Path) -> Result<PathBuf, String> {
        let mut path = format!("/download_cached/{}", md5);
        if let Some(arch) = arch {
            path.push_str(&format!("?so_architecture={}", arch));
        }
        let resp = self
            .client
            .get(self.url(&path))
            .send()
            .map_err(|err| err.to_string())?;
        save(resp, dir, &format!("{}_signed.apk", md5))
    }
}

pub fn file_md5(path: &Path) -> Result<String, String> {
    let mut file = File::open(path).map_err(|err| format!("{}: {}", path.display(), err))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|err| err.to_string())?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn parse_json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, String> {
    if resp.status().is_success() {
        resp.json::<T>().map_err(|err| err.to_string())
    } else {
        Err(http_error(resp))
    }
}

fn http_error(resp: Response) -> String {
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or(body);
    format!("http {}: {}", status.as_u16(), detail)
}

fn save(resp: Response, dir: &Path, fallback: &str) -> Result<PathBuf, String> {
    if !resp.status().is_success() {
        return Err(http_error(resp));
    }
    let name = resp
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split("filename=").nth(1))
        .map(|v| v.trim_matches('"').to_string())
        .filter(|v| !v.is_empty() && !v.contains('/'))
        .unwrap_or_else(|| fallback.to_string());
    std::fs::create_dir_all(dir).map_err(|err| err.to_string())?;
    let path = dir.join(name);
    let bytes = resp.bytes().map_err(|err| err.to_string())?;
    std::fs::write(&path, &bytes).map_err(|err| err.to_string())?;
    Ok(path)
}
