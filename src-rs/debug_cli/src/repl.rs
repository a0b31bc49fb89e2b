use std::io;
use std::path::Path;
use std::time::Duration;

use crate::client::{file_md5, HTTPClient};
use crate::models::{CLIConfig, ReplaceRequest, TaskInfo};
use crate::render;

const ARCHITECTURES: [&str; 2] = ["arm64-v8a", "armeabi-v7a"];

pub struct REPL {
    pub config: CLIConfig,
    pub client: HTTPClient,
}

impl REPL {
    pub fn new(config: CLIConfig, client: HTTPClient) -> Self {
        Self { config, client }
    }

    pub fn run(&mut self) {
        render::banner(&self.config);
        loop {
            render::prompt();
            let mut line = String::new();
            match io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if !line.starts_with('/') {
                render::info("commands start with '/', type /help");
                continue;
            }
            if self.handle_command(&line) {
                break;
            }
        }
    }

    fn handle_command(&mut self, line: &str) -> bool {
        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("").trim_start_matches('/');
        let rest = parts.next().unwrap_or("").trim();
        match cmd {
            "exit" | "quit" => return true,
            "help" => render::help(),
            "md5" => match file_md5(Path::new(rest)) {
                Ok(md5) => render::info(&md5),
                Err(err) => render::error(&err),
            },
            "check" => self.check(rest),
            "upload" => {
                if let Some((apk, req)) = self.replace_args(rest) {
                    self.upload(Path::new(&apk), &req);
                }
            }
            "exist" => {
                if let Some((md5, req)) = self.replace_args(rest) {
                    match self.client.exist_pkg(&md5, &req) {
                        Ok(resp) => render::accepted(&resp),
                        Err(err) => render::error(&err),
                    }
                }
            }
            "smart" => {
                if let Some((apk, req)) = self.replace_args(rest) {
                    self.smart(Path::new(&apk), &req);
                }
            }
            "status" => match self.client.task_status(rest) {
                Ok(task) => render::task(&task),
                Err(err) => render::error(&err),
            },
            "wait" => {
                if let Some(task) = self.wait(rest) {
                    render::task(&task);
                }
            }
            "download" => match self.client.download(rest, &self.config.download_dir) {
                Ok(path) => render::saved(&path),
                Err(err) => render::error(&err),
            },
            "cached" => {
                let mut args = rest.split_whitespace();
                let md5 = args.next().unwrap_or("");
                let arch = args.next();
                match self.client.download_cached(md5, arch, &self.config.download_dir) {
                    Ok(path) => render::saved(&path),
                    Err(err) => render::error(&err),
                }
            }
            "tasks" => {
                let limit = rest.parse::<usize>().unwrap_or(10);
                match self.client.list_tasks(limit) {
                    Ok(tasks) => render::tasks(&tasks),
                    Err(err) => render::error(&err),
                }
            }
            "index" => match self.client.index() {
                Ok(index) => render::index(&index),
                Err(err) => render::error(&err),
            },
            "arch" => {
                if rest.is_empty() {
                    render::info(&format!("arch: {}", self.config.architecture));
                } else if ARCHITECTURES.contains(&rest) {
                    self.config.architecture = rest.to_string();
                    render::info("architecture updated");
                } else {
                    render::error("architecture must be arm64-v8a or armeabi-v7a");
                }
            }
            "config" => render::config(&self.config),
            "base" => {
                if rest.is_empty() {
                    render::info(&format!("base: {}", self.config.base_url));
                } else {
                    match HTTPClient::new(rest) {
                        Ok(client) => {
                            self.config.base_url = rest.to_string();
                            self.client = client;
                            render::info("base url updated");
                        }
                        Err(err) => render::error(&err),
                    }
                }
            }
            _ => render::info("unknown command, type /help"),
        }
        false
    }

    /// Parses `<target> <pkg> <so_files json>`.
    fn replace_args(&self, rest: &str) -> Option<(String, ReplaceRequest)> {
        let mut parts = rest.splitn(3, ' ');
        let (Some(target), Some(package), Some(so_files)) = (parts.next(), parts.next(), parts.next())
        else {
            render::error("usage: <apk|md5> <pkg> <so_files json>");
            return None;
        };
        if serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(so_files).is_err() {
            render::error("so_files must be a JSON object");
            return None;
        }
        Some((
            target.to_string(),
            ReplaceRequest {
                package: package.to_string(),
                architecture: self.config.architecture.clone(),
                so_files: so_files.trim().to_string(),
            },
        ))
    }

    fn check(&self, target: &str) {
        let md5 = if Path::new(target).is_file() {
            match file_md5(Path::new(target)) {
                Ok(md5) => md5,
                Err(err) => return render::error(&err),
            }
        } else {
            target.to_string()
        };
        match self.client.check_md5(&md5) {
            Ok(resp) => render::check(&resp),
            Err(err) => render::error(&err),
        }
    }

    fn upload(&self, apk: &Path, req: &ReplaceRequest) {
        let md5 = match file_md5(apk) {
            Ok(md5) => md5,
            Err(err) => return render::error(&err),
        };
        match self.client.upload(apk, &md5, req) {
            Ok(resp) => render::accepted(&resp),
            Err(err) => render::error(&err),
        }
    }

    /// Skips the upload when the server already holds this apk.
    fn smart(&self, apk: &Path, req: &ReplaceRequest) {
        let md5 = match file_md5(apk) {
            Ok(md5) => md5,
            Err(err) => return render::error(&err),
        };
        render::info(&format!("md5: {}", md5));
        let cached = match self.client.check_md5(&md5) {
            Ok(resp) => resp.exists,
            Err(err) => {
                render::error(&err);
                false
            }
        };
        let submitted = if cached {
            render::info("cached on server, skipping upload");
            self.client.exist_pkg(&md5, req)
        } else {
            render::info("uploading");
            self.client.upload(apk, &md5, req)
        };
        let accepted = match submitted {
            Ok(resp) => resp,
            Err(err) => return render::error(&err),
        };
        render::accepted(&accepted);
        if let Some(task) = self.wait(&accepted.task_id) {
            render::task(&task);
            if task.status == "complete" {
                match self.client.download(&task.id, &self.config.download_dir) {
                    Ok(path) => render::saved(&path),
                    Err(err) => render::error(&err),
                }
            }
        }
    }

    fn wait(&self, task_id: &str) -> Option<TaskInfo> {
        loop {
            match self.client.task_status(task_id) {
                Ok(task) if task.is_terminal() => return Some(task),
                Ok(task) => render::info(&format!("[{}] {}", task.status, task.id)),
                Err(err) => {
                    render::error(&err);
                    return None;
                }
            }
            std::thread::sleep(Duration::from_secs(self.config.poll_secs));
        }
    }
}
