use std::io::{self, Write};
use std::path::Path;

use crate::models::{Accepted, CLIConfig, CheckResponse, TaskInfo};

pub fn banner(cfg: &CLIConfig) {
    println!("relib client");
    println!("API: {}", cfg.base_url);
    println!("Architecture: {}", cfg.architecture);
    println!("Type /help for commands.");
}

pub fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

pub fn help() {
    println!("Commands:");
    println!("  /help                               Show commands");
    println!("  /exit | /quit                       Exit");
    println!("  /md5 <apk>                          Compute local md5");
    println!("  /check <md5|apk>                    Query the cache index");
    println!("  /upload <apk> <pkg> <so_files>      Upload and replace libraries");
    println!("  /exist <md5> <pkg> <so_files>       Replace using a cached upload");
    println!("  /smart <apk> <pkg> <so_files>       /exist if cached, else /upload");
    println!("  /status <task_id>                   Show task status");
    println!("  /wait <task_id>                     Poll until the task finishes");
    println!("  /download <task_id>                 Download the signed apk");
    println!("  /cached <md5> [arch]                Download the newest cached apk");
    println!("  /tasks [limit]                      List tasks");
    println!("  /index                              Dump the cache index");
    println!("  /arch <arm64-v8a|armeabi-v7a>       Set architecture");
    println!("  /config                             Show current config");
    println!("  /base <url>                         Update base URL");
    println!("so_files is a JSON object, e.g. {{\"libgame.so\":\"https://host/libgame.so\"}}");
}

pub fn check(resp: &CheckResponse) {
    if !resp.exists {
        println!("{}: not cached", resp.md5);
        return;
    }
    println!("{}: cached ({} builds)", resp.md5, resp.count);
    if let Some(latest) = &resp.latest_task {
        let field = |key: &str| latest.get(key).and_then(|v| v.as_str()).unwrap_or("-").to_string();
        println!(
            "  latest: task {} [{}] {}",
            field("task_id"),
            field("declared_architecture"),
            field("package_identifier")
        );
    }
}

pub fn accepted(resp: &Accepted) {
    println!("task {} [{}] {}", resp.task_id, resp.status, resp.message);
}

pub fn task(task: &TaskInfo) {
    println!(
        "[{}] {} {} ({}, {})",
        task.status, task.id, task.package_identifier, task.declared_architecture, task.input_fingerprint
    );
    println!("  created: {}", task.created_at);
    if let Some(reason) = &task.reason {
        println!("  reason: {}", reason);
    }
    if let Some(result) = &task.result {
        if let Some(out) = result.get("output_fingerprint").and_then(|v| v.as_str()) {
            println!("  output md5: {}", out);
        }
        if let Some(secs) = result.get("total_seconds").and_then(|v| v.as_f64()) {
            println!("  took: {:.1}s", secs);
        }
        if let Some(path) = result.get("download_path").and_then(|v| v.as_str()) {
            println!("  download: {}", path);
        }
        if let Some(slots) = result.get("slots").and_then(|v| v.as_object()) {
            for (slot, outcome) in slots {
                let changed = outcome.get("changed").and_then(|v| v.as_bool()).unwrap_or(false);
                println!("  {} {}", if changed { "replaced" } else { "unchanged" }, slot);
            }
        }
    }
}

pub fn tasks(tasks: &[TaskInfo]) {
    if tasks.is_empty() {
        println!("no tasks");
        return;
    }
    for task in tasks {
        println!("[{}] {} - {}", task.status, task.id, task.package_identifier);
    }
}

pub fn index(index: &serde_json::Value) {
    let Some(map) = index.as_object() else {
        println!("{}", index);
        return;
    };
    if map.is_empty() {
        println!("index is empty");
        return;
    }
    for (md5, history) in map {
        let count = history.as_array().map_or(0, Vec::len);
        println!("{} ({} builds)", md5, count);
    }
}

pub fn saved(path: &Path) {
    println!("saved {}", path.display());
}

pub fn config(cfg: &CLIConfig) {
    println!("config:");
    println!("  base: {}", cfg.base_url);
    println!("  arch: {}", cfg.architecture);
    println!("  download dir: {}", cfg.download_dir.display());
    println!("  poll: {}s", cfg.poll_secs);
}

pub fn info(msg: &str) {
    println!("{}", msg);
}

pub fn error(msg: &str) {
    eprintln!("error: {}", msg);
}
