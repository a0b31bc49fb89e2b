use std::path::PathBuf;

use clap::Parser;

use crate::models::CLIConfig;

#[derive(Parser, Debug)]
#[command(name = "relib", about = "Interactive client for relib-server")]
struct Args {
    /// Server base URL.
    #[arg(long = "base", env = "RELIB_URL", default_value = "http://localhost:8800")]
    base_url: String,

    /// Architecture used by /upload, /exist and /smart.
    #[arg(long, env = "RELIB_ARCH", default_value = "arm64-v8a")]
    arch: String,

    /// Directory downloads are written to.
    #[arg(long, env = "RELIB_DOWNLOAD_DIR", default_value = ".")]
    download_dir: PathBuf,

    #[arg(long, env = "RELIB_POLL_SECS", default_value_t = 2)]
    poll_secs: u64,
}

pub fn parse_config() -> CLIConfig {
    let args = Args::parse();
    CLIConfig {
        base_url: args.base_url,
        architecture: args.arch,
        download_dir: args.download_dir,
        poll_secs: args.poll_secs.max(1),
    }
}
