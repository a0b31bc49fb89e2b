use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use relib_rs::api::server::RelibServer;
use relib_rs::config::ServiceConfig;
use relib_rs::helpers::apply_env_overrides;
use relib_rs::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "relib-server", about = "Native library replacement service")]
struct Args {
    /// TOML config file; defaults apply when omitted.
    #[arg(short, long, env = "RELIB_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    workdir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_toml_file(path)?,
        None => ServiceConfig::default(),
    };
    apply_env_overrides(&mut config);
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(workdir) = args.workdir {
        config.workdir = workdir;
    }

    tracing::info!(
        workdir = %config.workdir.display(),
        persist_tasks = config.persist_tasks,
        "starting relib-server"
    );
    let port = config.port;
    let orchestrator = Orchestrator::from_config(config)?;
    let server = RelibServer::new(port, orchestrator);
    server.start().await.map_err(anyhow::Error::msg)
}
