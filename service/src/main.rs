//! `milestone-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): load configuration, open the database,
//!   and serve the IPC socket until Ctrl+C.
//! - **`--ping`**: connect to the running service socket, send a hello
//!   handshake, verify the response, then exit.
//!
//! `--config <path>` selects a configuration file; otherwise the standard
//! locations are searched.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use milestone_service::config::{ConfigLoader, ServiceConfig};
use milestone_service::db::open_database;
use milestone_service::ipc;
use milestone_service::service::MilestoneService;

#[derive(Parser, Debug)]
#[command(about = "Two-party milestone sign-off service")]
struct Args {
    /// Send a hello handshake to the running service and exit
    #[arg(long)]
    ping: bool,

    /// Configuration file (default: ./milestone.toml or the XDG config dir)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn load_config(path: Option<PathBuf>) -> std::io::Result<ServiceConfig> {
    let loaded = match path {
        Some(path) => ConfigLoader::new().with_file(path).load(),
        None => ConfigLoader::load_default(),
    };
    loaded.map_err(|e| std::io::Error::other(format!("configuration error: {e}")))
}

/// Connect to the service socket, send a hello handshake, and verify the
/// response.
fn ping(config: &ServiceConfig) -> std::io::Result<()> {
    let path = config.socket_path();
    let mut stream = std::os::unix::net::UnixStream::connect(&path).map_err(|e| {
        std::io::Error::other(format!("ping: cannot connect to {}: {e}", path.display()))
    })?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(std::time::Duration::from_secs(5)))?;

    let hello = format!(
        r#"{{"id":0,"method":"hello","params":{{"protocol_version":"{}","client_version":"ping"}}}}"#,
        milestone_service::PROTOCOL_VERSION,
    );
    stream.write_all(hello.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let resp: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| std::io::Error::other(format!("ping: invalid response JSON: {e}")))?;
    if resp.get("result").is_some() {
        eprintln!("ping: service is alive");
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        Err(std::io::Error::other(format!("ping: hello failed: {msg}")))
    }
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config)?;

    if args.ping {
        return ping(&config);
    }

    run_service(config)
}

#[tokio::main]
async fn run_service(config: ServiceConfig) -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    tracing::info!("milestone-service v{} starting", env!("CARGO_PKG_VERSION"));

    let pool = open_database(
        &config.database.path,
        config.database.pool_size,
        config.busy_timeout(),
    )
    .map_err(|e| std::io::Error::other(format!("Failed to open database: {e}")))?;
    tracing::info!("Database at {}", config.database.path.display());

    let gate = config.gate();
    if gate.admin_signs_for_parties() {
        tracing::warn!("policy: administrators may sign on behalf of either party");
    }
    let service = Arc::new(MilestoneService::new(pool, gate));

    let listener = ipc::bind_listener(&config.socket_path())?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    ipc::serve(service, listener, shutdown_rx).await?;

    let _ = std::fs::remove_file(config.socket_path());
    tracing::info!("milestone-service exiting cleanly");
    Ok(())
}
