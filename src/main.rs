//! Editor tunnel service
//!
//! Lets a browser reach the web editor on a NAT'd device: the device
//! dials out once over WebSocket and all editor traffic is multiplexed
//! back through that connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use editor_tunnel_auth::{AccessToken, TokenStore};
use editor_tunnel_core::{TunnelManager, TunnelManagerConfig};
use editor_tunnel_server::{
    build_router, AppState, CommandError, Device, DeviceStore, EditorCommander,
};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "editor-tunnel")]
#[command(about = "Reverse tunnel service for remote device editors")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct Cli {
    /// Address to bind the HTTP server
    #[arg(long, env = "EDITOR_TUNNEL_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Seconds a tunnel may wait for its device before it is closed
    #[arg(long, env = "EDITOR_TUNNEL_GRACE_PERIOD", default_value = "30")]
    grace_period: u64,

    /// Seconds to wait for a device to answer a proxied request
    #[arg(long, env = "EDITOR_TUNNEL_REQUEST_TIMEOUT", default_value = "30")]
    request_timeout: u64,

    /// JSON file of known devices; omit to accept any device id
    #[arg(long, env = "EDITOR_TUNNEL_DEVICES")]
    devices: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Device lookup backed by a static file, or wide open when no file
/// was given
struct StaticDeviceStore {
    devices: Option<HashMap<String, Device>>,
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    team_id: String,
    #[serde(default)]
    name: Option<String>,
}

impl StaticDeviceStore {
    fn from_file(path: &PathBuf) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading device file {}", path.display()))?;
        let records: HashMap<String, DeviceRecord> =
            serde_json::from_str(&raw).context("parsing device file")?;
        let devices = records
            .into_iter()
            .map(|(id, record)| {
                let device = Device {
                    id: id.clone(),
                    team_id: record.team_id,
                    name: record.name.unwrap_or_else(|| id.clone()),
                };
                (id, device)
            })
            .collect();
        Ok(Self {
            devices: Some(devices),
        })
    }

    fn open() -> Self {
        Self { devices: None }
    }
}

#[async_trait]
impl DeviceStore for StaticDeviceStore {
    async fn device(&self, device_id: &str) -> Option<Device> {
        match &self.devices {
            Some(devices) => devices.get(device_id).cloned(),
            None => Some(Device {
                id: device_id.to_string(),
                team_id: "default".to_string(),
                name: device_id.to_string(),
            }),
        }
    }
}

/// Stand-in for the platform's device command channel: logs the
/// enable/disable request so an operator can hand the token to the
/// device out of band.
struct LogEditorCommander;

#[async_trait]
impl EditorCommander for LogEditorCommander {
    async fn enable_editor(
        &self,
        team_id: &str,
        device_id: &str,
        token: &AccessToken,
    ) -> Result<(), CommandError> {
        info!(team_id, device_id, token = %token.as_str(), "Editor enable requested; device should dial /editor/comms/{{token}}");
        Ok(())
    }

    async fn disable_editor(&self, team_id: &str, device_id: &str) -> Result<(), CommandError> {
        info!(team_id, device_id, "Editor disable requested");
        Ok(())
    }
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_TIME"),
        "Starting editor tunnel service"
    );

    let devices: Arc<dyn DeviceStore> = match &cli.devices {
        Some(path) => Arc::new(StaticDeviceStore::from_file(path)?),
        None => {
            warn!("No device file given; accepting any device id");
            Arc::new(StaticDeviceStore::open())
        }
    };

    let manager = TunnelManager::new(
        Arc::new(TokenStore::new()),
        TunnelManagerConfig {
            grace_period: Duration::from_secs(cli.grace_period),
            request_timeout: Duration::from_secs(cli.request_timeout),
        },
    );

    let state = Arc::new(AppState {
        manager: manager.clone(),
        devices,
        commander: Arc::new(LogEditorCommander),
    });
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    info!(bind = %cli.bind, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down, closing all tunnels");
    manager.shutdown();
    Ok(())
}
