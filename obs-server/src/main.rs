//! Observatory server entry point.
//!
//! Reads configuration from the environment, initializes the JSON log
//! sink, spawns the rotation background task, and serves the assembled
//! router.

use std::net::SocketAddr;

use obs_common::ObservatoryConfig;
use obs_server::ObservatoryServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ObservatoryConfig::from_env();
    let (_log_guard, log_controller) = obs_server::logging::init(&config)?;
    obs_server::logging::spawn_rotation_task(config.clone());

    let server = ObservatoryServer::new(config).with_log_controller(log_controller);
    let app = server
        .router()
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = std::env::var("OBS_LISTEN_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 9100)));

    tracing::info!(%addr, "observatory server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
