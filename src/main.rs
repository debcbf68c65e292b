//! Judgyse - Application Entry Point
//!
//! This is the main entry point for the judgyse server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use bollard::Docker;
use bollard::query_parameters::InspectContainerOptions;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use judgyse::{
    catalogue::Catalogue,
    config::CONFIG,
    handlers,
    judge::JudgeDirs,
    sandbox,
    session::SessionManager,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| CONFIG.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting judgyse server...");

    if cfg!(windows) && !CONFIG.sandbox.run_in_docker {
        anyhow::bail!("Windows is not supported, use Docker instead");
    }

    if CONFIG.sandbox.hard_limit {
        for path in [&CONFIG.sandbox.time_path, &CONFIG.sandbox.timeout_path] {
            if !path.exists() {
                anyhow::bail!("hard-limit mode needs {}, not found", path.display());
            }
        }
    }

    // Connect to Docker when the container back-end is selected
    let docker = if CONFIG.sandbox.run_in_docker {
        tracing::info!("Connecting to Docker...");
        let docker = Docker::connect_with_socket_defaults()?;
        let version = docker.version().await?;
        tracing::info!(
            "Connected to Docker version: {}",
            version.version.unwrap_or_default()
        );
        Some(docker)
    } else {
        None
    };

    // Inside a container the evaluation tree is scoped per process, keyed by
    // the trailing token of this container's name
    let process_id = match (&docker, CONFIG.sandbox.inside_docker) {
        (Some(docker), true) => Some(derive_process_id(docker).await?),
        _ => None,
    };

    let dirs = JudgeDirs::resolve(&CONFIG, process_id.as_deref())?;
    dirs.prepare()?;
    if CONFIG.session.wipe_on_start {
        tracing::info!("Wiping evaluation tree");
        dirs.wipe()?;
    }
    tracing::info!(root = %dirs.root.display(), "Evaluation tree ready");

    let catalogue = Arc::new(Catalogue::load(
        &CONFIG.storage.catalogue_path,
        CONFIG.storage.pretty_json,
    )?);
    let sandbox = sandbox::build(&CONFIG.sandbox, docker)?;

    let manager = Arc::new(SessionManager::new(
        CONFIG.clone(),
        catalogue,
        sandbox,
        dirs,
    ));

    let state = AppState::new(Arc::clone(&manager), CONFIG.clone());

    // Build the router
    let app = Router::new()
        .merge(handlers::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = SocketAddr::new(CONFIG.server.host.parse()?, CONFIG.server.port);
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Lifespan teardown: wind the session down before the process exits
    if !manager.is_disconnected().await {
        manager.stop_recv();
        manager.disconnect().await;
    }

    Ok(())
}

/// Derive the process id from this container's name (last `_`-separated
/// token, leading `/` stripped)
async fn derive_process_id(docker: &Docker) -> anyhow::Result<String> {
    let hostname = std::env::var("HOSTNAME")
        .map_err(|_| anyhow::anyhow!("HOSTNAME is not set inside the container"))?;

    let inspect = docker
        .inspect_container(&hostname, None::<InspectContainerOptions>)
        .await?;
    let name = inspect
        .name
        .ok_or_else(|| anyhow::anyhow!("container {hostname} has no name"))?;

    let process_id = name
        .trim_start_matches('/')
        .split('_')
        .next_back()
        .unwrap_or_default()
        .to_string();
    if process_id.is_empty() {
        anyhow::bail!("cannot derive process id from container name {name}");
    }

    tracing::info!(process_id = %process_id, "Derived process id");
    Ok(process_id)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
