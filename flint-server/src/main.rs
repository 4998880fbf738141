//! # Flint Server
//!
//! Single-host virtualization control plane: a uniform HTTP/WebSocket API
//! over the local hypervisor covering domain lifecycle, creation from cloud
//! images, serial consoles, snapshots, storage, networks and an image
//! library.
//!
//! ## Usage
//! ```bash
//! flint-server --config /etc/flint/server.yaml
//! flint-server --dev --listen 127.0.0.1:8080
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod activity;
mod auth;
mod cli;
mod config;
mod http;

use activity::ActivityLog;
use cli::Args;
use config::{Config, HypervisorBackend};
use flint_hypervisor::{ActivitySink, Hypervisor, HypervisorClient, ImageLibrary, MockHypervisor};
use http::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.log_json {
        flint_common::init_logging_json(&args.log_level)?;
    } else {
        flint_common::init_logging(&args.log_level)?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Flint server"
    );

    let config = match Config::load(&args.config) {
        Ok(cfg) => {
            info!(config_path = %args.config, "Configuration loaded");
            cfg
        }
        Err(_) if args.config == "/etc/flint/server.yaml" => {
            info!("No config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            error!(error = %e, path = %args.config, "Failed to load configuration");
            return Err(e);
        }
    };
    let config = config.with_cli_overrides(&args);

    info!(
        listen = %config.server.listen,
        backend = ?config.hypervisor.backend,
        library = %config.hypervisor.library_root,
        "Server configured"
    );

    let hypervisor = build_backend(&config)?;
    if !hypervisor.ping().await.unwrap_or(false) {
        error!("Hypervisor session is not alive");
        return Err(anyhow::anyhow!("hypervisor connection failed"));
    }

    let library = Arc::new(ImageLibrary::new(&config.hypervisor.library_root));
    library
        .ensure_root()
        .map_err(|e| anyhow::anyhow!("cannot prepare image library: {e}"))?;

    let activity = Arc::new(ActivityLog::new(config.api.activity_capacity));

    let token = match config.api.token.clone() {
        Some(token) if auth::validate_token(&token) => token,
        Some(_) => {
            return Err(anyhow::anyhow!(
                "configured api token must be 64 hex characters"
            ))
        }
        None => auth::generate_token(),
    };
    // Operators read the token from the startup log
    info!(token = %token, "API bearer token");

    let client = Arc::new(
        HypervisorClient::new(hypervisor, library)
            .with_sink(activity.clone() as Arc<dyn ActivitySink>)
            .with_sample_window(Duration::from_millis(config.api.sample_window_ms)),
    );

    let state = Arc::new(AppState {
        client,
        activity,
        token,
    });
    let app = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(address = %config.server.listen, "Serving HTTP API");
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_backend(config: &Config) -> Result<Arc<dyn Hypervisor>> {
    match config.hypervisor.backend {
        HypervisorBackend::Mock => {
            info!("Using mock hypervisor backend");
            Ok(Arc::new(MockHypervisor::new()))
        }
        #[cfg(feature = "libvirt")]
        HypervisorBackend::Libvirt => {
            let backend =
                flint_hypervisor::LibvirtHypervisor::new(&config.hypervisor.libvirt_uri)
                    .map_err(|e| anyhow::anyhow!("libvirt connection failed: {e}"))?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "libvirt"))]
        HypervisorBackend::Libvirt => Err(anyhow::anyhow!(
            "this build does not include the libvirt backend; rebuild with --features libvirt or run with --dev"
        )),
    }
}
