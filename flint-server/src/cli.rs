//! Command-line argument parsing.

use clap::Parser;

/// Flint server - single-host virtualization control plane
#[derive(Parser, Debug)]
#[command(name = "flint-server")]
#[command(about = "Flint server - single-host virtualization control plane")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/flint/server.yaml")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit JSON logs instead of console output
    #[arg(long)]
    pub log_json: bool,

    /// Listen address for the HTTP API
    #[arg(long)]
    pub listen: Option<String>,

    /// Libvirt connection URI
    #[arg(long)]
    pub libvirt_uri: Option<String>,

    /// Image library root directory
    #[arg(long)]
    pub library_root: Option<String>,

    /// Enable development mode (mock hypervisor)
    #[arg(long)]
    pub dev: bool,
}
