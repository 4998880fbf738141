//! Configuration management for the Flint server.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::cli::Args;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Hypervisor backend configuration
    pub hypervisor: HypervisorConfig,
    /// API surface configuration
    pub api: ApiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            hypervisor: HypervisorConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Config =
            serde_yaml::from_str(&content).with_context(|| "failed to parse config file")?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref listen) = args.listen {
            self.server.listen = listen.clone();
        }

        if let Some(ref uri) = args.libvirt_uri {
            self.hypervisor.libvirt_uri = uri.clone();
        }

        if let Some(ref root) = args.library_root {
            self.hypervisor.library_root = root.clone();
        }

        if args.dev {
            self.hypervisor.backend = HypervisorBackend::Mock;
        }

        self
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Hypervisor backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    /// Backend type
    pub backend: HypervisorBackend,
    /// Libvirt connection URI
    pub libvirt_uri: String,
    /// Image library root directory
    pub library_root: String,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            backend: HypervisorBackend::Libvirt,
            libvirt_uri: "qemu:///system".to_string(),
            library_root: "/var/lib/flint/images".to_string(),
        }
    }
}

/// Hypervisor backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorBackend {
    /// Mock backend for development and testing
    Mock,
    /// Libvirt/QEMU backend
    Libvirt,
}

impl Default for HypervisorBackend {
    fn default() -> Self {
        Self::Libvirt
    }
}

/// API surface configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Fixed bearer token; generated at startup when unset
    pub token: Option<String>,
    /// Activity ring capacity
    pub activity_capacity: usize,
    /// Sampler window in milliseconds
    pub sample_window_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            token: None,
            activity_capacity: 500,
            sample_window_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.hypervisor.backend, HypervisorBackend::Libvirt);
        assert_eq!(config.api.activity_capacity, 500);
        assert!(config.api.token.is_none());
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.yaml");
        std::fs::write(
            &path,
            "server:\n  listen: 127.0.0.1:9000\nhypervisor:\n  backend: mock\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.hypervisor.backend, HypervisorBackend::Mock);
        assert_eq!(config.hypervisor.libvirt_uri, "qemu:///system");
        assert_eq!(config.api.sample_window_ms, 1000);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load("/nonexistent/flint.yaml").is_err());
    }
}
