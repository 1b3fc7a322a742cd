//! # admincraft
//!
//! Relay binary: resolves settings and the token secret, then serves the
//! WebSocket relay until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use admincraft_core::TokenVerifier;
use admincraft_core::logging::init_subscriber;
use admincraft_server::config::ServerConfig;
use admincraft_server::{DockerProcess, RelayServer};
use admincraft_settings::AdmincraftSettings;
use anyhow::{Context, Result};
use clap::Parser;

/// Authenticated WebSocket relay for a managed game server.
#[derive(Parser, Debug)]
#[command(name = "admincraft", about = "Authenticated WebSocket relay for a managed game server")]
struct Cli {
    /// JSON settings file (defaults to `$ADMINCRAFT_CONFIG`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Seconds to wait for sessions to close on shutdown.
    #[arg(long, default_value = "10")]
    shutdown_timeout: u64,
}

impl Cli {
    /// CLI flags win over file and environment.
    fn apply(&self, settings: &mut AdmincraftSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

fn load_settings(cli: &Cli) -> Result<AdmincraftSettings> {
    let path = cli.config.clone().or_else(admincraft_settings::settings_path);
    let mut settings = admincraft_settings::load_settings(path.as_deref()).with_context(|| {
        match &path {
            Some(path) => format!("Failed to load settings from {}", path.display()),
            None => "Failed to load settings".to_string(),
        }
    })?;
    cli.apply(&mut settings);
    Ok(settings)
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load_settings(&args)?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    // No secret, no server.
    let secret = admincraft_settings::load_secret().context("Failed to resolve token secret")?;
    let verifier = TokenVerifier::new(&secret);
    drop(secret);

    let metrics = match admincraft_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let process = Arc::new(DockerProcess::from_settings(
        &settings.process,
        &settings.commands,
    ));
    tracing::info!(container = process.container(), "managing container");

    let config = ServerConfig::from_settings(&settings);
    let server = RelayServer::new(config, verifier, process, metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        "admincraft relay listening on {}://{addr} (rate limit {}/s)",
        server.config().scheme(),
        server.config().rate_limit_per_sec
    );

    shutdown_signal()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down...");
    let drained = server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(Duration::from_secs(args.shutdown_timeout)))
        .await;
    if !drained {
        tracing::warn!("exiting with sessions still open");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["admincraft"]);
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert_eq!(cli.shutdown_timeout, 10);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from(["admincraft", "--host", "127.0.0.1", "--port", "9443"]);
        let mut settings = AdmincraftSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9443);
    }

    #[test]
    fn absent_flags_keep_settings() {
        let cli = Cli::parse_from(["admincraft"]);
        let mut settings = AdmincraftSettings::default();
        settings.server.port = 25565;
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 25565);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn load_settings_from_config_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admincraft.json");
        std::fs::write(&path, r#"{"process": {"container": "creative"}}"#).unwrap();

        let cli = Cli::parse_from([
            "admincraft",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9000",
        ]);
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.process.container, "creative");
        assert_eq!(settings.server.port, 9000);
    }

    #[test]
    fn invalid_config_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{").unwrap();

        let cli = Cli::parse_from(["admincraft", "--config", path.to_str().unwrap()]);
        let err = load_settings(&cli).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }
}
