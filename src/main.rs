use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use termbridge::cli::{
    Cli, Commands, run_download, run_encrypt, run_info, run_ls, run_mkdir, run_ports,
    run_serial_session, run_session, run_stat, run_trust, run_upload,
};
use termbridge::config::{Config, default_config_path, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; interactive commands use stdout for the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(!cli.command.is_interactive())
        .init();

    let config = if cli.command.needs_config() {
        let config_path = cli.config.unwrap_or_else(default_config_path);
        info!(config = %config_path.display(), "Loading configuration");
        let config = load_config(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        info!(
            hosts = config.hosts.len(),
            serial_ports = config.serial.len(),
            "Configuration loaded"
        );
        config
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Session { host } => {
            run_session(&config, &host).await?;
        }
        Commands::Serial { name } => {
            run_serial_session(&config, &name).await?;
        }
        Commands::Ports => run_ports()?,
        Commands::Ls { host, path } => run_ls(&config, &host, &path).await?,
        Commands::Upload {
            host,
            local_path,
            remote_path,
            progress,
        } => run_upload(&config, &host, &local_path, &remote_path, progress).await?,
        Commands::Download {
            host,
            remote_path,
            local_path,
            progress,
        } => run_download(&config, &host, &remote_path, &local_path, progress).await?,
        Commands::Mkdir { host, path } => run_mkdir(&config, &host, &path).await?,
        Commands::Stat { host, path } => run_stat(&config, &host, &path).await?,
        Commands::Info { host } => run_info(&config, &host).await?,
        Commands::Trust { host, fingerprint } => {
            run_trust(&config, &host, &fingerprint)
                .await
                .with_context(|| format!("Failed to trust {host}"))?;
        }
        Commands::Encrypt => run_encrypt().await?,
    }

    Ok(())
}
