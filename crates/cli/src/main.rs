mod secrets_commands;
mod tokens_commands;

use std::path::PathBuf;

use {
    agora_config::AgoraConfig,
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "agora", about = "Agora: authentication & real-time channel security core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Only look for agora.{toml,yaml,yml,json} in this directory.
    #[arg(long, global = true, env = "AGORA_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Report the strength of the configured signing secrets.
    CheckSecrets {
        /// Apply production thresholds regardless of `server.environment`.
        #[arg(long)]
        production: bool,
        /// Print reports as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Renewal token maintenance.
    Tokens {
        #[command(subcommand)]
        action: tokens_commands::TokensAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with secrets redacted.
    Show,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config_dir {
        agora_config::set_config_dir(dir.clone());
    }
    let mut config = agora_config::discover_and_load();

    info!(version = env!("CARGO_PKG_VERSION"), "agora starting");

    match cli.command {
        Commands::Gateway { bind, port } => {
            apply_server_overrides(&mut config, bind, port);
            agora_gateway::start_gateway(config).await
        },
        Commands::CheckSecrets { production, json } => {
            let production = production || config.server.environment.is_production();
            secrets_commands::check_secrets(&config, production, json)
        },
        Commands::Tokens { action } => tokens_commands::handle_tokens(action, &config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

fn apply_server_overrides(config: &mut AgoraConfig, bind: Option<String>, port: Option<u16>) {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_token_subcommands() {
        let cli = Cli::try_parse_from(["agora", "tokens", "revoke-all", "--user", "alice"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Tokens {
                action: tokens_commands::TokensAction::RevokeAll { ref user }
            } if user == "alice"
        ));
    }

    #[test]
    fn gateway_flags_override_config() {
        let mut config = AgoraConfig::default();
        apply_server_overrides(&mut config, Some("0.0.0.0".into()), None);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, AgoraConfig::default().server.port);
    }

    #[test]
    fn config_show_redacts_secrets() {
        let mut config = AgoraConfig::default();
        config.auth.session_secret = Some(secrecy::SecretString::new("hunter2-hunter2".into()));
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("hunter2"));
    }
}
