use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    secrecy::SecretString,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    schema::{AgoraConfig, Environment},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["agora.toml", "agora.yaml", "agora.yml", "agora.json"];

/// Environment variables that override values from the config file.
pub const ENV_SESSION_SECRET: &str = "AGORA_SESSION_SECRET";
pub const ENV_RENEWAL_SECRET: &str = "AGORA_RENEWAL_SECRET";
pub const ENV_ENVIRONMENT: &str = "AGORA_ENV";

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, config discovery only looks in
/// this directory (project-local and user-global paths are skipped).
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<AgoraConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply
/// environment overrides.
///
/// Search order:
/// 1. `./agora.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/agora/agora.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `AgoraConfig::default()` when no file is found or the file
/// fails to parse.
pub fn discover_and_load() -> AgoraConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                AgoraConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            AgoraConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Like [`discover_and_load`] but surfaces parse errors instead of falling
/// back to defaults. Used for reloads, where a broken file must not silently
/// replace a working configuration.
pub fn try_discover_and_load() -> anyhow::Result<AgoraConfig> {
    let mut config = match find_config_file() {
        Some(path) => load_config(&path)?,
        None => AgoraConfig::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Overlay secrets and the environment selector from `lookup`.
///
/// Non-empty values win over the file.
pub fn apply_env_overrides(config: &mut AgoraConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(secret) = non_empty(ENV_SESSION_SECRET) {
        config.auth.session_secret = Some(SecretString::new(secret));
    }
    if let Some(secret) = non_empty(ENV_RENEWAL_SECRET) {
        config.auth.renewal_secret = Some(SecretString::new(secret));
    }
    if let Some(raw) = non_empty(ENV_ENVIRONMENT) {
        match Environment::parse(&raw) {
            Some(env) => config.server.environment = env,
            None => warn!(value = %raw, "ignoring unknown {ENV_ENVIRONMENT} value"),
        }
    }
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    // Project-local
    if let Some(p) = first_existing(Path::new(".")) {
        return Some(p);
    }

    // User-global: ~/.config/agora/
    home_dir()
        .map(|h| h.join(".config").join("agora"))
        .and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/agora/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("agora"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<AgoraConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
