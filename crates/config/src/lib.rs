//! Configuration loading, validation, and env substitution.
//!
//! Config files: `agora.toml`, `agora.yaml`, or `agora.json`
//! Searched in `./` then `~/.config/agora/`.
//!
//! Secrets may also come from `AGORA_SESSION_SECRET` / `AGORA_RENEWAL_SECRET`
//! and the deployment environment from `AGORA_ENV`.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, clear_config_dir, config_dir, discover_and_load, find_config_file,
        load_config, set_config_dir, try_discover_and_load,
    },
    schema::{
        AgoraConfig, AuthConfig, ChannelConfig, ContentSignatures, Environment, PatternRule,
        PatternSeverity, SecretPolicyConfig, ServerConfig, WeakSecretEntry,
    },
};
