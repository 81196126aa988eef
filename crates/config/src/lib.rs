//! Configuration loading and env substitution for the wagate gateway.
//!
//! Config files: `wagate.toml`, `wagate.yaml`, `wagate.yml` or `wagate.json`.
//! Searched in `./` then `~/.config/wagate/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config,
        parse_config,
    },
    schema::{
        AttachmentsConfig, ReconnectConfig, ReconnectStrategy, ServerConfig, ThrottleConfig,
        WagateConfig, WhatsAppConfig,
    },
    template::default_config_template,
};
