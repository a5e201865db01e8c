pub mod config;
pub mod jobs;
pub mod run;
pub mod validate;

use jobvisor_core::Config;
use std::path::Path;

/// Load the config from `path` or the default location, then apply
/// `JOBVISOR_*` environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides()?;
    Ok(config)
}
