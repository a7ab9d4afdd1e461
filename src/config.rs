// src/config.rs

//! Configuration loading utilities.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Load configuration from a TOML file, apply environment overrides and
/// validate the result.
///
/// A missing or unreadable file falls back to defaults with a warning.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)
            .map_err(|e| AppError::config(format!("{}: {}", path.display(), e)))?
    } else {
        log::warn!("No config at {}; using defaults", path.display());
        Config::default()
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
