//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_info, print_success, print_warning};
use fci_core::config::{self, SessionConfig};

/// Config file in use: `--config`, else the default location
pub fn config_file(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Load the session config, falling back to defaults when no file exists
///
/// An explicit `--config` must exist.
pub fn load_session_config(config_path: Option<&PathBuf>) -> Result<SessionConfig> {
    let path = config_file(config_path);

    if config_path.is_none() && !path.exists() {
        tracing::debug!("No config at {:?}, using defaults", path);
        return Ok(SessionConfig::default());
    }

    let session_config: SessionConfig = config::load_config(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    tracing::debug!("Loaded config from {:?}", path);
    Ok(session_config)
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = config_file(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'fast-ci config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}

/// Write the default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = config_file(config_path);

    if path.exists() && !force {
        print_warning(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    write_default(&path)?;
    print_success(&format!("Created config file: {:?}", path));
    Ok(())
}

fn write_default(path: &Path) -> Result<()> {
    config::save_config(path, &SessionConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))
}
