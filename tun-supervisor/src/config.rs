// Configuration file parser

//! Configuration file parsing and validation
//!
//! Every field has a default that reproduces the stock setup (`tigo` on
//! `tun0`), so running without a file is the common case. Names that end up
//! on command lines are restricted to a safe character set.

use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Linux interface names are limited to IFNAMSIZ - 1 bytes
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// `pkill` matches against the kernel `comm` field, which is truncated to 15 bytes
const MAX_PROCESS_NAME_LEN: usize = 15;

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

    let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration values
pub fn validate_config(config: &Config) -> Result<()> {
    validate_process_name(&config.tunnel.name)?;
    validate_interface_name(&config.interface.name)?;

    if config.tunnel.build_command.is_empty() || config.tunnel.build_command[0].is_empty() {
        anyhow::bail!("tunnel.build_command cannot be empty");
    }

    if config.tunnel.capabilities.trim().is_empty() {
        anyhow::bail!("tunnel.capabilities cannot be empty");
    }

    if config.tunnel.binary_path().as_os_str().is_empty() {
        anyhow::bail!("tunnel.binary cannot be empty");
    }

    Ok(())
}

/// Validates that a name is safe to pass as a single command-line argument.
/// Allows ASCII alphanumerics plus the given extra characters.
fn validate_name(name: &str, field_name: &str, extra: &[char]) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("{} cannot be empty", field_name);
    }

    if name.starts_with('-') {
        anyhow::bail!("{} cannot start with '-': '{}'", field_name, name);
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || extra.contains(&c))
    {
        anyhow::bail!(
            "{} contains invalid characters: '{}'. Only alphanumeric characters and {:?} are allowed",
            field_name,
            name,
            extra
        );
    }

    Ok(())
}

/// Validates the tunnel process name used for name-based termination
///
/// `pkill` treats the name as a regex, so `.` is rejected along with every
/// other metacharacter.
fn validate_process_name(name: &str) -> Result<()> {
    validate_name(name, "Tunnel name", &['-', '_'])?;

    if name.len() > MAX_PROCESS_NAME_LEN {
        anyhow::bail!(
            "Tunnel name '{}' is longer than {} bytes and would never match the running process",
            name,
            MAX_PROCESS_NAME_LEN
        );
    }

    Ok(())
}

/// Validates a network interface name (alphanumeric, hyphen, underscore, max 15 bytes)
///
/// # Errors
///
/// Returns an error if the name is empty, too long or contains invalid characters.
pub fn validate_interface_name(name: &str) -> Result<()> {
    validate_name(name, "Interface name", &['-', '_'])?;

    if name.len() > MAX_INTERFACE_NAME_LEN {
        anyhow::bail!(
            "Interface name '{}' is longer than {} bytes",
            name,
            MAX_INTERFACE_NAME_LEN
        );
    }

    Ok(())
}
