// State file writer for external monitoring
//!
//! Writes the supervisor's lifecycle state and the tunnel pid to a small
//! key=value file so shell scripts and status bars can follow it.

use crate::types::SupervisorState;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Write current state to `path`, creating its directory if needed
pub fn write_state(path: &Path, state: SupervisorState, pid: Option<u32>) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).context("Failed to create state directory")?;
        }
    }

    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let content = format!(
        "STATE={}\nPID={}\nTIMESTAMP={}\n",
        state.as_str(),
        pid.map(|p| p.to_string()).unwrap_or_default(),
        timestamp
    );

    fs::write(path, content).context("Failed to write state file")?;

    Ok(())
}

/// Remove state file on shutdown
pub fn cleanup(path: &Path) {
    let _ = fs::remove_file(path);
}
