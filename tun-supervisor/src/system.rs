// Host command execution for setup and teardown

//! Narrow OS-interaction interface
//!
//! [`SystemOps`] is everything the supervisor asks of the host: build the
//! tunnel, grant it capabilities, start and stop it, and configure the
//! interface. [`HostSystem`] implements it with `go`, `setcap`, `ip`, `arp`
//! and `pkill`; tests substitute an in-memory host.

use crate::types::{InterfaceAddress, MacAddr, TunnelProcess};
use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::net::Ipv4Addr;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Operations the supervisor performs against the host
#[async_trait]
pub trait SystemOps: Send + Sync {
    /// Run the build command in `dir`
    async fn build(&self, command: &[String], dir: &Path) -> Result<()>;

    /// Grant file capabilities (e.g. `cap_net_admin=eip`) to `binary`
    async fn grant_capability(&self, binary: &Path, capabilities: &str) -> Result<()>;

    /// Start `binary` detached, with no arguments
    async fn launch(&self, binary: &Path) -> Result<TunnelProcess>;

    /// Add `address` to `interface`
    async fn assign_address(&self, interface: &str, address: &InterfaceAddress) -> Result<()>;

    /// Set `interface` link state up
    async fn set_link_up(&self, interface: &str) -> Result<()>;

    /// Add a static neighbor entry on the default interface
    async fn add_neighbor(&self, address: Ipv4Addr, lladdr: &MacAddr) -> Result<()>;

    /// Send SIGTERM to one process
    async fn terminate_pid(&self, pid: u32) -> Result<()>;

    /// Send SIGTERM to every process named `name`
    async fn terminate_by_name(&self, name: &str) -> Result<()>;

    /// IPv4 addresses currently assigned to `interface`
    async fn interface_addresses(&self, interface: &str) -> Result<Vec<Ipv4Addr>>;
}

/// [`SystemOps`] backed by the real host
pub struct HostSystem {
    use_sudo: bool,
}

impl HostSystem {
    /// Create a host executor; `use_sudo` prefixes setcap/ip/arp with sudo
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    /// Build a command that needs elevated privileges
    fn privileged(&self, program: &str) -> Command {
        if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        }
    }
}

/// Run a command to completion, turning a non-zero exit into an error with stderr
async fn run_checked(mut cmd: Command, what: &str) -> Result<()> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", what))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{} failed ({}): {}", what, output.status, stderr.trim());
    }

    Ok(())
}

#[async_trait]
impl SystemOps for HostSystem {
    async fn build(&self, command: &[String], dir: &Path) -> Result<()> {
        let (program, args) = command.split_first().context("Empty build command")?;

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(dir);

        run_checked(cmd, &command.join(" ")).await
    }

    async fn grant_capability(&self, binary: &Path, capabilities: &str) -> Result<()> {
        let mut cmd = self.privileged("setcap");
        cmd.arg(capabilities).arg(binary);

        run_checked(cmd, "setcap").await
    }

    async fn launch(&self, binary: &Path) -> Result<TunnelProcess> {
        let name = binary
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("Binary path has no file name: {}", binary.display()))?;

        // Own process group: a terminal Ctrl-C must not reach the tunnel directly
        let mut std_cmd = std::process::Command::new(binary);
        std_cmd.stdin(Stdio::null()).process_group(0);

        let child = Command::from(std_cmd)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", binary.display()))?;

        // The child is not waited on; tokio reaps it once it exits
        let pid = child.id();
        drop(child);

        Ok(TunnelProcess { name, pid })
    }

    async fn assign_address(&self, interface: &str, address: &InterfaceAddress) -> Result<()> {
        let mut cmd = self.privileged("ip");
        cmd.args(["addr", "add", &address.to_string(), "dev", interface]);

        run_checked(cmd, "ip addr add").await
    }

    async fn set_link_up(&self, interface: &str) -> Result<()> {
        let mut cmd = self.privileged("ip");
        cmd.args(["link", "set", "up", "dev", interface]);

        run_checked(cmd, "ip link set up").await
    }

    async fn add_neighbor(&self, address: Ipv4Addr, lladdr: &MacAddr) -> Result<()> {
        let mut cmd = self.privileged("arp");
        cmd.args(["-s", &address.to_string(), &lladdr.to_string()]);

        run_checked(cmd, "arp -s").await
    }

    async fn terminate_pid(&self, pid: u32) -> Result<()> {
        let raw = i32::try_from(pid).with_context(|| format!("Invalid pid {}", pid))?;
        kill(Pid::from_raw(raw), Signal::SIGTERM)
            .with_context(|| format!("Failed to send SIGTERM to pid {}", pid))?;
        Ok(())
    }

    async fn terminate_by_name(&self, name: &str) -> Result<()> {
        let status = Command::new("pkill")
            .arg(name)
            .stdin(Stdio::null())
            .status()
            .await
            .context("Failed to execute pkill")?;

        // pkill: 1 means nothing matched
        match status.code() {
            Some(0) => Ok(()),
            Some(1) => anyhow::bail!("No process matched '{}'", name),
            _ => anyhow::bail!("pkill {} failed ({})", name, status),
        }
    }

    async fn interface_addresses(&self, interface: &str) -> Result<Vec<Ipv4Addr>> {
        let interfaces = if_addrs::get_if_addrs().context("Failed to get interface addresses")?;

        Ok(interfaces
            .into_iter()
            .filter(|iface| iface.name == interface)
            .filter_map(|iface| match iface.addr {
                if_addrs::IfAddr::V4(ipv4) => Some(ipv4.ip),
                _ => None,
            })
            .collect())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_with_sudo() {
        let host = HostSystem::new(true);
        let cmd = host.privileged("ip");
        assert_eq!(cmd.as_std().get_program(), "sudo");
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, vec!["ip"]);
    }

    #[test]
    fn test_privileged_without_sudo() {
        let host = HostSystem::new(false);
        let cmd = host.privileged("arp");
        assert_eq!(cmd.as_std().get_program(), "arp");
        assert_eq!(cmd.as_std().get_args().count(), 0);
    }

    #[tokio::test]
    async fn test_run_checked_success() {
        assert!(run_checked(Command::new("true"), "true").await.is_ok());
    }

    #[tokio::test]
    async fn test_run_checked_reports_failure() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);

        let err = run_checked(cmd, "sh").await.unwrap_err().to_string();
        assert!(err.contains("sh failed"));
        assert!(err.contains("broken"));
    }

    #[tokio::test]
    async fn test_run_checked_missing_program() {
        let cmd = Command::new("/nonexistent/definitely-not-here");
        assert!(run_checked(cmd, "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_build_runs_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostSystem::new(false);

        let command = vec!["touch".to_string(), "built".to_string()];
        host.build(&command, dir.path()).await.unwrap();
        assert!(dir.path().join("built").exists());
    }

    #[tokio::test]
    async fn test_build_empty_command() {
        let host = HostSystem::new(false);
        assert!(host.build(&[], Path::new(".")).await.is_err());
    }

    #[tokio::test]
    async fn test_launch_missing_binary() {
        let host = HostSystem::new(false);
        assert!(host.launch(Path::new("/nonexistent/tigo")).await.is_err());
    }

    #[tokio::test]
    async fn test_launch_reports_name_and_pid() {
        let host = HostSystem::new(false);

        let process = host.launch(Path::new("/bin/true")).await.unwrap();
        assert_eq!(process.name, "true");
        assert!(process.pid.is_some());
    }

    #[tokio::test]
    async fn test_terminate_pid_out_of_range() {
        let host = HostSystem::new(false);
        assert!(host.terminate_pid(u32::MAX).await.is_err());
    }

    #[tokio::test]
    async fn test_interface_addresses_loopback() {
        let host = HostSystem::new(false);
        let addrs = host.interface_addresses("lo").await.unwrap();
        assert!(addrs.contains(&Ipv4Addr::LOCALHOST));

        let addrs = host.interface_addresses("no-such-iface0").await.unwrap();
        assert!(addrs.is_empty());
    }
}
