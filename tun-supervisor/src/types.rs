// Shared types for the supervisor

//! Shared data structures
//!
//! This module defines the typed setup actions, their outcomes, the supervised
//! tunnel process, the lifecycle states and the configuration structures.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

/// IPv4 address with prefix length, written as `A.B.C.D/N`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct InterfaceAddress {
    /// Interface address (host bits kept)
    pub addr: Ipv4Addr,
    /// Prefix length, 0..=32
    pub prefix_len: u8,
}

impl InterfaceAddress {
    /// Create an address, rejecting prefix lengths above 32
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        anyhow::ensure!(prefix_len <= 32, "Prefix length must be <= 32");
        Ok(Self { addr, prefix_len })
    }
}

impl FromStr for InterfaceAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ip, prefix) = s
            .split_once('/')
            .context("Invalid address format (expected X.X.X.X/N)")?;

        let addr: Ipv4Addr = ip.parse().context("Invalid IP address")?;
        let prefix_len: u8 = prefix.parse().context("Invalid prefix length")?;

        Self::new(addr, prefix_len)
    }
}

impl TryFrom<String> for InterfaceAddress {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Link-layer (MAC) address, written as `xx:xx:xx:xx:xx:xx`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');

        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .context("Invalid MAC address (expected 6 octets)")?;
            anyhow::ensure!(part.len() == 2, "Invalid MAC octet: '{}'", part);
            *octet = u8::from_str_radix(part, 16)
                .with_context(|| format!("Invalid MAC octet: '{}'", part))?;
        }

        anyhow::ensure!(
            parts.next().is_none(),
            "Invalid MAC address (expected 6 octets)"
        );

        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

/// One privileged configuration action, executed once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStep {
    /// Build the tunnel binary from source
    Build {
        /// Program and arguments
        command: Vec<String>,
        /// Working directory
        dir: PathBuf,
    },
    /// Grant capabilities to the built binary
    GrantCapability {
        /// Built binary
        binary: PathBuf,
        /// setcap capability set
        capabilities: String,
    },
    /// Launch the binary as a detached background process
    Launch {
        /// Binary to start
        binary: PathBuf,
    },
    /// Assign an address to the tunnel interface
    AssignAddress {
        /// Target interface
        interface: String,
        /// Address and prefix
        address: InterfaceAddress,
    },
    /// Set the tunnel interface link up
    LinkUp {
        /// Target interface
        interface: String,
    },
    /// Install a static neighbor (ARP) entry
    AddNeighbor {
        /// Peer address
        address: Ipv4Addr,
        /// Link-layer address for the peer
        lladdr: MacAddr,
    },
}

impl SetupStep {
    /// Short stable name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            SetupStep::Build { .. } => "build",
            SetupStep::GrantCapability { .. } => "grant-capability",
            SetupStep::Launch { .. } => "launch",
            SetupStep::AssignAddress { .. } => "assign-address",
            SetupStep::LinkUp { .. } => "link-up",
            SetupStep::AddNeighbor { .. } => "add-neighbor",
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStep::Build { command, dir } => {
                write!(f, "build '{}' in {}", command.join(" "), dir.display())
            }
            SetupStep::GrantCapability {
                binary,
                capabilities,
            } => write!(f, "grant {} to {}", capabilities, binary.display()),
            SetupStep::Launch { binary } => write!(f, "launch {}", binary.display()),
            SetupStep::AssignAddress { interface, address } => {
                write!(f, "assign {} to {}", address, interface)
            }
            SetupStep::LinkUp { interface } => write!(f, "set {} up", interface),
            SetupStep::AddNeighbor { address, lladdr } => {
                write!(f, "add neighbor {} -> {}", address, lladdr)
            }
        }
    }
}

/// Result of a single step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// Command completed with a zero exit status
    Succeeded,
    /// Command could not run or exited non-zero; carries the error chain
    Failed(String),
}

/// Step paired with its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// The step that was executed
    pub step: SetupStep,
    /// How it ended
    pub status: StepStatus,
}

impl StepOutcome {
    /// True if the step succeeded
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// The externally launched tunnel process
///
/// `name` is what name-based termination matches against. `pid` is only
/// present when the OS reported one at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelProcess {
    /// Process name (binary file name)
    pub name: String,
    /// OS process id captured at spawn
    pub pid: Option<u32>,
}

/// Everything that happened during setup, in execution order
#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    /// One outcome per step, in execution order
    pub outcomes: Vec<StepOutcome>,
    /// The launched tunnel, if the launch step succeeded
    pub tunnel: Option<TunnelProcess>,
}

impl SetupReport {
    /// Outcomes of steps that failed
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// True if no step failed
    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Process started, nothing done yet
    Init,
    /// Running the fixed step sequence
    Setup,
    /// Waiting for an interrupt
    Running,
    /// Terminating the tunnel
    ShuttingDown,
    /// Done, about to exit
    Terminated,
}

impl SupervisorState {
    /// Name written to the state file
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Init => "init",
            SupervisorState::Setup => "setup",
            SupervisorState::Running => "running",
            SupervisorState::ShuttingDown => "shutting-down",
            SupervisorState::Terminated => "terminated",
        }
    }
}

/// How the tunnel is targeted on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationMode {
    /// Signal every process matching the tunnel name
    #[default]
    ByName,
    /// Signal the launched pid, falling back to the name broadcast
    ByHandle,
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Logging, privilege, termination and state file options
    #[serde(default)]
    pub general: GeneralConfig,
    /// Tunnel binary build and launch options
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// Virtual interface and neighbor configuration
    #[serde(default)]
    pub interface: InterfaceConfig,
}

/// General configuration options
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// env_logger filter, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prefix setcap/ip/arp with sudo
    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,
    /// How the tunnel is targeted on shutdown
    #[serde(default)]
    pub termination: TerminationMode,
    /// State file location; unset or empty disables it
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            use_sudo: default_use_sudo(),
            termination: TerminationMode::default(),
            state_file: None,
        }
    }
}

impl GeneralConfig {
    /// State file path, or None when disabled
    pub fn state_file_path(&self) -> Option<PathBuf> {
        self.state_file
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// Tunnel binary configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TunnelConfig {
    /// Process name matched by name-based termination
    #[serde(default = "default_tunnel_name")]
    pub name: String,
    /// Directory the build command runs in
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Build command and arguments
    #[serde(default = "default_build_command")]
    pub build_command: Vec<String>,
    /// Defaults to `<source_dir>/<name>`
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// setcap capability set
    #[serde(default = "default_capabilities")]
    pub capabilities: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            name: default_tunnel_name(),
            source_dir: default_source_dir(),
            build_command: default_build_command(),
            binary: None,
            capabilities: default_capabilities(),
        }
    }
}

impl TunnelConfig {
    /// Path of the built binary
    pub fn binary_path(&self) -> PathBuf {
        self.binary
            .clone()
            .unwrap_or_else(|| self.source_dir.join(&self.name))
    }
}

/// Static configuration of the virtual interface and its one neighbor
#[derive(Debug, Deserialize, Clone)]
pub struct InterfaceConfig {
    /// Interface created by the tunnel
    #[serde(default = "default_interface_name")]
    pub name: String,
    /// Address assigned to the interface
    #[serde(default = "default_interface_address")]
    pub address: InterfaceAddress,
    /// Peer address of the static neighbor entry
    #[serde(default = "default_peer_address")]
    pub peer_address: Ipv4Addr,
    /// Link-layer address the peer maps to
    #[serde(default = "default_peer_lladdr")]
    pub peer_lladdr: MacAddr,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: default_interface_name(),
            address: default_interface_address(),
            peer_address: default_peer_address(),
            peer_lladdr: default_peer_lladdr(),
        }
    }
}

// Default values for configuration
fn default_log_level() -> String {
    "info".to_string()
}

fn default_use_sudo() -> bool {
    true
}

fn default_tunnel_name() -> String {
    "tigo".to_string()
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_build_command() -> Vec<String> {
    vec!["go".to_string(), "build".to_string()]
}

fn default_capabilities() -> String {
    "cap_net_admin=eip".to_string()
}

fn default_interface_name() -> String {
    "tun0".to_string()
}

fn default_interface_address() -> InterfaceAddress {
    InterfaceAddress {
        addr: Ipv4Addr::new(192, 168, 0, 1),
        prefix_len: 24,
    }
}

fn default_peer_address() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 0, 2)
}

fn default_peer_lladdr() -> MacAddr {
    MacAddr([0xff, 0xff, 0xff, 0xff, 0xff, 0xf1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_address_parse() {
        let addr: InterfaceAddress = "192.168.0.1/24".parse().unwrap();
        assert_eq!(addr.addr, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(addr.prefix_len, 24);
        assert_eq!(addr.to_string(), "192.168.0.1/24");

        // Host bits are kept: this is an interface address, not a network
        let addr: InterfaceAddress = "10.0.0.7/8".parse().unwrap();
        assert_eq!(addr.addr, Ipv4Addr::new(10, 0, 0, 7));
    }

    #[test]
    fn test_interface_address_parse_invalid() {
        assert!("192.168.0.1".parse::<InterfaceAddress>().is_err());
        assert!("192.168.0.1/".parse::<InterfaceAddress>().is_err());
        assert!("192.168.0.1/33".parse::<InterfaceAddress>().is_err());
        assert!("999.168.0.1/24".parse::<InterfaceAddress>().is_err());
        assert!("invalid".parse::<InterfaceAddress>().is_err());
    }

    #[test]
    fn test_interface_address_edge_prefixes() {
        assert!("0.0.0.0/0".parse::<InterfaceAddress>().is_ok());
        assert!("10.0.0.1/32".parse::<InterfaceAddress>().is_ok());
        assert!(InterfaceAddress::new(Ipv4Addr::LOCALHOST, 33).is_err());
    }

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "ff:ff:ff:ff:ff:f1".parse().unwrap();
        assert_eq!(mac.0, [0xff, 0xff, 0xff, 0xff, 0xff, 0xf1]);
        assert_eq!(mac.to_string(), "ff:ff:ff:ff:ff:f1");

        // Upper case input, lower case output
        let mac: MacAddr = "02:AB:cd:00:10:FF".parse().unwrap();
        assert_eq!(mac.to_string(), "02:ab:cd:00:10:ff");
    }

    #[test]
    fn test_mac_parse_invalid() {
        assert!("ff:ff:ff:ff:ff".parse::<MacAddr>().is_err());
        assert!("ff:ff:ff:ff:ff:ff:ff".parse::<MacAddr>().is_err());
        assert!("ff:ff:ff:ff:ff:gg".parse::<MacAddr>().is_err());
        assert!("f:ff:ff:ff:ff:fff".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_step_names_distinct() {
        let steps = [
            SetupStep::Build {
                command: vec!["go".into(), "build".into()],
                dir: PathBuf::from("."),
            },
            SetupStep::GrantCapability {
                binary: PathBuf::from("./tigo"),
                capabilities: "cap_net_admin=eip".into(),
            },
            SetupStep::Launch {
                binary: PathBuf::from("./tigo"),
            },
            SetupStep::AssignAddress {
                interface: "tun0".into(),
                address: default_interface_address(),
            },
            SetupStep::LinkUp {
                interface: "tun0".into(),
            },
            SetupStep::AddNeighbor {
                address: default_peer_address(),
                lladdr: default_peer_lladdr(),
            },
        ];

        let mut names: Vec<_> = steps.iter().map(|s| s.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), steps.len());
    }

    #[test]
    fn test_step_display() {
        let step = SetupStep::AddNeighbor {
            address: Ipv4Addr::new(192, 168, 0, 2),
            lladdr: default_peer_lladdr(),
        };
        assert_eq!(
            step.to_string(),
            "add neighbor 192.168.0.2 -> ff:ff:ff:ff:ff:f1"
        );
    }

    #[test]
    fn test_setup_report_failures() {
        let ok = StepOutcome {
            step: SetupStep::LinkUp {
                interface: "tun0".into(),
            },
            status: StepStatus::Succeeded,
        };
        let failed = StepOutcome {
            step: SetupStep::Launch {
                binary: PathBuf::from("./tigo"),
            },
            status: StepStatus::Failed("No such file or directory".into()),
        };

        let report = SetupReport {
            outcomes: vec![ok.clone()],
            tunnel: None,
        };
        assert!(report.all_succeeded());

        let report = SetupReport {
            outcomes: vec![ok, failed.clone()],
            tunnel: None,
        };
        assert!(!report.all_succeeded());
        assert_eq!(report.failures().collect::<Vec<_>>(), vec![&failed]);
    }

    #[test]
    fn test_default_config_matches_stock_setup() {
        let config = Config::default();
        assert_eq!(config.tunnel.name, "tigo");
        assert_eq!(config.tunnel.binary_path(), PathBuf::from("./tigo"));
        assert_eq!(config.tunnel.build_command, vec!["go", "build"]);
        assert_eq!(config.interface.name, "tun0");
        assert_eq!(config.interface.address.to_string(), "192.168.0.1/24");
        assert_eq!(config.interface.peer_address, Ipv4Addr::new(192, 168, 0, 2));
        assert_eq!(config.interface.peer_lladdr.to_string(), "ff:ff:ff:ff:ff:f1");
        assert_eq!(config.general.termination, TerminationMode::ByName);
        assert!(config.general.use_sudo);
    }

    #[test]
    fn test_binary_path_override() {
        let tunnel = TunnelConfig {
            binary: Some(PathBuf::from("/opt/tigo/bin/tigo")),
            ..TunnelConfig::default()
        };
        assert_eq!(tunnel.binary_path(), PathBuf::from("/opt/tigo/bin/tigo"));
    }

    #[test]
    fn test_state_file_path_empty_disables() {
        let general = GeneralConfig {
            state_file: Some(PathBuf::new()),
            ..GeneralConfig::default()
        };
        assert!(general.state_file_path().is_none());

        let general = GeneralConfig {
            state_file: Some(PathBuf::from("/run/user/1000/tun-supervisor/state")),
            ..GeneralConfig::default()
        };
        assert!(general.state_file_path().is_some());
    }

    #[test]
    fn test_state_file_disabled_by_default() {
        assert!(GeneralConfig::default().state_file_path().is_none());
    }

    #[test]
    fn test_supervisor_state_strings() {
        assert_eq!(SupervisorState::Init.as_str(), "init");
        assert_eq!(SupervisorState::ShuttingDown.as_str(), "shutting-down");
        assert_eq!(SupervisorState::Terminated.as_str(), "terminated");
    }
}
