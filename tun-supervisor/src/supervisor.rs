// Tunnel supervisor

//! Process and interface lifecycle supervisor
//!
//! Runs the fixed setup sequence best-effort, waits for an interrupt, then
//! terminates the tunnel. No step result ever changes the control flow:
//! failures are recorded in the [`SetupReport`] and logged, and the sequence
//! carries on. Interface configuration is left in place on exit.

use crate::state::{Lifecycle, LifecycleAction, LifecycleEvent};
use crate::state_file;
use crate::system::SystemOps;
use crate::types::{
    Config, SetupReport, SetupStep, StepOutcome, StepStatus, SupervisorState, TerminationMode,
    TunnelProcess,
};
use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;

/// Drives one run of the tunnel environment
pub struct Supervisor<S: SystemOps> {
    system: S,
    config: Config,
    lifecycle: Lifecycle,
    tunnel: Option<TunnelProcess>,
    state_file: Option<PathBuf>,
}

impl<S: SystemOps> Supervisor<S> {
    /// Create a supervisor over `system`; `config` is assumed validated
    pub fn new(system: S, config: Config) -> Self {
        let state_file = config.general.state_file_path();
        Self {
            system,
            config,
            lifecycle: Lifecycle::new(),
            tunnel: None,
            state_file,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SupervisorState {
        self.lifecycle.state()
    }

    /// The tunnel launched by this run, if the launch succeeded
    pub fn tunnel(&self) -> Option<&TunnelProcess> {
        self.tunnel.as_ref()
    }

    /// The host the supervisor acts on
    pub fn system(&self) -> &S {
        &self.system
    }

    /// The setup sequence, in execution order
    pub fn plan(&self) -> Vec<SetupStep> {
        let tunnel = &self.config.tunnel;
        let iface = &self.config.interface;
        let binary = tunnel.binary_path();

        vec![
            SetupStep::Build {
                command: tunnel.build_command.clone(),
                dir: tunnel.source_dir.clone(),
            },
            SetupStep::GrantCapability {
                binary: binary.clone(),
                capabilities: tunnel.capabilities.clone(),
            },
            SetupStep::Launch { binary },
            SetupStep::AssignAddress {
                interface: iface.name.clone(),
                address: iface.address,
            },
            SetupStep::LinkUp {
                interface: iface.name.clone(),
            },
            SetupStep::AddNeighbor {
                address: iface.peer_address,
                lladdr: iface.peer_lladdr,
            },
        ]
    }

    /// Run the whole lifecycle: setup, wait for `interrupt`, terminate.
    ///
    /// Returns the setup report once the termination request has been
    /// issued. An interrupt that resolves before setup completes is only
    /// observed after the full sequence has run.
    pub async fn run<F>(&mut self, interrupt: F) -> SetupReport
    where
        F: Future<Output = ()>,
    {
        let mut interrupt = std::pin::pin!(interrupt);
        let mut report = SetupReport::default();
        let mut event = LifecycleEvent::Start;

        loop {
            match self.transition(event) {
                LifecycleAction::RunSetup => {
                    report = self.setup().await;
                    event = LifecycleEvent::SetupFinished;
                }
                LifecycleAction::AwaitInterrupt => {
                    log::info!("Tunnel environment up, waiting for interrupt");
                    interrupt.as_mut().await;
                    event = LifecycleEvent::Interrupted;
                }
                LifecycleAction::TerminateTunnel => {
                    self.terminate().await;
                    event = LifecycleEvent::TerminationIssued;
                }
                LifecycleAction::Exit => break,
                LifecycleAction::None => {
                    log::warn!("Lifecycle stalled in state {:?}", self.state());
                    break;
                }
            }
        }

        if let Some(path) = &self.state_file {
            state_file::cleanup(path);
        }

        report
    }

    /// Execute every step once, in order, never stopping early
    pub async fn setup(&mut self) -> SetupReport {
        let mut outcomes = Vec::new();

        for step in self.plan() {
            log::info!("Setup: {}", step);

            let status = match self.execute(&step).await {
                Ok(()) => StepStatus::Succeeded,
                Err(e) => {
                    log::warn!("Step {} failed, continuing: {:#}", step.name(), e);
                    StepStatus::Failed(format!("{:#}", e))
                }
            };

            outcomes.push(StepOutcome { step, status });
        }

        self.verify_interface().await;

        let report = SetupReport {
            outcomes,
            tunnel: self.tunnel.clone(),
        };

        let failed = report.failures().count();
        if failed == 0 {
            log::info!("Setup complete");
        } else {
            log::warn!(
                "Setup finished with {} of {} steps failed",
                failed,
                report.outcomes.len()
            );
        }

        report
    }

    async fn execute(&mut self, step: &SetupStep) -> Result<()> {
        match step {
            SetupStep::Build { command, dir } => self.system.build(command, dir).await,
            SetupStep::GrantCapability {
                binary,
                capabilities,
            } => self.system.grant_capability(binary, capabilities).await,
            SetupStep::Launch { binary } => {
                let process = self.system.launch(binary).await?;
                match process.pid {
                    Some(pid) => log::info!("Tunnel {} started (pid {})", process.name, pid),
                    None => log::info!("Tunnel {} started (pid unknown)", process.name),
                }
                self.tunnel = Some(process);
                Ok(())
            }
            SetupStep::AssignAddress { interface, address } => {
                self.system.assign_address(interface, address).await
            }
            SetupStep::LinkUp { interface } => self.system.set_link_up(interface).await,
            SetupStep::AddNeighbor { address, lladdr } => {
                self.system.add_neighbor(*address, lladdr).await
            }
        }
    }

    /// Check that the interface ended up with the configured address
    async fn verify_interface(&self) {
        let iface = &self.config.interface;

        match self.system.interface_addresses(&iface.name).await {
            Ok(addrs) if addrs.contains(&iface.address.addr) => {
                log::debug!("Interface {} carries {}", iface.name, iface.address);
            }
            Ok(_) => {
                log::warn!(
                    "Interface {} does not carry {} after setup",
                    iface.name,
                    iface.address
                );
            }
            Err(e) => {
                log::warn!("Failed to inspect interface {}: {:#}", iface.name, e);
            }
        }
    }

    /// Issue the termination request. Never waits for the tunnel to exit and
    /// never reports failure: an error only gets logged.
    pub async fn terminate(&mut self) {
        let name = &self.config.tunnel.name;
        let tunnel = self.tunnel.take();

        if self.config.general.termination == TerminationMode::ByHandle {
            match tunnel.as_ref().and_then(|t| t.pid) {
                Some(pid) => match self.system.terminate_pid(pid).await {
                    Ok(()) => {
                        log::info!("Sent SIGTERM to tunnel pid {}", pid);
                        return;
                    }
                    Err(e) => {
                        log::warn!(
                            "{:#}, falling back to name-based termination of '{}'",
                            e,
                            name
                        );
                    }
                },
                None => {
                    log::info!(
                        "No tunnel pid captured, falling back to name-based termination of '{}'",
                        name
                    );
                }
            }
        }

        match self.system.terminate_by_name(name).await {
            Ok(()) => log::info!("Sent SIGTERM to all '{}' processes", name),
            Err(e) => log::warn!("Name-based termination of '{}': {:#}", name, e),
        }
    }

    fn transition(&mut self, event: LifecycleEvent) -> LifecycleAction {
        let action = self.lifecycle.handle_event(event);

        if let Some(path) = &self.state_file {
            let pid = self.tunnel.as_ref().and_then(|t| t.pid);
            if let Err(e) = state_file::write_state(path, self.lifecycle.state(), pid) {
                log::warn!("Failed to write state file: {}", e);
            }
        }

        action
    }
}
