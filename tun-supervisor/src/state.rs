// State manager for the supervisor lifecycle

//! Lifecycle state machine
//!
//! `Init -> Setup -> Running -> ShuttingDown -> Terminated`. Every transition
//! is unconditional once its event arrives: setup results never block the
//! move to `Running`, and a termination failure never blocks `Terminated`.

use crate::types::SupervisorState;

/// Events that drive the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Supervisor process started
    Start,
    /// The fixed step sequence has been issued (whatever the results)
    SetupFinished,
    /// Interrupt signal received
    Interrupted,
    /// Termination request sent to the tunnel
    TerminationIssued,
}

/// Actions to take in response to a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Execute the setup sequence
    RunSetup,
    /// Block until interrupted
    AwaitInterrupt,
    /// Send the termination request to the tunnel
    TerminateTunnel,
    /// Leave with success status
    Exit,
    /// No action needed
    None,
}

/// Lifecycle state machine
#[derive(Debug)]
pub struct Lifecycle {
    state: SupervisorState,
}

impl Lifecycle {
    /// Create a state machine in `Init`
    pub fn new() -> Self {
        Self {
            state: SupervisorState::Init,
        }
    }

    /// Handle an event and return the action to take
    pub fn handle_event(&mut self, event: LifecycleEvent) -> LifecycleAction {
        log::debug!("State: {:?}, Event: {:?}", self.state, event);

        match (self.state, event) {
            (SupervisorState::Init, LifecycleEvent::Start) => {
                self.state = SupervisorState::Setup;
                LifecycleAction::RunSetup
            }

            (SupervisorState::Setup, LifecycleEvent::SetupFinished) => {
                self.state = SupervisorState::Running;
                LifecycleAction::AwaitInterrupt
            }

            (SupervisorState::Running, LifecycleEvent::Interrupted) => {
                log::info!("Interrupted, terminating tunnel");
                self.state = SupervisorState::ShuttingDown;
                LifecycleAction::TerminateTunnel
            }

            (SupervisorState::ShuttingDown, LifecycleEvent::TerminationIssued) => {
                self.state = SupervisorState::Terminated;
                LifecycleAction::Exit
            }

            // Shutdown is single-shot
            (SupervisorState::ShuttingDown, LifecycleEvent::Interrupted)
            | (SupervisorState::Terminated, LifecycleEvent::Interrupted) => {
                log::debug!("Already shutting down, ignoring interrupt");
                LifecycleAction::None
            }

            _ => {
                log::debug!(
                    "No action for state {:?} with event {:?}",
                    self.state,
                    event
                );
                LifecycleAction::None
            }
        }
    }

    /// Current state
    pub fn state(&self) -> SupervisorState {
        self.state
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
