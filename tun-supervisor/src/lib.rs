// Tunnel supervisor library
// Shared modules for the daemon and tests

#![warn(missing_docs)]

//! Tunnel Supervisor Library
//!
//! Brings up a privileged tunnel environment (build, capability grant, launch,
//! interface address, link up, static neighbor entry), waits for an
//! interrupt, and terminates the tunnel process.
//!
//! # Main Components
//!
//! - [`config`]: Configuration file parsing and validation
//! - [`state`]: Lifecycle state machine
//! - [`state_file`]: State file for external monitoring
//! - [`supervisor`]: Setup sequencing and shutdown
//! - [`system`]: Host command execution behind the [`system::SystemOps`] trait
//! - [`types`]: Shared data structures

pub mod config;
pub mod state;
pub mod state_file;
pub mod supervisor;
pub mod system;
pub mod types;
