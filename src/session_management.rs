//! Session management core module.
//!
//! This module provides the runner session model and the manager that drives
//! sessions through `starting → running ⇄ paused → stopping → stopped`,
//! attaching containers through a [`Launcher`](crate::container_management::Launcher).

/// Submodule for session data structures and status rules.
pub mod session;
/// Submodule for the session manager implementation.
pub mod session_manager;
#[cfg(test)]
mod tests;

pub use session::{ResourceSnapshot, RunnerSession, SessionStats, SessionStatus};
pub use session_manager::{SessionManager, SessionSettings};
