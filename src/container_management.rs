//! Container management subsystem.
//!
//! This module exposes the launcher seam used by the session manager and a
//! concrete adapter driving a Docker-compatible runtime CLI.
//!
//! Re-exports:
//! - [`Launcher`]: the start/stop/inspect contract.
//! - [`ContainerManager`]: CLI-backed launcher (`docker` or `podman`).
//! - [`ContainerConfiguration`], [`ContainerHandle`], [`RuntimeKind`]: core types.
//!
//! Example (non-running):
//! ```ignore
//! use playhost::container_management::{ContainerConfiguration, ContainerManager, Launcher, RuntimeKind};
//!
//! let manager = ContainerManager::new(RuntimeKind::Docker, None)?;
//! let handle = manager.start(&ContainerConfiguration::new("runner:base")).await?;
//! manager.stop(&handle).await?;
//! ```

pub mod container_manager;
#[cfg(test)]
pub mod integration_tests;
pub mod launcher;
pub mod types;

pub use container_manager::ContainerManager;
pub use launcher::Launcher;
pub use types::{
    ContainerConfiguration, ContainerHandle, ContainerState, DeviceMapping, NetworkMode,
    PortMapping, PortProtocol, ResourceLimits, RuntimeKind, VolumeMount,
};
