//! Core types used by the container management subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Supported container runtime backends.
///
/// Both runtimes share the same CLI surface, so the variant only selects the
/// executable and a few runtime-specific error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    pub fn binary(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Bridge,
    Host,
    None,
}

impl NetworkMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            NetworkMode::Bridge => "bridge",
            NetworkMode::Host => "host",
            NetworkMode::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: PortProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    /// cgroup permission string such as `rwm`; the runtime default applies when absent.
    #[serde(default)]
    pub permissions: Option<String>,
}

/// CPU, memory and GPU ceilings for one container. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub gpus: Option<u32>,
}

/// Declarative description of a game container.
///
/// Built by the resolver, owned by the session that created it and never
/// modified after being handed to a [`Launcher`](super::Launcher).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfiguration {
    pub image: String,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub limits: ResourceLimits,
    pub network: NetworkMode,
    #[serde(default)]
    pub devices: Vec<DeviceMapping>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerConfiguration {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: None,
            env: BTreeMap::new(),
            volumes: Vec::new(),
            ports: Vec::new(),
            limits: ResourceLimits::default(),
            network: NetworkMode::Bridge,
            devices: Vec::new(),
            labels: BTreeMap::new(),
        }
    }
}

/// Handle describing a specific container instance started by a launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Identifier returned by the runtime.
    pub id: String,
    /// Name assigned at start (e.g. `playhost-<game>-<uuid>`).
    pub name: String,
    pub runtime: RuntimeKind,
    pub created_at: DateTime<Utc>,
}

/// Runtime-reported state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Exited,
    Missing,
    Unknown,
}

impl ContainerState {
    pub fn parse(status: &str) -> Self {
        match status.trim() {
            "created" | "configured" | "initialized" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "exited" | "stopped" | "dead" | "removing" => ContainerState::Exited,
            _ => ContainerState::Unknown,
        }
    }
}
