use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::process::Stdio;
use tokio::process::Command;
use uuid::Uuid;

use crate::container_management::launcher::Launcher;
use crate::container_management::types::{
    ContainerConfiguration, ContainerHandle, ContainerState, PortProtocol, RuntimeKind,
};
use crate::error_handling::types::LaunchError;

/// Label carrying the game reference; also used to derive the container name.
pub const GAME_LABEL: &str = "playhost.game";

/// Drives game containers through a Docker-compatible runtime CLI.
///
/// Design notes:
/// - Containers run detached and are named `playhost-<game>-<uuid>`.
/// - `stop` removes the container with `rm --force`, so a stop always leaves no
///   trace and a missing container is not an error.
/// - The manager keeps no registry; the session manager owns the handles.
pub struct ContainerManager {
    runtime: RuntimeKind,
    binary: String,
}

impl ContainerManager {
    /// Creates a new `ContainerManager`.
    ///
    /// Returns an error if the runtime executable cannot be executed on the host.
    pub fn new(runtime: RuntimeKind, binary: Option<String>) -> Result<Self, LaunchError> {
        let binary = binary.unwrap_or_else(|| runtime.binary().to_string());
        info!("Initializing ContainerManager with runtime {:?} ({})", runtime, binary);

        if !Self::is_runtime_available(&binary) {
            error!("{} runtime is not available on this system", binary);
            return Err(LaunchError::RuntimeNotAvailable(format!(
                "'{} --version' failed",
                binary
            )));
        }

        Ok(Self { runtime, binary })
    }

    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    /// Checks whether the runtime executable answers `--version`.
    fn is_runtime_available(binary: &str) -> bool {
        let available = std::process::Command::new(binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        debug!("{} availability check: {}", binary, available);
        available
    }

    async fn run_cli(&self, args: &[String]) -> Result<std::process::Output, LaunchError> {
        debug!("Running {} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    LaunchError::RuntimeNotAvailable(format!("{} not found: {}", self.binary, e))
                } else {
                    LaunchError::IoError(e)
                }
            })
    }
}

#[async_trait]
impl Launcher for ContainerManager {
    async fn start(&self, config: &ContainerConfiguration) -> Result<ContainerHandle, LaunchError> {
        let name = container_name(config);
        info!("Starting container {} from image {}", name, config.image);

        let args = build_run_args(config, &name);
        let output = self.run_cli(&args).await?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            error!("Container {} failed to start: {}", name, stderr);
            return Err(classify_start_failure(&stderr));
        }
        if !stderr.is_empty() {
            debug!("[{}][stderr] {}", name, stderr);
        }

        let id = String::from_utf8_lossy(&output.stdout)
            .lines()
            .last()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| name.clone());

        info!("Container {} started with id {}", name, id);
        Ok(ContainerHandle {
            id,
            name,
            runtime: self.runtime,
            created_at: Utc::now(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), LaunchError> {
        info!("Stopping container {}", handle.name);
        let args = vec!["rm".to_string(), "--force".to_string(), handle.name.clone()];
        let output = self.run_cli(&args).await?;

        if output.status.success() {
            debug!("Container {} removed", handle.name);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_container(&stderr) {
            debug!("Container {} was already gone", handle.name);
            return Ok(());
        }

        warn!("Failed to remove container {}: {}", handle.name, stderr.trim());
        Err(LaunchError::StopFailed(stderr.trim().to_string()))
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerState, LaunchError> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}".to_string(),
            handle.name.clone(),
        ];
        let output = self.run_cli(&args).await?;

        if output.status.success() {
            let status = String::from_utf8_lossy(&output.stdout);
            return Ok(ContainerState::parse(&status));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_container(&stderr) {
            return Ok(ContainerState::Missing);
        }
        Err(LaunchError::InspectFailed(stderr.trim().to_string()))
    }
}

/// Derives `playhost-<game>-<uuid>` from the game label, sanitised for the runtime.
pub fn container_name(config: &ContainerConfiguration) -> String {
    let game: String = config
        .labels
        .get(GAME_LABEL)
        .map(|g| {
            g.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                        c.to_ascii_lowercase()
                    } else {
                        '-'
                    }
                })
                .take(40)
                .collect()
        })
        .filter(|g: &String| !g.is_empty())
        .unwrap_or_else(|| "game".to_string());
    format!("playhost-{}-{}", game, Uuid::new_v4().simple())
}

/// Translates a configuration into `run` arguments for a Docker-compatible CLI.
pub fn build_run_args(config: &ContainerConfiguration, name: &str) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--detach".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--network".to_string(),
        config.network.as_arg().to_string(),
    ];

    for (key, value) in &config.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (key, value) in &config.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }

    for mount in &config.volumes {
        let mut spec = format!(
            "{}:{}",
            mount.host_path.display(),
            mount.container_path.display()
        );
        if mount.read_only {
            spec.push_str(":ro");
        }
        args.push("--volume".to_string());
        args.push(spec);
    }

    for port in &config.ports {
        let proto = match port.protocol {
            PortProtocol::Tcp => "tcp",
            PortProtocol::Udp => "udp",
        };
        args.push("--publish".to_string());
        args.push(format!("{}:{}/{}", port.host_port, port.container_port, proto));
    }

    for device in &config.devices {
        let mut spec = format!(
            "{}:{}",
            device.host_path.display(),
            device.container_path.display()
        );
        if let Some(ref perms) = device.permissions {
            spec.push(':');
            spec.push_str(perms);
        }
        args.push("--device".to_string());
        args.push(spec);
    }

    if let Some(cpus) = config.limits.cpus {
        args.push("--cpus".to_string());
        args.push(format!("{}", cpus));
    }
    if let Some(memory) = config.limits.memory_mb {
        args.push("--memory".to_string());
        args.push(format!("{}m", memory));
    }
    if let Some(gpus) = config.limits.gpus {
        args.push("--gpus".to_string());
        args.push(gpus.to_string());
    }

    args.push(config.image.clone());
    if let Some(ref command) = config.command {
        args.extend(command.iter().cloned());
    }
    args
}

// The CLIs only report failures as text. Docker and podman word them differently.
const MISSING_CONTAINER: &[&str] = &[
    "no such container",
    "no such object",
    "no container with name or id",
];

const RUNTIME_UNREACHABLE: &[&str] = &[
    "cannot connect",
    "unable to connect",
    "connection refused",
    "is the docker daemon running",
];

const CONFIGURATION_REJECTED: &[&str] = &[
    "unable to find image",
    "image not known",
    "invalid reference format",
    "manifest unknown",
    "did not resolve to an alias",
    "requested access to the resource is denied",
    "invalid argument",
    "error response from daemon: invalid",
];

fn mentions_any(stderr: &str, needles: &[&str]) -> bool {
    let lower = stderr.to_ascii_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}

pub(crate) fn is_missing_container(stderr: &str) -> bool {
    mentions_any(stderr, MISSING_CONTAINER)
}

pub(crate) fn classify_start_failure(stderr: &str) -> LaunchError {
    if mentions_any(stderr, RUNTIME_UNREACHABLE) {
        LaunchError::RuntimeNotAvailable(stderr.to_string())
    } else if mentions_any(stderr, CONFIGURATION_REJECTED) {
        LaunchError::Rejected(stderr.to_string())
    } else {
        LaunchError::StartFailed(stderr.to_string())
    }
}
