use log::debug;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::container_management::container_manager::GAME_LABEL;
use crate::container_management::{ContainerConfiguration, DeviceMapping, VolumeMount};
use crate::error_handling::types::ResolveError;

use super::host::HostEnvironment;
use super::request::{AudioMethod, DisplayServer, InputSelection, LaunchRequest};

/// Directory inside the container where host sockets are exposed.
const CONTAINER_RUNTIME_DIR: &str = "/run/playhost";

/// Turns launch requests into container configurations for one host.
pub struct ResourceResolver {
    host: HostEnvironment,
    image_pattern: Regex,
    env_key_pattern: Regex,
}

impl ResourceResolver {
    pub fn new(host: HostEnvironment) -> Self {
        Self {
            host,
            image_pattern: Regex::new(
                r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?::[0-9]+)?(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?(?:@sha256:[a-f0-9]{64})?$",
            )
            .expect("static regex"),
            env_key_pattern: Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"),
        }
    }

    pub fn host(&self) -> &HostEnvironment {
        &self.host
    }

    /// Resolves `request` for `game_id` into a declarative container configuration.
    ///
    /// Fails if the request is malformed or asks for a host resource that does not exist.
    pub fn resolve(
        &self,
        game_id: &str,
        request: &LaunchRequest,
    ) -> Result<ContainerConfiguration, ResolveError> {
        if !self.image_pattern.is_match(&request.image) {
            return Err(ResolveError::InvalidImage(request.image.clone()));
        }

        let mut config = ContainerConfiguration::new(request.image.clone());
        config.command = request.command.clone();
        config.network = request.network;
        config.ports = request.ports.clone();
        config.labels.insert(GAME_LABEL.to_string(), game_id.to_string());

        self.attach_display(request.display, &mut config)?;
        self.attach_audio(request.audio, &mut config)?;
        if request.gpu {
            self.attach_gpu(&mut config)?;
        }
        self.attach_input(&request.input, &mut config)?;

        if let Some(ref path) = request.game_path {
            config.volumes.push(VolumeMount {
                host_path: path.clone(),
                container_path: PathBuf::from("/game"),
                read_only: true,
            });
        }
        if let Some(ref path) = request.save_path {
            config.volumes.push(VolumeMount {
                host_path: path.clone(),
                container_path: PathBuf::from("/saves"),
                read_only: false,
            });
        }
        config.volumes.extend(request.mounts.iter().cloned());
        validate_mounts(&config.volumes)?;

        config.env.insert(
            "PLAYHOST_STREAMING".to_string(),
            request.streaming.as_str().to_string(),
        );
        for (key, value) in &request.env {
            if !self.env_key_pattern.is_match(key) {
                return Err(ResolveError::InvalidEnvKey(key.clone()));
            }
            if config.env.contains_key(key) {
                return Err(ResolveError::DuplicateEnvKey(key.clone()));
            }
            config.env.insert(key.clone(), value.clone());
        }

        if let Some(cpus) = request.limits.cpus {
            if !cpus.is_finite() || cpus <= 0.0 {
                return Err(ResolveError::InvalidLimit(format!("cpus = {}", cpus)));
            }
        }
        if request.limits.memory_mb == Some(0) {
            return Err(ResolveError::InvalidLimit("memory_mb = 0".to_string()));
        }
        config.limits = request.limits.clone();

        debug!(
            "Resolved launch of {} into {} mounts, {} devices, {} env vars",
            game_id,
            config.volumes.len(),
            config.devices.len(),
            config.env.len()
        );
        Ok(config)
    }

    fn attach_display(
        &self,
        display: DisplayServer,
        config: &mut ContainerConfiguration,
    ) -> Result<(), ResolveError> {
        match display {
            DisplayServer::X11 => {
                let dir = self
                    .host
                    .x11_socket_dir
                    .as_ref()
                    .ok_or_else(|| ResolveError::MissingResource("X11 socket".to_string()))?;
                config.volumes.push(VolumeMount {
                    host_path: dir.clone(),
                    container_path: PathBuf::from("/tmp/.X11-unix"),
                    read_only: false,
                });
                let display = self.host.x11_display.clone().unwrap_or_else(|| ":0".into());
                config.env.insert("DISPLAY".to_string(), display);
            }
            DisplayServer::Wayland => {
                let socket = self
                    .host
                    .wayland_socket
                    .as_ref()
                    .ok_or_else(|| ResolveError::MissingResource("Wayland socket".to_string()))?;
                self.mount_runtime_socket(config, socket, "wayland-0");
                config
                    .env
                    .insert("WAYLAND_DISPLAY".to_string(), "wayland-0".to_string());
            }
            DisplayServer::Headless => {}
        }
        Ok(())
    }

    fn attach_audio(
        &self,
        audio: AudioMethod,
        config: &mut ContainerConfiguration,
    ) -> Result<(), ResolveError> {
        match audio {
            AudioMethod::PulseAudio => {
                let socket = self
                    .host
                    .pulse_socket
                    .as_ref()
                    .ok_or_else(|| ResolveError::MissingResource("PulseAudio socket".to_string()))?;
                let target = self.mount_runtime_socket(config, socket, "pulse/native");
                config.env.insert(
                    "PULSE_SERVER".to_string(),
                    format!("unix:{}", target.display()),
                );
            }
            AudioMethod::PipeWire => {
                let socket = self
                    .host
                    .pipewire_socket
                    .as_ref()
                    .ok_or_else(|| ResolveError::MissingResource("PipeWire socket".to_string()))?;
                let target = self.mount_runtime_socket(config, socket, "pipewire-0");
                config
                    .env
                    .insert("PIPEWIRE_REMOTE".to_string(), target.display().to_string());
            }
            AudioMethod::None => {}
        }
        Ok(())
    }

    fn attach_gpu(&self, config: &mut ContainerConfiguration) -> Result<(), ResolveError> {
        if self.host.gpu_devices.is_empty() {
            return Err(ResolveError::MissingResource("GPU device".to_string()));
        }
        for device in &self.host.gpu_devices {
            config.devices.push(DeviceMapping {
                host_path: device.clone(),
                container_path: device.clone(),
                permissions: Some("rwm".to_string()),
            });
        }
        Ok(())
    }

    fn attach_input(
        &self,
        input: &InputSelection,
        config: &mut ContainerConfiguration,
    ) -> Result<(), ResolveError> {
        let devices: Vec<PathBuf> = match input {
            InputSelection::None => Vec::new(),
            InputSelection::All => self.host.input_devices.clone(),
            InputSelection::Devices(wanted) => {
                for device in wanted {
                    if !self.host.input_devices.contains(device) {
                        return Err(ResolveError::MissingResource(format!(
                            "input device {}",
                            device.display()
                        )));
                    }
                }
                wanted.clone()
            }
        };
        for device in devices {
            config.devices.push(DeviceMapping {
                host_path: device.clone(),
                container_path: device,
                permissions: Some("rw".to_string()),
            });
        }
        Ok(())
    }

    /// Bind-mounts a host socket under the container runtime dir and returns its container path.
    fn mount_runtime_socket(
        &self,
        config: &mut ContainerConfiguration,
        socket: &Path,
        name: &str,
    ) -> PathBuf {
        let target = Path::new(CONTAINER_RUNTIME_DIR).join(name);
        config.volumes.push(VolumeMount {
            host_path: socket.to_path_buf(),
            container_path: target.clone(),
            read_only: false,
        });
        config.env.insert(
            "XDG_RUNTIME_DIR".to_string(),
            CONTAINER_RUNTIME_DIR.to_string(),
        );
        target
    }
}

fn validate_mounts(mounts: &[VolumeMount]) -> Result<(), ResolveError> {
    let mut targets = HashSet::new();
    for mount in mounts {
        if !mount.host_path.is_absolute() || !mount.container_path.is_absolute() {
            return Err(ResolveError::InvalidMount(format!(
                "{} -> {} must use absolute paths",
                mount.host_path.display(),
                mount.container_path.display()
            )));
        }
        if !targets.insert(mount.container_path.clone()) {
            return Err(ResolveError::InvalidMount(format!(
                "{} is mounted twice",
                mount.container_path.display()
            )));
        }
    }
    Ok(())
}
