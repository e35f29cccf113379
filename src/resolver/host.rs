use log::debug;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Host resources a game container can be attached to.
///
/// Built once at startup with [`HostEnvironment::detect`]; tests construct it directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    pub x11_socket_dir: Option<PathBuf>,
    pub x11_display: Option<String>,
    pub wayland_socket: Option<PathBuf>,
    pub pulse_socket: Option<PathBuf>,
    pub pipewire_socket: Option<PathBuf>,
    pub gpu_devices: Vec<PathBuf>,
    pub input_devices: Vec<PathBuf>,
}

impl HostEnvironment {
    /// Probes the usual socket locations and device nodes of a Linux desktop.
    pub fn detect() -> Self {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR").ok().map(PathBuf::from);

        let x11_socket_dir = Some(PathBuf::from("/tmp/.X11-unix")).filter(|p| p.is_dir());
        let x11_display = std::env::var("DISPLAY").ok().filter(|d| !d.is_empty());

        let wayland_socket = runtime_dir.as_ref().and_then(|dir| {
            let name = std::env::var("WAYLAND_DISPLAY").unwrap_or_else(|_| "wayland-0".into());
            Some(dir.join(name)).filter(|p| p.exists())
        });
        let pulse_socket = runtime_dir
            .as_ref()
            .map(|dir| dir.join("pulse/native"))
            .filter(|p| p.exists());
        let pipewire_socket = runtime_dir
            .as_ref()
            .map(|dir| dir.join("pipewire-0"))
            .filter(|p| p.exists());

        let mut gpu_devices = Vec::new();
        if Path::new("/dev/dri").is_dir() {
            gpu_devices.push(PathBuf::from("/dev/dri"));
        }
        gpu_devices.extend(scan_devices(Path::new("/dev"), &nvidia_pattern()));

        let input_devices = scan_devices(Path::new("/dev/input"), &input_pattern());

        let host = Self {
            x11_socket_dir,
            x11_display,
            wayland_socket,
            pulse_socket,
            pipewire_socket,
            gpu_devices,
            input_devices,
        };
        debug!("Detected host environment: {:?}", host);
        host
    }
}

pub(crate) fn input_pattern() -> Regex {
    Regex::new(r"^event[0-9]+$").expect("static regex")
}

pub(crate) fn nvidia_pattern() -> Regex {
    Regex::new(r"^nvidia([0-9]+|ctl|-uvm|-uvm-tools|-modeset)$").expect("static regex")
}

/// Lists the entries of `dir` whose file name matches `pattern`, sorted.
pub(crate) fn scan_devices(dir: &Path, pattern: &Regex) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| pattern.is_match(n))
                    .unwrap_or(false)
            })
            .collect(),
        Err(e) => {
            debug!("Cannot scan {}: {}", dir.display(), e);
            Vec::new()
        }
    };
    found.sort();
    found
}
