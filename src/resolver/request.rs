use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::container_management::{NetworkMode, PortMapping, ResourceLimits, VolumeMount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayServer {
    #[default]
    X11,
    Wayland,
    Headless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMethod {
    #[default]
    PulseAudio,
    PipeWire,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingTransport {
    Moonlight,
    WebRtc,
    #[default]
    None,
}

impl StreamingTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamingTransport::Moonlight => "moonlight",
            StreamingTransport::WebRtc => "webrtc",
            StreamingTransport::None => "none",
        }
    }
}

/// Which host input devices are passed through.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSelection {
    None,
    #[default]
    All,
    Devices(Vec<PathBuf>),
}

/// Everything a client asks for when launching a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub image: String,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Installed game directory, mounted read-only at `/game`.
    #[serde(default)]
    pub game_path: Option<PathBuf>,
    /// Save directory, mounted read-write at `/saves`.
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    #[serde(default)]
    pub display: DisplayServer,
    #[serde(default)]
    pub audio: AudioMethod,
    #[serde(default)]
    pub streaming: StreamingTransport,
    #[serde(default = "default_network")]
    pub network: NetworkMode,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub input: InputSelection,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub client_origin: Option<String>,
}

fn default_network() -> NetworkMode {
    NetworkMode::Bridge
}

impl LaunchRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: None,
            game_path: None,
            save_path: None,
            display: DisplayServer::default(),
            audio: AudioMethod::default(),
            streaming: StreamingTransport::default(),
            network: default_network(),
            gpu: false,
            input: InputSelection::default(),
            limits: ResourceLimits::default(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            ports: Vec::new(),
            client_origin: None,
        }
    }

    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            client_origin: self.client_origin.clone(),
            streaming: self.streaming,
            display: self.display,
            audio: self.audio,
        }
    }
}

/// Descriptive attributes of a session, fixed at launch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub client_origin: Option<String>,
    #[serde(default)]
    pub streaming: StreamingTransport,
    #[serde(default)]
    pub display: DisplayServer,
    #[serde(default)]
    pub audio: AudioMethod,
}
