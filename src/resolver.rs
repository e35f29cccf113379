//! Launch request resolution.
//!
//! A [`LaunchRequest`] names what a game needs (display server, audio path, GPU,
//! input devices, mounts); [`ResourceResolver`] maps it onto the concrete sockets
//! and device nodes of this host and produces an immutable
//! [`ContainerConfiguration`](crate::container_management::ContainerConfiguration).

pub mod host;
pub mod request;
pub mod resource_resolver;

pub use host::HostEnvironment;
pub use request::{
    AudioMethod, DisplayServer, InputSelection, LaunchRequest, SessionMetadata,
    StreamingTransport,
};
pub use resource_resolver::ResourceResolver;
