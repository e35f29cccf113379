use async_trait::async_trait;

use crate::container_management::types::{ContainerConfiguration, ContainerHandle, ContainerState};
use crate::error_handling::types::LaunchError;

/// Adapter between the session manager and a container runtime.
///
/// Implementations hold no business state. `stop` must be idempotent: stopping a
/// container that already exited, or that the runtime never heard of, succeeds.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Starts a container and returns once the runtime has accepted it.
    async fn start(&self, config: &ContainerConfiguration) -> Result<ContainerHandle, LaunchError>;

    /// Stops and removes a container.
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), LaunchError>;

    /// Reports the runtime's view of a container.
    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerState, LaunchError>;
}
