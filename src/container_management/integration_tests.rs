#[cfg(test)]
mod integration_tests {
    use crate::container_management::{
        ContainerConfiguration, ContainerManager, ContainerState, Launcher, RuntimeKind,
    };
    use std::time::Duration;
    use tokio::time::timeout;

    fn is_docker_available() -> bool {
        std::process::Command::new("docker")
            .arg("info")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    #[ignore = "requires a running docker daemon and the alpine image"]
    async fn test_container_lifecycle_end_to_end() {
        if !is_docker_available() {
            return;
        }

        let manager = ContainerManager::new(RuntimeKind::Docker, None)
            .expect("Failed to create container manager");

        let mut config = ContainerConfiguration::new("alpine:latest");
        config.command = Some(vec!["sleep".into(), "60".into()]);

        let handle = timeout(Duration::from_secs(60), manager.start(&config))
            .await
            .expect("start timed out")
            .expect("start failed");
        assert!(handle.name.starts_with("playhost-"));

        let state = manager.inspect(&handle).await.expect("inspect failed");
        assert_eq!(state, ContainerState::Running);

        manager.stop(&handle).await.expect("stop failed");
        // Stopping twice must stay silent.
        manager.stop(&handle).await.expect("second stop failed");

        let state = manager.inspect(&handle).await.expect("inspect failed");
        assert_eq!(state, ContainerState::Missing);
    }

    #[test]
    fn missing_binary_is_reported() {
        let result = ContainerManager::new(
            RuntimeKind::Docker,
            Some("/nonexistent/playhost-runtime".to_string()),
        );
        assert!(result.is_err());
    }
}
