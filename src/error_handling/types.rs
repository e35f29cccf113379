use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Rejections produced while turning a launch request into a container configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    InvalidImage(String),
    InvalidEnvKey(String),
    DuplicateEnvKey(String),
    InvalidMount(String),
    MissingResource(String),
    InvalidLimit(String),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::InvalidImage(e) => write!(f, "Invalid image reference: {}", e),
            ResolveError::InvalidEnvKey(e) => write!(f, "Invalid environment key: {}", e),
            ResolveError::DuplicateEnvKey(e) => write!(f, "Duplicate environment key: {}", e),
            ResolveError::InvalidMount(e) => write!(f, "Invalid mount: {}", e),
            ResolveError::MissingResource(e) => write!(f, "Host resource unavailable: {}", e),
            ResolveError::InvalidLimit(e) => write!(f, "Invalid resource limit: {}", e),
        }
    }
}

impl std::error::Error for ResolveError {}

#[derive(Debug)]
pub enum LaunchError {
    RuntimeNotAvailable(String),
    Rejected(String),
    StartFailed(String),
    StopFailed(String),
    InspectFailed(String),
    IoError(std::io::Error),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::RuntimeNotAvailable(e) => {
                write!(f, "Container runtime not available: {}", e)
            }
            LaunchError::Rejected(e) => write!(f, "Container configuration rejected: {}", e),
            LaunchError::StartFailed(e) => write!(f, "Container start failed: {}", e),
            LaunchError::StopFailed(e) => write!(f, "Container stop failed: {}", e),
            LaunchError::InspectFailed(e) => write!(f, "Container inspect failed: {}", e),
            LaunchError::IoError(e) => write!(f, "Container IO error: {}", e),
        }
    }
}

impl std::error::Error for LaunchError {}

impl From<std::io::Error> for LaunchError {
    fn from(err: std::io::Error) -> Self {
        LaunchError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    WriteFailed(String),
    ReadFailed(String),
    Serialization(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::Serialization(e) => write!(f, "Storage serialization failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[derive(Debug)]
pub enum SessionError {
    Conflict(String),
    InvalidState { operation: String, status: String },
    NotFound(String),
    Configuration(ResolveError),
    Launch(LaunchError),
    Timeout(String),
    Storage(StorageError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Conflict(game) => {
                write!(f, "A session is already active for game {}", game)
            }
            SessionError::InvalidState { operation, status } => {
                write!(f, "Cannot {} a session in state {}", operation, status)
            }
            SessionError::NotFound(id) => write!(f, "Session not found: {}", id),
            SessionError::Configuration(e) => write!(f, "Launch configuration error: {}", e),
            SessionError::Launch(e) => write!(f, "Launch error: {}", e),
            SessionError::Timeout(e) => write!(f, "Session timed out: {}", e),
            SessionError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ResolveError> for SessionError {
    fn from(err: ResolveError) -> Self {
        SessionError::Configuration(err)
    }
}

impl From<LaunchError> for SessionError {
    fn from(err: LaunchError) -> Self {
        SessionError::Launch(err)
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::Storage(err)
    }
}

/// Failure of a single transfer attempt.
#[derive(Debug)]
pub enum TransferError {
    /// Transient network failure, eligible for retry.
    Network(String),
    /// The remote resource is gone; never retried.
    NotFound(String),
    /// Local filesystem failure while writing the payload.
    Storage(std::io::Error),
    /// No bytes arrived within the progress timeout.
    Timeout(String),
    SizeMismatch { expected: u64, actual: u64 },
    Cancelled,
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Network(_)
                | TransferError::Timeout(_)
                | TransferError::SizeMismatch { .. }
        )
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Network(e) => write!(f, "Network error: {}", e),
            TransferError::NotFound(e) => write!(f, "Source not found: {}", e),
            TransferError::Storage(e) => write!(f, "Write error: {}", e),
            TransferError::Timeout(e) => write!(f, "Transfer stalled: {}", e),
            TransferError::SizeMismatch { expected, actual } => write!(
                f,
                "Size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            TransferError::Cancelled => write!(f, "Transfer cancelled"),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Storage(err)
    }
}

#[derive(Debug)]
pub enum DownloadError {
    Conflict(String),
    NotFound(String),
    InvalidState { operation: String, status: String },
    InvalidArgument(String),
    /// Transfers are spawned on the ambient tokio runtime; there was none.
    RuntimeUnavailable(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::Conflict(game) => {
                write!(f, "A download is already active for game {}", game)
            }
            DownloadError::NotFound(game) => write!(f, "No download for game {}", game),
            DownloadError::InvalidState { operation, status } => {
                write!(f, "Cannot {} a download in state {}", operation, status)
            }
            DownloadError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            DownloadError::RuntimeUnavailable(operation) => {
                write!(f, "Cannot {} a download outside a tokio runtime", operation)
            }
        }
    }
}

impl std::error::Error for DownloadError {}

#[derive(Debug)]
pub enum ScraperError {
    UnknownScraper(String),
    RequestFailed(String),
    NotFound(String),
}

impl fmt::Display for ScraperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScraperError::UnknownScraper(e) => write!(f, "No scraper registered for {}", e),
            ScraperError::RequestFailed(e) => write!(f, "Scraper request failed: {}", e),
            ScraperError::NotFound(e) => write!(f, "Game not found: {}", e),
        }
    }
}

impl std::error::Error for ScraperError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    LaunchError(LaunchError),
    SessionError(SessionError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::LaunchError(e) => write!(f, "Container runtime error: {}", e),
            ControllerError::SessionError(e) => write!(f, "Session error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<LaunchError> for ControllerError {
    fn from(err: LaunchError) -> Self {
        ControllerError::LaunchError(err)
    }
}

impl From<SessionError> for ControllerError {
    fn from(err: SessionError) -> Self {
        ControllerError::SessionError(err)
    }
}
