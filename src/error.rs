use thiserror::Error;

/// Shown whenever the backend cannot be reached. Fixed and actionable.
pub const UNREACHABLE_MESSAGE: &str = "Cannot reach the server. Please start the Greenie backend:\n\n\
In a new terminal, run the backend app and try again.";

/// Failures of calls against the remote backend or the updater.
///
/// Every variant is converted into a visible turn, an inline form message or a
/// transient update status at the call site. None of them is fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Health probe failed or the connection could not be established.
    #[error("{}", UNREACHABLE_MESSAGE)]
    NetworkUnreachable,

    /// 4xx from login/register, carrying the server's `detail`.
    #[error("{0}")]
    AuthFailed(String),

    /// Non-2xx, timeout or `{error}` payload from `/chat`.
    #[error("{0}")]
    ChatFailed(String),

    #[error("knowledge export failed: {0}")]
    ExportFailed(String),

    /// Updater transport or platform failure.
    #[error("update failed: {0}")]
    UpdateError(String),
}

impl ClientError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthFailed(message.into())
    }

    pub fn chat(message: impl Into<String>) -> Self {
        Self::ChatFailed(message.into())
    }

    pub fn export(message: impl Into<String>) -> Self {
        Self::ExportFailed(message.into())
    }

    pub fn update(message: impl Into<String>) -> Self {
        Self::UpdateError(message.into())
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::NetworkUnreachable)
    }

    /// Short tag sent as `type` to the error log endpoint.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkUnreachable => "network_unreachable",
            Self::AuthFailed(_) => "auth_failed",
            Self::ChatFailed(_) => "chat_failed",
            Self::ExportFailed(_) => "export_failed",
            Self::UpdateError(_) => "update_error",
        }
    }
}

/// Local session file failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("session store IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid config value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
