//! Request layer over the remote Greenie backend.
//!
//! The [`Backend`] trait is the seam the overlay controller and the backup
//! path talk to; [`http::HttpBackend`] is the production implementation.

use crate::error::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod http;

pub use http::HttpBackend;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SecurityInfo {
    #[serde(default)]
    pub network_only_mode: bool,
    #[serde(default)]
    pub is_private_network: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub ok: bool,
    pub security: Option<SecurityInfo>,
}

impl HealthReport {
    pub fn down() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KnowledgeExport {
    pub items: usize,
    /// True when no call was made because there was no token.
    pub skipped: bool,
}

/// Body of `POST /api/log-error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub details: Value,
}

impl ErrorReport {
    pub fn from_error(error: &ClientError, details: Value) -> Self {
        Self {
            message: error.to_string(),
            kind: error.kind().to_string(),
            details,
        }
    }
}

/// Body of `POST /log_uncertainty`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UncertaintyReport {
    pub user_message: String,
    pub reply: String,
    /// Milliseconds since the epoch.
    pub ts: i64,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Never fails; an unreachable or unhealthy backend yields `ok == false`.
    async fn health(&self) -> HealthReport;

    async fn login(&self, username: &str, password: &str) -> Result<Credentials, ClientError>;

    async fn register(&self, username: &str, email: &str, password: &str)
        -> Result<(), ClientError>;

    async fn chat(
        &self,
        message: &str,
        session_id: &str,
        token: Option<&str>,
    ) -> Result<ChatReply, ClientError>;

    /// Guests are never backed up: `None` returns a skipped, successful export.
    async fn export_knowledge(&self, token: Option<&str>) -> Result<KnowledgeExport, ClientError>;

    async fn welcome(&self) -> Option<String>;

    // Best-effort calls below. Failures are swallowed and never retried.

    async fn log_error(&self, report: ErrorReport);

    async fn clear_session(&self, session_id: &str);

    async fn log_uncertainty(&self, report: UncertaintyReport);
}

/// Health gate run before every main request.
pub async fn ensure_reachable(backend: &dyn Backend) -> Result<HealthReport, ClientError> {
    let report = backend.health().await;
    if report.ok {
        if let Some(security) = &report.security {
            tracing::trace!(
                network_only = security.network_only_mode,
                private_network = security.is_private_network,
                "backend healthy"
            );
        }
        Ok(report)
    } else {
        tracing::debug!("health probe failed, short-circuiting request");
        Err(ClientError::NetworkUnreachable)
    }
}

const UNCERTAIN_PHRASES: [&str; 4] = ["not sure", "don't know", "unclear", "uncertain"];

/// Vague replies get reported so the backend can grow its knowledge base.
pub fn looks_uncertain(reply: &str) -> bool {
    let lowered = reply.to_lowercase();
    UNCERTAIN_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}
