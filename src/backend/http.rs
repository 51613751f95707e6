use crate::backend::{
    Backend, ChatReply, Credentials, ErrorReport, HealthReport, KnowledgeExport, SecurityInfo,
    UncertaintyReport,
};
use crate::error::ClientError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const CHAT_TIMEOUT: Duration = Duration::from_secs(30);
const EXPORT_TIMEOUT: Duration = Duration::from_secs(30);
const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    ok: bool,
    security: Option<SecurityInfo>,
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatBody {
    reply: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WelcomeBody {
    message: Option<String>,
}

/// [`Backend`] over HTTP with per-call timeouts and a short-lived cache of
/// the last successful health probe.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    health_ttl: Duration,
    last_healthy: Mutex<Option<(Instant, HealthReport)>>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_ttl: HEALTH_CACHE_TTL,
            last_healthy: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn cached_health(&self) -> Option<HealthReport> {
        let guard = self.last_healthy.lock().ok()?;
        guard
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.health_ttl)
            .map(|(_, report)| report.clone())
    }

    fn remember_health(&self, report: &HealthReport) {
        if let Ok(mut guard) = self.last_healthy.lock() {
            *guard = report.ok.then(|| (Instant::now(), report.clone()));
        }
    }

    async fn probe(&self) -> HealthReport {
        let response = match self
            .client
            .get(self.url("/health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!("health probe failed: {err}");
                return HealthReport::down();
            }
        };

        if response.status() != StatusCode::OK {
            tracing::debug!(status = %response.status(), "health probe returned non-200");
            return HealthReport::down();
        }

        match response.json::<HealthBody>().await {
            Ok(body) => HealthReport {
                ok: body.ok,
                security: body.security,
            },
            Err(err) => {
                tracing::debug!("health body unreadable: {err}");
                HealthReport::down()
            }
        }
    }

    async fn fire_and_forget(&self, request: RequestBuilder, what: &str) {
        match request.timeout(TELEMETRY_TIMEOUT).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::debug!(status = %response.status(), "{what} rejected by backend");
            }
            Ok(_) => {}
            Err(err) => tracing::debug!("{what} failed: {err}"),
        }
    }
}

fn with_bearer(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Connection failures mean the backend is down; anything else is reported
/// in the caller's own category.
fn transport_error(err: reqwest::Error, wrap: fn(String) -> ClientError) -> ClientError {
    if err.is_connect() {
        ClientError::NetworkUnreachable
    } else if err.is_timeout() {
        wrap("The server took too long to respond. Please try again.".to_string())
    } else {
        wrap(format!("Network error: {err}"))
    }
}

/// FastAPI puts the reason in `detail` (a string, or a list of validation
/// issues); other handlers use `error`.
fn error_detail(body: &Value) -> Option<String> {
    match body.get("detail") {
        Some(Value::String(detail)) => return Some(detail.clone()),
        Some(Value::Array(issues)) => {
            let messages: Vec<&str> = issues
                .iter()
                .filter_map(|issue| issue.get("msg").and_then(Value::as_str))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        Some(other) if !other.is_null() => return Some(other.to_string()),
        _ => {}
    }
    body.get("error").and_then(Value::as_str).map(str::to_string)
}

async fn failure_detail(response: Response) -> Option<String> {
    let body = response.json::<Value>().await.ok()?;
    error_detail(&body)
}

fn count_items(body: &Value) -> usize {
    match body {
        Value::Array(items) => items.len(),
        Value::Object(map) => ["items", "knowledge"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array).map(Vec::len))
            .unwrap_or(map.len()),
        _ => 0,
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn health(&self) -> HealthReport {
        if let Some(report) = self.cached_health() {
            return report;
        }
        let report = self.probe().await;
        self.remember_health(&report);
        report
    }

    async fn login(&self, username: &str, password: &str) -> Result<Credentials, ClientError> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .timeout(AUTH_TIMEOUT)
            .send()
            .await
            .map_err(|err| transport_error(err, ClientError::AuthFailed))?;

        if !response.status().is_success() {
            let detail = failure_detail(response).await;
            return Err(ClientError::auth(
                detail.unwrap_or_else(|| "Login failed".to_string()),
            ));
        }

        let body: LoginBody = response
            .json()
            .await
            .map_err(|err| ClientError::auth(format!("Unexpected login response: {err}")))?;
        Ok(Credentials {
            token: body.access_token,
        })
    }

    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("/auth/register"))
            .json(&json!({ "username": username, "email": email, "password": password }))
            .timeout(AUTH_TIMEOUT)
            .send()
            .await
            .map_err(|err| transport_error(err, ClientError::AuthFailed))?;

        if response.status().is_success() {
            return Ok(());
        }
        let detail = failure_detail(response).await;
        Err(ClientError::auth(
            detail.unwrap_or_else(|| "Registration failed".to_string()),
        ))
    }

    async fn chat(
        &self,
        message: &str,
        session_id: &str,
        token: Option<&str>,
    ) -> Result<ChatReply, ClientError> {
        let request = self.client.post(self.url("/chat")).json(&json!({
            "message": message,
            "session_id": session_id,
            "conversation_mode": true,
        }));
        let response = with_bearer(request, token)
            .timeout(CHAT_TIMEOUT)
            .send()
            .await
            .map_err(|err| transport_error(err, ClientError::ChatFailed))?;

        let status = response.status();
        if !status.is_success() {
            let detail = failure_detail(response).await;
            return Err(ClientError::chat(
                detail.unwrap_or_else(|| format!("Chat request failed ({status})")),
            ));
        }

        let body: ChatBody = response
            .json()
            .await
            .map_err(|err| ClientError::chat(format!("Unexpected chat response: {err}")))?;
        match body {
            ChatBody {
                reply: Some(reply), ..
            } => Ok(ChatReply { reply }),
            ChatBody {
                error: Some(error),
                message,
                ..
            } => Err(ClientError::chat(message.unwrap_or(error))),
            _ => Err(ClientError::chat("The server returned an empty reply")),
        }
    }

    async fn export_knowledge(&self, token: Option<&str>) -> Result<KnowledgeExport, ClientError> {
        let Some(token) = token else {
            return Ok(KnowledgeExport {
                items: 0,
                skipped: true,
            });
        };

        let response = self
            .client
            .get(self.url("/knowledge/export"))
            .bearer_auth(token)
            .timeout(EXPORT_TIMEOUT)
            .send()
            .await
            .map_err(|err| transport_error(err, ClientError::ExportFailed))?;

        let status = response.status();
        if !status.is_success() {
            let detail = failure_detail(response).await;
            return Err(ClientError::export(
                detail.unwrap_or_else(|| format!("status {status}")),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| ClientError::export(err.to_string()))?;
        Ok(KnowledgeExport {
            items: count_items(&body),
            skipped: false,
        })
    }

    async fn welcome(&self) -> Option<String> {
        let response = self
            .client
            .get(self.url("/welcome"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: WelcomeBody = response.json().await.ok()?;
        body.message.filter(|message| !message.trim().is_empty())
    }

    async fn log_error(&self, report: ErrorReport) {
        let request = self.client.post(self.url("/api/log-error")).json(&report);
        self.fire_and_forget(request, "error log").await;
    }

    async fn clear_session(&self, session_id: &str) {
        let request = self
            .client
            .post(self.url("/session/clear"))
            .json(&json!({ "session_id": session_id }));
        self.fire_and_forget(request, "session clear").await;
    }

    async fn log_uncertainty(&self, report: UncertaintyReport) {
        let request = self.client.post(self.url("/log_uncertainty")).json(&report);
        self.fire_and_forget(request, "uncertainty log").await;
    }
}
