//! Overlay controller: visibility, auth mode, transcript and the
//! request/response flow of chat turns.
//!
//! The controller lives on the UI thread and never awaits. Every backend call
//! is spawned on the runtime and reports back as an [`AppEvent`], which the
//! shell feeds to [`OverlayController::apply_event`].

use crate::backend::{
    ensure_reachable, looks_uncertain, Backend, ChatReply, ErrorReport, UncertaintyReport,
};
use crate::error::ClientError;
use crate::event::AppEvent;
use crate::session::store::SessionStore;
use crate::session::{ChatTurn, Session, TurnRole};
use crate::update::UpdateNotice;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;

pub mod backup;
pub mod transcript;

use backup::{run_backup, BackupScheduler};
use transcript::{Transcript, THINKING};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Only the floating trigger button is shown.
    Trigger,
    Panel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    SignedOut,
    Guest,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthView {
    Login,
    Register,
}

pub struct OverlayController {
    backend: Arc<dyn Backend>,
    store: SessionStore,
    runtime: Handle,
    events: UnboundedSender<AppEvent>,
    session: Session,
    mode: AuthMode,
    visibility: Visibility,
    auth_view: AuthView,
    login_error: Option<String>,
    register_error: Option<String>,
    auth_pending: bool,
    transcript: Transcript,
    backup: BackupScheduler,
    update: Option<UpdateNotice>,
    server_welcome: bool,
}

impl OverlayController {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: SessionStore,
        runtime: Handle,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        let session = store.load();
        let mut controller = Self {
            backend,
            store,
            runtime,
            events,
            mode: AuthMode::SignedOut,
            session,
            visibility: Visibility::Trigger,
            auth_view: AuthView::Login,
            login_error: None,
            register_error: None,
            auth_pending: false,
            transcript: Transcript::default(),
            backup: BackupScheduler::new(Instant::now()),
            update: None,
            server_welcome: false,
        };

        if controller.session.is_authenticated() {
            tracing::info!(
                username = controller.session.username.as_deref().unwrap_or_default(),
                "restored cached credentials"
            );
            controller.enter_chat(AuthMode::Authenticated);
        }
        controller
    }

    /// Replace the fixed greeting with the backend's `/welcome` message.
    pub fn with_server_welcome(mut self, enabled: bool) -> Self {
        self.server_welcome = enabled;
        if enabled && self.chat_active() {
            self.fetch_welcome();
        }
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn auth_view(&self) -> AuthView {
        self.auth_view
    }

    pub fn login_error(&self) -> Option<&str> {
        self.login_error.as_deref()
    }

    pub fn register_error(&self) -> Option<&str> {
        self.register_error.as_deref()
    }

    pub fn auth_pending(&self) -> bool {
        self.auth_pending
    }

    pub fn turns(&self) -> &[ChatTurn] {
        self.transcript.turns()
    }

    pub fn has_pending_work(&self) -> bool {
        self.auth_pending || self.transcript.pending() > 0 || self.backup.in_flight()
    }

    pub fn backup(&self) -> &BackupScheduler {
        &self.backup
    }

    pub fn update_notice(&self) -> Option<&UpdateNotice> {
        self.update.as_ref()
    }

    pub fn chat_active(&self) -> bool {
        self.mode != AuthMode::SignedOut
    }

    pub fn open_panel(&mut self) {
        self.visibility = Visibility::Panel;
    }

    pub fn minimize_panel(&mut self) {
        self.visibility = Visibility::Trigger;
    }

    pub fn show_auth_view(&mut self, view: AuthView) {
        self.auth_view = view;
    }

    pub fn continue_as_guest(&mut self) {
        if self.mode != AuthMode::SignedOut {
            return;
        }
        tracing::info!("entering guest mode");
        self.enter_chat(AuthMode::Guest);
    }

    pub fn login(&mut self, username: &str, password: &str) {
        let username = username.trim().to_string();
        if username.is_empty() || password.is_empty() {
            self.login_error = Some("Please enter your username and password.".to_string());
            return;
        }
        if self.auth_pending {
            return;
        }
        self.auth_pending = true;

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let password = password.to_string();
        self.runtime.spawn(async move {
            let outcome = match ensure_reachable(backend.as_ref()).await {
                Ok(_) => backend
                    .login(&username, &password)
                    .await
                    .map(|credentials| credentials.token),
                Err(err) => Err(err),
            };
            let _ = events.send(AppEvent::LoginFinished { username, outcome });
        });
    }

    /// Registers, then chains the implicit login.
    pub fn register(&mut self, username: &str, email: &str, password: &str) {
        let username = username.trim().to_string();
        let email = email.trim().to_string();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            self.register_error = Some("Please fill in every field.".to_string());
            return;
        }
        if self.auth_pending {
            return;
        }
        self.auth_pending = true;

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let password = password.to_string();
        self.runtime.spawn(async move {
            let outcome = async {
                ensure_reachable(backend.as_ref()).await?;
                backend.register(&username, &email, &password).await?;
                let credentials = backend.login(&username, &password).await?;
                Ok::<_, ClientError>(credentials.token)
            }
            .await;
            let _ = events.send(AppEvent::RegisterFinished { username, outcome });
        });
    }

    /// Signs out locally. The session id is kept; server-side conversation
    /// memory for it is cleared best-effort.
    pub fn logout(&mut self) {
        if let Err(err) = self.store.clear() {
            tracing::warn!("failed to clear cached credentials: {err}");
        }
        self.session.sign_out();
        self.mode = AuthMode::SignedOut;
        self.auth_view = AuthView::Login;
        self.login_error = None;
        self.register_error = None;
        self.transcript.clear();
        self.backup.reset(Instant::now());
        self.clear_server_session();
        tracing::info!("signed out");
    }

    /// Starts the conversation over without signing out.
    pub fn reset_conversation(&mut self) {
        if !self.chat_active() {
            return;
        }
        self.transcript.seed_greeting();
        self.clear_server_session();
    }

    /// Sends one chat message. Returns the placeholder turn id, or `None` when
    /// the input was blank or the chat panel is not active.
    pub fn send(&mut self, text: &str) -> Option<u64> {
        let text = text.trim();
        if text.is_empty() || !self.chat_active() {
            return None;
        }

        self.transcript.push(TurnRole::User, text);
        let turn_id = self.transcript.push(TurnRole::Thinking, THINKING);

        let token = match self.mode {
            AuthMode::Authenticated => self.session.auth_token.clone(),
            _ => None,
        };
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let session_id = self.session.session_id.clone();
        let message = text.to_string();
        self.runtime.spawn(async move {
            let outcome = match ensure_reachable(backend.as_ref()).await {
                Ok(_) => backend.chat(&message, &session_id, token.as_deref()).await,
                Err(err) => Err(err),
            };
            report_outcome(&backend, &message, turn_id, &outcome);
            let _ = events.send(AppEvent::ChatResolved { turn_id, outcome });
        });

        if self.mode == AuthMode::Authenticated && self.backup.on_message_sent(Instant::now()) {
            self.spawn_backup();
        }
        Some(turn_id)
    }

    pub fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::ChatResolved { turn_id, outcome } => {
                let (role, text) = match outcome {
                    Ok(ChatReply { reply }) => (TurnRole::Assistant, reply),
                    Err(err) => (TurnRole::Error, error_turn_text(&err)),
                };
                if !self.transcript.resolve(turn_id, role, text) {
                    tracing::debug!(turn_id, "dropping reply for a cleared turn");
                }
            }
            AppEvent::LoginFinished { username, outcome } => {
                self.auth_pending = false;
                match outcome {
                    Ok(token) => self.complete_sign_in(token, username),
                    Err(err) => {
                        tracing::info!("login failed: {err}");
                        self.login_error = Some(err.to_string());
                    }
                }
            }
            AppEvent::RegisterFinished { username, outcome } => {
                self.auth_pending = false;
                match outcome {
                    Ok(token) => self.complete_sign_in(token, username),
                    Err(err) => {
                        tracing::info!("registration failed: {err}");
                        self.register_error = Some(err.to_string());
                    }
                }
            }
            AppEvent::WelcomeLoaded(message) => {
                self.transcript.replace_greeting(message);
            }
            AppEvent::BackupFinished(outcome) => {
                match outcome {
                    Ok(export) => tracing::info!(items = export.items, "knowledge backup finished"),
                    Err(err) => tracing::warn!("knowledge backup failed: {err}"),
                }
            }
            AppEvent::Update(notice) => {
                tracing::debug!(state = notice.state.as_str(), "update status changed");
                self.update = notice.status_text().is_some().then_some(notice);
            }
        }
    }

    fn complete_sign_in(&mut self, token: String, username: String) {
        self.session.sign_in(token, username);
        if let Err(err) = self.store.save(&self.session) {
            tracing::warn!("failed to persist credentials: {err}");
        }
        self.login_error = None;
        self.register_error = None;
        self.backup.reset(Instant::now());
        tracing::info!(
            username = self.session.username.as_deref().unwrap_or_default(),
            "signed in"
        );
        self.enter_chat(AuthMode::Authenticated);
    }

    fn enter_chat(&mut self, mode: AuthMode) {
        self.mode = mode;
        self.transcript.seed_greeting();
        if self.server_welcome {
            self.fetch_welcome();
        }
    }

    fn fetch_welcome(&self) {
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        self.runtime.spawn(async move {
            if let Some(message) = backend.welcome().await {
                let _ = events.send(AppEvent::WelcomeLoaded(message));
            }
        });
    }

    fn spawn_backup(&self) {
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let token = self.session.auth_token.clone();
        let flight = self.backup.flight();
        tracing::debug!("starting knowledge backup");
        self.runtime.spawn(async move {
            let outcome = run_backup(backend.as_ref(), token.as_deref()).await;
            flight.end();
            let _ = events.send(AppEvent::BackupFinished(outcome));
        });
    }

    fn clear_server_session(&self) {
        let backend = Arc::clone(&self.backend);
        let session_id = self.session.session_id.clone();
        self.runtime.spawn(async move {
            backend.clear_session(&session_id).await;
        });
    }
}

fn error_turn_text(err: &ClientError) -> String {
    if err.is_unreachable() {
        err.to_string()
    } else {
        format!("Error: {err}")
    }
}

/// Detached telemetry for a resolved chat call.
fn report_outcome(
    backend: &Arc<dyn Backend>,
    message: &str,
    turn_id: u64,
    outcome: &Result<ChatReply, ClientError>,
) {
    match outcome {
        Ok(reply) if looks_uncertain(&reply.reply) => {
            let backend = Arc::clone(backend);
            let report = UncertaintyReport {
                user_message: message.to_string(),
                reply: reply.reply.clone(),
                ts: chrono::Utc::now().timestamp_millis(),
            };
            tokio::spawn(async move { backend.log_uncertainty(report).await });
        }
        Ok(_) => {}
        Err(err) => {
            let backend = Arc::clone(backend);
            let report = ErrorReport::from_error(
                err,
                json!({ "turn_id": turn_id, "message_length": message.len() }),
            );
            tokio::spawn(async move { backend.log_error(report).await });
        }
    }
}

#[cfg(test)]
mod tests;
