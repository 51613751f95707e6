use super::*;
use crate::backend::{Credentials, HealthReport, KnowledgeExport};
use crate::overlay::backup::{backup_before_quit, run_backup};
use crate::session::TurnRole;
use crate::update::UpdateState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

const PASSWORD: &str = "pw";

#[derive(Default)]
struct FakeBackend {
    down: AtomicBool,
    scripted: HashMap<String, Result<String, ClientError>>,
    welcome: Option<String>,
    login_calls: AtomicUsize,
    register_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    chat_tokens: Mutex<Vec<Option<String>>>,
    export_calls: AtomicUsize,
    export_delay: Duration,
    active_exports: AtomicUsize,
    max_concurrent_exports: AtomicUsize,
    error_logs: AtomicUsize,
    uncertainty_logs: AtomicUsize,
    cleared_sessions: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn scripted(mut self, message: &str, reply: Result<&str, ClientError>) -> Self {
        self.scripted
            .insert(message.to_string(), reply.map(str::to_string));
        self
    }

    fn slow_exports(mut self, delay: Duration) -> Self {
        self.export_delay = delay;
        self
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn health(&self) -> HealthReport {
        HealthReport {
            ok: !self.down.load(Ordering::SeqCst),
            security: None,
        }
    }

    async fn login(&self, username: &str, password: &str) -> Result<Credentials, ClientError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if password == PASSWORD {
            Ok(Credentials {
                token: format!("tok-{username}"),
            })
        } else {
            Err(ClientError::auth("Incorrect username or password"))
        }
    }

    async fn register(
        &self,
        username: &str,
        _email: &str,
        _password: &str,
    ) -> Result<(), ClientError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if username == "taken" {
            Err(ClientError::auth("Username already registered"))
        } else {
            Ok(())
        }
    }

    async fn chat(
        &self,
        message: &str,
        _session_id: &str,
        token: Option<&str>,
    ) -> Result<ChatReply, ClientError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.chat_tokens
            .lock()
            .expect("lock should not be poisoned")
            .push(token.map(str::to_string));
        match self.scripted.get(message) {
            Some(Ok(reply)) => Ok(ChatReply {
                reply: reply.clone(),
            }),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(ChatReply {
                reply: format!("re: {message}"),
            }),
        }
    }

    async fn export_knowledge(&self, token: Option<&str>) -> Result<KnowledgeExport, ClientError> {
        assert!(token.is_some(), "exports are only made with a token");
        self.export_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_exports.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_exports.fetch_max(active, Ordering::SeqCst);
        if !self.export_delay.is_zero() {
            tokio::time::sleep(self.export_delay).await;
        }
        self.active_exports.fetch_sub(1, Ordering::SeqCst);
        Ok(KnowledgeExport {
            items: 2,
            skipped: false,
        })
    }

    async fn welcome(&self) -> Option<String> {
        self.welcome.clone()
    }

    async fn log_error(&self, _report: ErrorReport) {
        self.error_logs.fetch_add(1, Ordering::SeqCst);
    }

    async fn clear_session(&self, session_id: &str) {
        self.cleared_sessions
            .lock()
            .expect("lock should not be poisoned")
            .push(session_id.to_string());
    }

    async fn log_uncertainty(&self, _report: UncertaintyReport) {
        self.uncertainty_logs.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    controller: OverlayController,
    rx: UnboundedReceiver<AppEvent>,
    backend: Arc<FakeBackend>,
    store: SessionStore,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new(backend: FakeBackend) -> Self {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let store = SessionStore::open(dir.path().join("session.json"));
        let backend = Arc::new(backend);
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = OverlayController::new(
            Arc::clone(&backend) as Arc<dyn Backend>,
            store.clone(),
            Handle::current(),
            tx,
        );
        Self {
            controller,
            rx,
            backend,
            store,
            _dir: dir,
        }
    }

    /// Receives and applies `count` events.
    async fn settle(&mut self, count: usize) {
        for _ in 0..count {
            let event = self.rx.recv().await.expect("event channel should stay open");
            self.controller.apply_event(event);
        }
    }

    async fn sign_in(&mut self, username: &str) {
        self.controller.login(username, PASSWORD);
        self.settle(1).await;
        assert_eq!(self.controller.mode(), AuthMode::Authenticated);
    }

    /// Turns after the greeting, as (role, text).
    fn conversation(&self) -> Vec<(TurnRole, String)> {
        self.controller
            .turns()
            .iter()
            .skip(1)
            .map(|turn| (turn.role, turn.text.clone()))
            .collect()
    }
}

async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was not reached");
}

#[tokio::test]
async fn login_then_send_hello_appends_user_and_assistant_turns() {
    let mut harness = Harness::new(FakeBackend::default().scripted("hello", Ok("hi")));
    harness.sign_in("louis").await;
    assert_eq!(
        harness.controller.session().auth_token.as_deref(),
        Some("tok-louis")
    );

    harness.controller.send("hello");
    harness.settle(1).await;

    assert_eq!(
        harness.conversation(),
        vec![
            (TurnRole::User, "hello".to_string()),
            (TurnRole::Assistant, "hi".to_string())
        ]
    );
    let tokens = harness.backend.chat_tokens.lock().expect("lock").clone();
    assert_eq!(tokens, vec![Some("tok-louis".to_string())]);
}

#[tokio::test]
async fn blank_input_is_a_no_op() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.sign_in("louis").await;
    let before = harness.controller.turns().to_vec();

    assert!(harness.controller.send("").is_none());
    assert!(harness.controller.send("   ").is_none());

    assert_eq!(harness.controller.turns(), before.as_slice());
    assert_eq!(harness.controller.backup().messages_since_backup(), 0);
    assert_eq!(harness.backend.chat_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn send_is_ignored_until_chat_panel_is_active() {
    let mut harness = Harness::new(FakeBackend::default());
    assert_eq!(harness.controller.mode(), AuthMode::SignedOut);
    assert!(harness.controller.send("hello").is_none());
    assert!(harness.controller.turns().is_empty());
}

#[tokio::test]
async fn unreachable_backend_short_circuits_with_fixed_message() {
    let backend = FakeBackend::default();
    backend.down.store(true, Ordering::SeqCst);
    let mut harness = Harness::new(backend);
    harness.controller.continue_as_guest();

    harness.controller.send("hello");
    harness.settle(1).await;

    let last = harness.controller.turns().last().expect("transcript has turns");
    assert_eq!(last.role, TurnRole::Error);
    assert!(last.text.contains("Cannot reach the server"));
    let errors = harness
        .controller
        .turns()
        .iter()
        .filter(|turn| turn.role == TurnRole::Error)
        .count();
    assert_eq!(errors, 1);
    assert_eq!(harness.backend.chat_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn overlapping_sends_resolve_in_call_order() {
    let mut harness = Harness::new(
        FakeBackend::default().scripted("two", Err(ClientError::chat("Rate limit reached"))),
    );
    harness.controller.continue_as_guest();

    for text in ["one", "two", "three"] {
        harness.controller.send(text);
    }
    assert_eq!(harness.controller.turns().len(), 7);
    harness.settle(3).await;

    let conversation = harness.conversation();
    let roles: Vec<TurnRole> = conversation.iter().map(|(role, _)| *role).collect();
    assert_eq!(
        roles,
        vec![
            TurnRole::User,
            TurnRole::Assistant,
            TurnRole::User,
            TurnRole::Error,
            TurnRole::User,
            TurnRole::Assistant
        ]
    );
    assert_eq!(conversation[1].1, "re: one");
    assert_eq!(conversation[3].1, "Error: Rate limit reached");
    assert_eq!(conversation[5].1, "re: three");

    let backend = Arc::clone(&harness.backend);
    eventually(|| backend.error_logs.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn guest_mode_never_backs_up_or_sends_a_token() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.controller.continue_as_guest();
    assert_eq!(harness.controller.turns()[0].text, transcript::GREETING);

    for n in 0..6 {
        harness.controller.send(&format!("message {n}"));
    }
    harness.settle(6).await;

    assert_eq!(harness.backend.export_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.controller.backup().messages_since_backup(), 0);
    let tokens = harness.backend.chat_tokens.lock().expect("lock").clone();
    assert!(tokens.iter().all(Option::is_none));
}

#[tokio::test]
async fn fifth_authenticated_message_triggers_one_backup() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.sign_in("louis").await;

    for n in 0..5 {
        harness.controller.send(&format!("message {n}"));
    }
    assert!(harness.controller.backup().in_flight());
    assert_eq!(harness.controller.backup().messages_since_backup(), 0);

    // five chat replies plus the backup result
    harness.settle(6).await;
    assert_eq!(harness.backend.export_calls.load(Ordering::SeqCst), 1);
    assert!(!harness.controller.backup().in_flight());
}

#[tokio::test]
async fn failed_login_shows_inline_error_and_keeps_session() {
    let mut harness = Harness::new(FakeBackend::default());
    let session_before = harness.controller.session().clone();

    harness.controller.login("louis", "wrong");
    assert!(harness.controller.auth_pending());
    harness.settle(1).await;

    assert!(!harness.controller.auth_pending());
    assert_eq!(harness.controller.mode(), AuthMode::SignedOut);
    assert_eq!(
        harness.controller.login_error(),
        Some("Incorrect username or password")
    );
    assert_eq!(harness.controller.session(), &session_before);
    assert!(harness.store.load().auth_token.is_none());
}

#[tokio::test]
async fn empty_login_fields_fail_without_a_request() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.controller.login("  ", "");
    assert!(!harness.controller.auth_pending());
    assert!(harness.controller.login_error().is_some());
}

#[tokio::test]
async fn register_chains_implicit_login() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.controller.show_auth_view(AuthView::Register);

    harness.controller.register("newbie", "newbie@example.com", PASSWORD);
    harness.settle(1).await;

    assert_eq!(harness.controller.mode(), AuthMode::Authenticated);
    assert_eq!(harness.controller.session().username.as_deref(), Some("newbie"));
    assert_eq!(harness.controller.turns().len(), 1);
    assert_eq!(
        harness.store.load().auth_token.as_deref(),
        Some("tok-newbie")
    );
}

#[tokio::test]
async fn register_failure_is_scoped_to_register_form() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.controller.register("taken", "t@example.com", PASSWORD);
    harness.settle(1).await;

    assert_eq!(
        harness.controller.register_error(),
        Some("Username already registered")
    );
    assert!(harness.controller.login_error().is_none());
    assert_eq!(harness.controller.mode(), AuthMode::SignedOut);
}

#[tokio::test]
async fn logout_clears_credentials_but_keeps_session_id() {
    let mut harness = Harness::new(FakeBackend::default());
    let session_id = harness.controller.session().session_id.clone();
    harness.sign_in("louis").await;
    harness.controller.send("hello");
    harness.settle(1).await;

    harness.controller.logout();

    assert_eq!(harness.controller.mode(), AuthMode::SignedOut);
    assert!(harness.controller.turns().is_empty());
    let reloaded = harness.store.load();
    assert_eq!(reloaded.session_id, session_id);
    assert!(reloaded.auth_token.is_none());
    assert!(reloaded.username.is_none());

    let backend = Arc::clone(&harness.backend);
    let expected = session_id.clone();
    eventually(|| {
        backend
            .cleared_sessions
            .lock()
            .expect("lock")
            .contains(&expected)
    })
    .await;
}

#[tokio::test]
async fn cached_credentials_restore_authenticated_mode_on_restart() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.sign_in("louis").await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let restarted = OverlayController::new(
        Arc::clone(&harness.backend) as Arc<dyn Backend>,
        harness.store.clone(),
        Handle::current(),
        tx,
    );

    assert_eq!(restarted.mode(), AuthMode::Authenticated);
    assert_eq!(restarted.session(), harness.controller.session());
    assert_eq!(restarted.turns().len(), 1);
}

#[tokio::test]
async fn late_reply_after_logout_is_dropped() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.sign_in("louis").await;
    harness.controller.send("hello");
    harness.controller.logout();

    harness.settle(1).await;
    assert!(harness.controller.turns().is_empty());
}

#[tokio::test]
async fn server_welcome_replaces_greeting() {
    let backend = FakeBackend {
        welcome: Some("Welcome back, friend!".to_string()),
        ..Default::default()
    };
    let mut harness = Harness::new(backend);
    harness.controller.server_welcome = true;

    harness.controller.continue_as_guest();
    harness.settle(1).await;

    assert_eq!(harness.controller.turns().len(), 1);
    assert_eq!(harness.controller.turns()[0].text, "Welcome back, friend!");
}

#[tokio::test]
async fn restored_session_fetches_server_welcome() {
    let backend = FakeBackend {
        welcome: Some("Good to see you again".to_string()),
        ..Default::default()
    };
    let mut harness = Harness::new(backend);
    harness.sign_in("louis").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut restarted = OverlayController::new(
        Arc::clone(&harness.backend) as Arc<dyn Backend>,
        harness.store.clone(),
        Handle::current(),
        tx,
    )
    .with_server_welcome(true);
    let event = rx.recv().await.expect("welcome should arrive");
    restarted.apply_event(event);

    assert_eq!(restarted.turns().len(), 1);
    assert_eq!(restarted.turns()[0].text, "Good to see you again");
}

#[tokio::test]
async fn uncertain_reply_is_reported() {
    let mut harness = Harness::new(
        FakeBackend::default().scripted("what is dark matter", Ok("I'm not sure, honestly.")),
    );
    harness.controller.continue_as_guest();
    harness.controller.send("what is dark matter");
    harness.settle(1).await;

    let backend = Arc::clone(&harness.backend);
    eventually(|| backend.uncertainty_logs.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn update_notices_are_shown_until_idle() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.controller.apply_event(AppEvent::Update(UpdateNotice {
        state: UpdateState::Error,
        version: None,
        message: Some("update failed: feed unreachable".to_string()),
    }));
    let notice = harness
        .controller
        .update_notice()
        .expect("error notice is shown");
    assert_eq!(notice.state, UpdateState::Error);

    harness.controller.apply_event(AppEvent::Update(UpdateNotice {
        state: UpdateState::Idle,
        version: None,
        message: None,
    }));
    assert!(harness.controller.update_notice().is_none());
}

#[tokio::test]
async fn visibility_toggles_between_trigger_and_panel() {
    let mut harness = Harness::new(FakeBackend::default());
    assert_eq!(harness.controller.visibility(), Visibility::Trigger);
    harness.controller.open_panel();
    assert_eq!(harness.controller.visibility(), Visibility::Panel);
    harness.controller.minimize_panel();
    assert_eq!(harness.controller.visibility(), Visibility::Trigger);
}

#[tokio::test(start_paused = true)]
async fn running_backup_survives_logout_and_next_sign_in() {
    let mut harness =
        Harness::new(FakeBackend::default().slow_exports(Duration::from_millis(500)));
    harness.sign_in("louis").await;
    for n in 0..5 {
        harness.controller.send(&format!("first {n}"));
    }
    harness.settle(5).await;
    assert!(harness.controller.backup().in_flight());

    harness.controller.logout();
    assert!(harness.controller.backup().in_flight());
    harness.sign_in("louis").await;
    for n in 0..5 {
        harness.controller.send(&format!("second {n}"));
    }
    assert_eq!(harness.backend.export_calls.load(Ordering::SeqCst), 1);

    // five chat replies plus the first backup result
    harness.settle(6).await;
    assert!(!harness.controller.backup().in_flight());

    harness.controller.send("one more");
    assert!(harness.controller.backup().in_flight());
    harness.settle(2).await;

    assert_eq!(harness.backend.export_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        harness.backend.max_concurrent_exports.load(Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn reset_conversation_reseeds_greeting_and_clears_server_session() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.sign_in("louis").await;
    harness.controller.send("hello");
    harness.settle(1).await;
    assert_eq!(harness.controller.turns().len(), 3);

    harness.controller.reset_conversation();

    assert_eq!(harness.controller.mode(), AuthMode::Authenticated);
    let turns = harness.controller.turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, TurnRole::Assistant);
    assert_eq!(turns[0].text, transcript::GREETING);

    let backend = Arc::clone(&harness.backend);
    let session_id = harness.controller.session().session_id.clone();
    eventually(|| {
        backend
            .cleared_sessions
            .lock()
            .expect("lock")
            .contains(&session_id)
    })
    .await;
}

#[tokio::test]
async fn shutdown_backup_exports_once_with_stored_token() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.sign_in("louis").await;

    backup_before_quit(
        harness.backend.as_ref(),
        &harness.store,
        &harness.controller.backup().flight(),
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(harness.backend.export_calls.load(Ordering::SeqCst), 1);
    assert!(!harness.controller.backup().in_flight());
}

#[tokio::test]
async fn shutdown_backup_is_skipped_without_a_token() {
    let harness = Harness::new(FakeBackend::default());
    let mut guest = Harness::new(FakeBackend::default());
    guest.controller.continue_as_guest();
    guest.controller.send("hello");
    guest.settle(1).await;

    for harness in [&harness, &guest] {
        backup_before_quit(
            harness.backend.as_ref(),
            &harness.store,
            &harness.controller.backup().flight(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(harness.backend.export_calls.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_backup_gives_up_after_limit() {
    let mut harness =
        Harness::new(FakeBackend::default().slow_exports(Duration::from_secs(3600)));
    harness.sign_in("louis").await;

    let started = tokio::time::Instant::now();
    backup_before_quit(
        harness.backend.as_ref(),
        &harness.store,
        &harness.controller.backup().flight(),
        Duration::from_secs(5),
    )
    .await;

    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(5));
    assert!(waited < Duration::from_secs(60));
    assert_eq!(harness.backend.export_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_backup_waits_for_running_export_instead_of_starting_another() {
    let mut harness =
        Harness::new(FakeBackend::default().slow_exports(Duration::from_millis(500)));
    harness.sign_in("louis").await;
    for n in 0..5 {
        harness.controller.send(&format!("message {n}"));
    }
    harness.settle(5).await;
    assert!(harness.controller.backup().in_flight());

    backup_before_quit(
        harness.backend.as_ref(),
        &harness.store,
        &harness.controller.backup().flight(),
        Duration::from_secs(5),
    )
    .await;

    assert!(!harness.controller.backup().in_flight());
    assert_eq!(harness.backend.export_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.backend.max_concurrent_exports.load(Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn login_and_register_against_down_backend_show_unreachable_inline() {
    let backend = FakeBackend::default();
    backend.down.store(true, Ordering::SeqCst);
    let mut harness = Harness::new(backend);

    harness.controller.login("louis", PASSWORD);
    harness.settle(1).await;
    let login_error = harness.controller.login_error().expect("login error is shown");
    assert!(login_error.contains("Cannot reach the server"));

    harness.controller.show_auth_view(AuthView::Register);
    harness
        .controller
        .register("newbie", "newbie@example.com", PASSWORD);
    harness.settle(1).await;
    let register_error = harness
        .controller
        .register_error()
        .expect("register error is shown");
    assert!(register_error.contains("Cannot reach the server"));

    assert_eq!(harness.controller.mode(), AuthMode::SignedOut);
    assert_eq!(harness.backend.login_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.backend.register_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn backup_against_down_backend_never_exports() {
    let backend = FakeBackend::default();
    backend.down.store(true, Ordering::SeqCst);

    let error = run_backup(&backend, Some("tok-louis"))
        .await
        .expect_err("down backend should fail the backup");

    assert_eq!(error, ClientError::NetworkUnreachable);
    assert_eq!(backend.export_calls.load(Ordering::SeqCst), 0);
}
