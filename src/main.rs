mod app;
mod backend;
mod config;
mod error;
mod event;
mod overlay;
mod session;
mod theme;
mod update;

use app::OverlayApp;
use backend::{Backend, HttpBackend};
use config::{default_config_path, OverlayConfig};
use eframe::egui;
use overlay::backup::backup_before_quit;
use overlay::OverlayController;
use semver::Version;
use session::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing_subscriber::EnvFilter;
use update::{FeedUpdater, UpdateCoordinator, UpdateHandle, UpdateSchedule, UP_TO_DATE_NOTICE};

const SHUTDOWN_BACKUP_LIMIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("greenie=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config() -> OverlayConfig {
    let path = default_config_path();
    match OverlayConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("ignoring config: {err}");
            OverlayConfig::default()
        }
    }
}

fn start_updates(
    config: &OverlayConfig,
    runtime: &Handle,
    events: UnboundedSender<event::AppEvent>,
) -> Option<UpdateHandle> {
    let staging_dir = config.update_staging_dir();
    if let Some(pending) = FeedUpdater::pending_install(&staging_dir) {
        tracing::info!(
            version = %pending.version,
            artifact = %pending.artifact.display(),
            "update staged for install"
        );
    }

    let Some(feed_url) = config.update_feed_url.clone() else {
        tracing::info!("no update feed configured");
        return None;
    };
    let current = match Version::parse(env!("CARGO_PKG_VERSION")) {
        Ok(version) => version,
        Err(err) => {
            tracing::warn!("update checks disabled: {err}");
            return None;
        }
    };

    let schedule = UpdateSchedule {
        check_interval: config.update_check_interval,
        error_cooldown: config.update_error_cooldown,
        notice_duration: UP_TO_DATE_NOTICE,
    };
    let updater = Arc::new(FeedUpdater::new(feed_url, staging_dir));
    Some(UpdateCoordinator::new(updater, current, schedule, events).spawn(runtime))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = load_config();
    let (tx, rx) = mpsc::unbounded_channel();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("greenie-runtime")
        .build()?;

    let http = HttpBackend::new(config.api_url.clone());
    tracing::info!(api_url = http.base_url(), "starting greenie");
    let backend: Arc<dyn Backend> = Arc::new(http);
    let store = SessionStore::open(config.session_file());

    let controller = OverlayController::new(
        Arc::clone(&backend),
        store.clone(),
        runtime.handle().clone(),
        tx.clone(),
    )
    .with_server_welcome(config.server_welcome);
    let backup_flight = controller.backup().flight();
    let updates = start_updates(&config, runtime.handle(), tx);
    let app = OverlayApp::new(rx, controller, updates, config.api_url.clone());

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Greenie")
            .with_inner_size([400.0, 600.0])
            .with_always_on_top()
            .with_decorations(false)
            .with_transparent(true)
            .with_taskbar(false),
        ..Default::default()
    };

    eframe::run_native(
        "Greenie",
        native_options,
        Box::new(move |_creation_context| Ok(Box::new(app))),
    )?;

    runtime.block_on(backup_before_quit(
        backend.as_ref(),
        &store,
        &backup_flight,
        SHUTDOWN_BACKUP_LIMIT,
    ));
    tracing::info!("greenie stopped");
    Ok(())
}
