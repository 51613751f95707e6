use crate::error::ClientError;
use crate::event::AppEvent;
use crate::update::{
    PlatformUpdater, ReleaseInfo, UpdateEvent, UpdateMachine, UpdateNotice, UpdateState,
};
use semver::Version;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, MissedTickBehavior};

/// How long "up to date" stays in the header before returning to idle.
pub const UP_TO_DATE_NOTICE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSchedule {
    pub check_interval: Duration,
    pub error_cooldown: Duration,
    pub notice_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateCommand {
    CheckNow,
}

/// Cheap handle the UI keeps to request checks.
#[derive(Debug, Clone)]
pub struct UpdateHandle {
    commands: UnboundedSender<UpdateCommand>,
}

impl UpdateHandle {
    pub fn check_now(&self) {
        if self.commands.send(UpdateCommand::CheckNow).is_err() {
            tracing::warn!("update coordinator is no longer running");
        }
    }
}

pub struct UpdateCoordinator {
    updater: Arc<dyn PlatformUpdater>,
    machine: UpdateMachine,
    current_version: Version,
    schedule: UpdateSchedule,
    events: UnboundedSender<AppEvent>,
}

impl UpdateCoordinator {
    pub fn new(
        updater: Arc<dyn PlatformUpdater>,
        current_version: Version,
        schedule: UpdateSchedule,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            updater,
            machine: UpdateMachine::default(),
            current_version,
            schedule,
            events,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.machine.state()
    }

    /// Runs the coordinator on `runtime` until every handle is dropped.
    pub fn spawn(self, runtime: &Handle) -> UpdateHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        runtime.spawn(self.run(rx));
        UpdateHandle { commands }
    }

    async fn run(mut self, mut commands: UnboundedReceiver<UpdateCommand>) {
        let mut ticker = time::interval(self.schedule.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::debug!("periodic update check");
                    self.check().await;
                }
                command = commands.recv() => match command {
                    Some(UpdateCommand::CheckNow) => {
                        tracing::info!("update check requested");
                        self.check().await;
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("update coordinator stopped");
    }

    /// One full pass: check, download if newer, schedule install on quit.
    pub async fn check(&mut self) {
        if !self.machine.can_check() {
            tracing::debug!(
                state = self.machine.state().as_str(),
                "update check skipped"
            );
            return;
        }
        self.transition(UpdateEvent::CheckRequested, None, None);

        let release = match self.updater.latest().await {
            Ok(release) => release,
            Err(err) => return self.fail(err).await,
        };

        let Some(release) = release.filter(|release| release.version > self.current_version)
        else {
            tracing::info!(current = %self.current_version, "no newer release published");
            self.transition(UpdateEvent::UpToDate, None, None);
            time::sleep(self.schedule.notice_duration).await;
            self.transition(UpdateEvent::NoticeExpired, None, None);
            return;
        };

        let version = release.version.to_string();
        tracing::info!(%version, "update available, downloading");
        self.transition(UpdateEvent::NewerVersionFound, Some(version.clone()), None);

        if let Err(err) = self.download_and_schedule(&release).await {
            return self.fail(err).await;
        }
        self.transition(UpdateEvent::DownloadCompleted, Some(version), None);
    }

    async fn download_and_schedule(&self, release: &ReleaseInfo) -> Result<(), ClientError> {
        self.updater.download(release).await?;
        self.updater.install_on_quit(release)
    }

    /// Moves to Error, waits out the cool-down, then returns to Idle.
    async fn fail(&mut self, err: ClientError) {
        tracing::warn!("update failed: {err}");
        self.transition(UpdateEvent::Failed, None, Some(err.to_string()));
        time::sleep(self.schedule.error_cooldown).await;
        self.transition(UpdateEvent::CooldownElapsed, None, None);
    }

    fn transition(&mut self, event: UpdateEvent, version: Option<String>, message: Option<String>) {
        match self.machine.apply(event) {
            Ok(state) => {
                let notice = UpdateNotice {
                    state,
                    version,
                    message,
                };
                if self.events.send(AppEvent::Update(notice)).is_err() {
                    tracing::debug!("update notice dropped, UI channel closed");
                }
            }
            Err(err) => tracing::error!("{err}"),
        }
    }
}
