//! Background auto-update lifecycle.
//!
//! [`UpdateMachine`] holds the legal transitions. [`coordinator::UpdateCoordinator`]
//! drives it from a timer and from user commands, and reports every transition
//! to the UI as an [`UpdateNotice`].

use crate::error::ClientError;
use async_trait::async_trait;
use semver::Version;
use std::fmt;

pub mod coordinator;
pub mod feed;

pub use coordinator::{UpdateCoordinator, UpdateHandle, UpdateSchedule, UP_TO_DATE_NOTICE};
pub use feed::FeedUpdater;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateState {
    #[default]
    Idle,
    Checking,
    Downloading,
    Downloaded,
    NotAvailable,
    Error,
}

impl UpdateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::NotAvailable => "not_available",
            Self::Error => "error",
        }
    }
}

/// Inputs to the state machine, reported by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEvent {
    CheckRequested,
    NewerVersionFound,
    UpToDate,
    DownloadCompleted,
    Failed,
    CooldownElapsed,
    /// The "up to date" status has been shown long enough.
    NoticeExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: UpdateState,
    pub event: UpdateEvent,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no transition from {} on {:?}", self.from.as_str(), self.event)
    }
}

impl std::error::Error for InvalidTransition {}

#[derive(Debug, Clone, Default)]
pub struct UpdateMachine {
    state: UpdateState,
}

impl UpdateMachine {
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// A new check may start only from a resting state.
    pub fn can_check(&self) -> bool {
        matches!(self.state, UpdateState::Idle | UpdateState::NotAvailable)
    }

    pub fn apply(&mut self, event: UpdateEvent) -> Result<UpdateState, InvalidTransition> {
        use UpdateEvent::*;
        use UpdateState::*;

        let next = match (self.state, event) {
            (_, Failed) => Error,
            (Idle | NotAvailable, CheckRequested) => Checking,
            (Checking, NewerVersionFound) => Downloading,
            (Checking, UpToDate) => NotAvailable,
            (Downloading, DownloadCompleted) => Downloaded,
            (Error, CooldownElapsed) => Idle,
            (NotAvailable, NoticeExpired) => Idle,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        self.state = next;
        Ok(next)
    }
}

/// One-way notification emitted on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNotice {
    pub state: UpdateState,
    pub version: Option<String>,
    pub message: Option<String>,
}

impl UpdateNotice {
    /// Status line for the overlay header; `None` hides the indicator.
    pub fn status_text(&self) -> Option<String> {
        let version = self.version.as_deref().unwrap_or("");
        match self.state {
            UpdateState::Idle => None,
            UpdateState::Checking => Some("Checking for updates...".to_string()),
            UpdateState::Downloading => Some(format!("Downloading update {version}")),
            UpdateState::Downloaded => {
                Some(format!("Update {version} ready - installs when you quit"))
            }
            UpdateState::NotAvailable => Some("Greenie is up to date".to_string()),
            UpdateState::Error => Some(
                self.message
                    .clone()
                    .unwrap_or_else(|| "Update check failed".to_string()),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: Version,
    pub url: String,
}

/// Seam to the platform's update facility.
#[async_trait]
pub trait PlatformUpdater: Send + Sync {
    /// Latest published release, `None` when nothing is published.
    async fn latest(&self) -> Result<Option<ReleaseInfo>, ClientError>;

    async fn download(&self, release: &ReleaseInfo) -> Result<(), ClientError>;

    /// Schedules the downloaded release to be installed when the app quits.
    fn install_on_quit(&self, release: &ReleaseInfo) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(state: UpdateState) -> UpdateMachine {
        UpdateMachine { state }
    }

    #[test]
    fn happy_path_reaches_downloaded() {
        let mut machine = UpdateMachine::default();
        assert_eq!(machine.state(), UpdateState::Idle);
        assert_eq!(machine.apply(UpdateEvent::CheckRequested), Ok(UpdateState::Checking));
        assert_eq!(
            machine.apply(UpdateEvent::NewerVersionFound),
            Ok(UpdateState::Downloading)
        );
        assert_eq!(
            machine.apply(UpdateEvent::DownloadCompleted),
            Ok(UpdateState::Downloaded)
        );
        assert!(!machine.can_check());
    }

    #[test]
    fn downloading_never_goes_to_not_available() {
        let mut machine = machine_in(UpdateState::Downloading);
        let error = machine
            .apply(UpdateEvent::UpToDate)
            .expect_err("downloading cannot become not-available");
        assert_eq!(error.from, UpdateState::Downloading);
        assert_eq!(machine.state(), UpdateState::Downloading);
    }

    #[test]
    fn every_state_can_fail_and_error_only_recovers_to_idle() {
        for state in [
            UpdateState::Idle,
            UpdateState::Checking,
            UpdateState::Downloading,
            UpdateState::Downloaded,
            UpdateState::NotAvailable,
            UpdateState::Error,
        ] {
            let mut machine = machine_in(state);
            assert_eq!(machine.apply(UpdateEvent::Failed), Ok(UpdateState::Error));
            assert!(machine.apply(UpdateEvent::CheckRequested).is_err());
            assert_eq!(
                machine.apply(UpdateEvent::CooldownElapsed),
                Ok(UpdateState::Idle)
            );
        }
    }

    #[test]
    fn up_to_date_notice_expires_to_idle() {
        let mut machine = machine_in(UpdateState::NotAvailable);
        assert_eq!(machine.apply(UpdateEvent::NoticeExpired), Ok(UpdateState::Idle));
        assert!(machine.apply(UpdateEvent::NoticeExpired).is_err());
        assert!(machine_in(UpdateState::Downloaded)
            .apply(UpdateEvent::NoticeExpired)
            .is_err());
    }

    #[test]
    fn not_available_allows_a_fresh_check() {
        let mut machine = machine_in(UpdateState::NotAvailable);
        assert!(machine.can_check());
        assert_eq!(machine.apply(UpdateEvent::CheckRequested), Ok(UpdateState::Checking));
    }

    #[test]
    fn status_text_mentions_version() {
        let notice = UpdateNotice {
            state: UpdateState::Downloaded,
            version: Some("1.2.0".to_string()),
            message: None,
        };
        let text = notice.status_text().expect("downloaded shows status");
        assert!(text.contains("1.2.0"));
        assert!(UpdateNotice {
            state: UpdateState::Idle,
            version: None,
            message: None
        }
        .status_text()
        .is_none());
    }
}
