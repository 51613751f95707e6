use crate::backend::{ChatReply, KnowledgeExport};
use crate::error::ClientError;
use crate::update::UpdateNotice;

/// Results of background work, delivered to the UI thread over one channel.
#[derive(Debug, Clone)]
pub enum AppEvent {
    ChatResolved {
        turn_id: u64,
        outcome: Result<ChatReply, ClientError>,
    },
    LoginFinished {
        username: String,
        outcome: Result<String, ClientError>,
    },
    /// Registration plus the implicit login that follows it.
    RegisterFinished {
        username: String,
        outcome: Result<String, ClientError>,
    },
    WelcomeLoaded(String),
    BackupFinished(Result<KnowledgeExport, ClientError>),
    Update(UpdateNotice),
}

/// Process-boundary controls the overlay can ask of its host window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    Minimize,
    Quit,
    CheckForUpdate,
    TriggerUpdate,
}
