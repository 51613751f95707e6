use crate::error::ClientError;
use crate::update::{PlatformUpdater, ReleaseInfo};
use async_trait::async_trait;
use reqwest::Client;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FEED_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const PENDING_MARKER: &str = "pending_install.json";

#[derive(Debug, Deserialize)]
struct FeedEntry {
    version: String,
    url: String,
}

/// Marker the installer reads on quit.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingInstall {
    pub version: String,
    pub artifact: PathBuf,
}

/// Updater backed by a JSON release feed (`{"version": "...", "url": "..."}`).
///
/// Artifacts are staged under `staging_dir`; nothing is installed while the
/// app runs.
pub struct FeedUpdater {
    client: Client,
    feed_url: String,
    staging_dir: PathBuf,
}

impl FeedUpdater {
    pub fn new(feed_url: impl Into<String>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            feed_url: feed_url.into(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn artifact_path(&self, release: &ReleaseInfo) -> PathBuf {
        self.staging_dir
            .join(format!("greenie-{}.update", release.version))
    }

    pub fn marker_path(&self) -> PathBuf {
        self.staging_dir.join(PENDING_MARKER)
    }

    /// Reads the marker left by a previous run, if any.
    pub fn pending_install(staging_dir: &Path) -> Option<PendingInstall> {
        let data = fs::read(staging_dir.join(PENDING_MARKER)).ok()?;
        serde_json::from_slice(&data).ok()
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ClientError {
    ClientError::update(format!("{}: {err}", path.display()))
}

#[async_trait]
impl PlatformUpdater for FeedUpdater {
    async fn latest(&self) -> Result<Option<ReleaseInfo>, ClientError> {
        let response = self
            .client
            .get(&self.feed_url)
            .timeout(FEED_TIMEOUT)
            .send()
            .await
            .map_err(|err| ClientError::update(format!("release feed unreachable: {err}")))?;

        match response.status() {
            status if status == reqwest::StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(ClientError::update(format!(
                    "release feed returned {status}"
                )))
            }
            _ => {}
        }

        let entry: FeedEntry = response
            .json()
            .await
            .map_err(|err| ClientError::update(format!("release feed unreadable: {err}")))?;
        let version = Version::parse(entry.version.trim_start_matches('v')).map_err(|err| {
            ClientError::update(format!("invalid release version '{}': {err}", entry.version))
        })?;
        Ok(Some(ReleaseInfo {
            version,
            url: entry.url,
        }))
    }

    async fn download(&self, release: &ReleaseInfo) -> Result<(), ClientError> {
        let response = self
            .client
            .get(&release.url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|err| ClientError::update(format!("download failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ClientError::update(format!(
                "download returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ClientError::update(format!("download interrupted: {err}")))?;

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|err| io_error(&self.staging_dir, err))?;
        let final_path = self.artifact_path(release);
        let tmp_path = final_path.with_extension("update.part");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|err| io_error(&tmp_path, err))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|err| io_error(&final_path, err))?;

        tracing::info!(
            version = %release.version,
            bytes = bytes.len(),
            path = %final_path.display(),
            "update staged"
        );
        Ok(())
    }

    fn install_on_quit(&self, release: &ReleaseInfo) -> Result<(), ClientError> {
        let marker = PendingInstall {
            version: release.version.to_string(),
            artifact: self.artifact_path(release),
        };
        let bytes = serde_json::to_vec_pretty(&marker)
            .map_err(|err| ClientError::update(err.to_string()))?;
        let path = self.marker_path();
        fs::write(&path, bytes).map_err(|err| io_error(&path, err))?;
        tracing::info!(version = %release.version, "update will install on quit");
        Ok(())
    }
}
