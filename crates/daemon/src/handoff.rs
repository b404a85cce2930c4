//! Segment handoff from the recorder drop directory into the media store.
//!
//! The recorder writes into a directory shared with this host; once a segment
//! is closed (split or stop) it is moved into `<media_root>/<owner>/` and
//! registered as a [`MediaAsset`] on the event. The shared filesystem may lag
//! behind the device, so directory visibility, file existence and file size
//! are all polled with the same [`RetryPolicy`] before anything is moved.

use crate::config::HandoffConfig;
use crate::model::{Event, MediaAsset};
use crate::piloting::RecordingInfo;
use crate::retry::RetryPolicy;
use crate::stability::{wait_for_stable_size, StabilityResult};
use crate::store::{EventStore, StoreError};
use chrono::NaiveDateTime;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fatal handoff conditions. Each carries the offending path when there is one.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("Recorder reported no current file")]
    NoCurrentFile,

    #[error("Owner login '{0}' cannot be used as a directory name")]
    InvalidOwner(String),

    #[error("Failed to create destination directory {}: {source}", .path.display())]
    DestinationCreate { path: PathBuf, source: io::Error },

    #[error("Destination directory {} is not visible", .path.display())]
    DestinationNotVisible { path: PathBuf },

    #[error("Segment {} not found in drop directory", .path.display())]
    SourceNotFound { path: PathBuf },

    #[error("Segment {} is still being written ({initial_size} -> {current_size} bytes)", .path.display())]
    SourceUnstable {
        path: PathBuf,
        initial_size: u64,
        current_size: u64,
    },

    #[error("Destination {} already exists", .path.display())]
    DestinationExists { path: PathBuf },

    #[error("Segment {} vanished before it could be moved", .path.display())]
    SourceVanished { path: PathBuf },

    #[error("Failed to move segment {}: {source}", .path.display())]
    MoveFailed { path: PathBuf, source: io::Error },

    #[error("Moved segment {} is not stable", .path.display())]
    DestinationUnstable { path: PathBuf },

    #[error("Failed to stat {}: {source}", .path.display())]
    Stat { path: PathBuf, source: io::Error },

    #[error("Failed to attach asset {}: {source}", .path.display())]
    Attach { path: PathBuf, source: StoreError },
}

impl HandoffError {
    /// Stable machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            HandoffError::NoCurrentFile => "no_current_file",
            HandoffError::InvalidOwner(_) => "invalid_owner",
            HandoffError::DestinationCreate { .. } => "destination_create_failed",
            HandoffError::DestinationNotVisible { .. } => "destination_not_visible",
            HandoffError::SourceNotFound { .. } => "source_not_found",
            HandoffError::SourceUnstable { .. } => "source_unstable",
            HandoffError::DestinationExists { .. } => "destination_exists",
            HandoffError::SourceVanished { .. } => "source_vanished",
            HandoffError::MoveFailed { .. } => "move_failed",
            HandoffError::DestinationUnstable { .. } => "destination_unstable",
            HandoffError::Stat { .. } => "stat_failed",
            HandoffError::Attach { .. } => "asset_attach_failed",
        }
    }

    /// The file or directory the failure is about.
    pub fn path(&self) -> Option<&Path> {
        match self {
            HandoffError::NoCurrentFile | HandoffError::InvalidOwner(_) => None,
            HandoffError::DestinationCreate { path, .. }
            | HandoffError::DestinationNotVisible { path }
            | HandoffError::SourceNotFound { path }
            | HandoffError::SourceUnstable { path, .. }
            | HandoffError::DestinationExists { path }
            | HandoffError::SourceVanished { path }
            | HandoffError::MoveFailed { path, .. }
            | HandoffError::DestinationUnstable { path }
            | HandoffError::Stat { path, .. }
            | HandoffError::Attach { path, .. } => Some(path),
        }
    }
}

/// Per-user directory name: characters outside `[A-Za-z0-9._-]` become `_`.
pub fn owner_dir_name(login: &str) -> Result<String, HandoffError> {
    let name: String = login
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() || name == "." || name == ".." {
        return Err(HandoffError::InvalidOwner(login.to_string()));
    }
    Ok(name)
}

/// Asset title for a segment: the event title, tagged with the segment number if known.
pub fn segment_title(event_title: &str, segment_number: &str) -> String {
    if segment_number.is_empty() {
        event_title.to_string()
    } else {
        format!("{} (segment {})", event_title, segment_number)
    }
}

/// Move `source` to `destination`, falling back to copy + remove when a
/// rename is not possible (e.g. across filesystems).
///
/// The copy runs on tokio's blocking pool; segments can be several gigabytes.
async fn move_file(source: &Path, destination: &Path) -> Result<(), HandoffError> {
    let rename_err = match fs::rename(source, destination).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if rename_err.kind() == io::ErrorKind::NotFound && !exists(source).await {
        return Err(HandoffError::SourceVanished {
            path: source.to_path_buf(),
        });
    }

    debug!(error = %rename_err, "rename failed, copying instead");
    if let Err(e) = fs::copy(source, destination).await {
        let _ = fs::remove_file(destination).await;
        return Err(if e.kind() == io::ErrorKind::NotFound {
            HandoffError::SourceVanished {
                path: source.to_path_buf(),
            }
        } else {
            HandoffError::MoveFailed {
                path: source.to_path_buf(),
                source: e,
            }
        });
    }
    fs::remove_file(source)
        .await
        .map_err(|e| HandoffError::MoveFailed {
            path: source.to_path_buf(),
            source: e,
        })
}

/// `drop_dir` joined with the base name of a recorder file, if it has one.
pub fn drop_path(drop_dir: &Path, current_file: &str) -> Option<PathBuf> {
    let name = Path::new(current_file).file_name()?;
    Some(drop_dir.join(name))
}

async fn exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct SegmentHandoff {
    drop_dir: PathBuf,
    media_root: PathBuf,
    policy: RetryPolicy,
}

impl SegmentHandoff {
    pub fn new(drop_dir: PathBuf, media_root: PathBuf, policy: RetryPolicy) -> Self {
        Self {
            drop_dir,
            media_root,
            policy,
        }
    }

    pub fn from_config(config: &HandoffConfig) -> Self {
        Self::new(
            config.drop_dir.clone(),
            config.media_root.clone(),
            RetryPolicy::from(config),
        )
    }

    /// Path of the recorder's current file inside the drop directory.
    ///
    /// Only the base name of `current_file` is used so a device-reported
    /// path can never point outside the drop directory.
    pub fn source_path(&self, current_file: &str) -> Option<PathBuf> {
        drop_path(&self.drop_dir, current_file)
    }

    /// Claim the segment described by `info` for `event` and return the
    /// event's full asset list.
    pub async fn claim<S>(
        &self,
        store: &S,
        event: &Event,
        info: &RecordingInfo,
        now: NaiveDateTime,
    ) -> Result<Vec<MediaAsset>, HandoffError>
    where
        S: EventStore + ?Sized,
    {
        let source = self
            .source_path(&info.current_file)
            .ok_or(HandoffError::NoCurrentFile)?;
        let file_name = source
            .file_name()
            .ok_or(HandoffError::NoCurrentFile)?
            .to_owned();

        let dest_dir = self.media_root.join(owner_dir_name(&event.owner)?);
        let destination = dest_dir.join(&file_name);

        info!(
            event_id = event.id,
            source = %source.display(),
            destination = %destination.display(),
            "claiming segment"
        );

        fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| HandoffError::DestinationCreate {
                path: dest_dir.clone(),
                source: e,
            })?;
        if !self.policy.poll_until(|| is_dir(&dest_dir)).await {
            return Err(HandoffError::DestinationNotVisible { path: dest_dir });
        }

        if !self.policy.poll_until(|| exists(&source)).await {
            return Err(HandoffError::SourceNotFound { path: source });
        }

        match wait_for_stable_size(&source, &self.policy).await {
            Ok(StabilityResult::Stable { size }) => {
                debug!(path = %source.display(), size, "segment is stable");
            }
            Ok(StabilityResult::Unstable {
                initial_size,
                current_size,
            }) => {
                return Err(HandoffError::SourceUnstable {
                    path: source,
                    initial_size,
                    current_size,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(HandoffError::SourceVanished { path: source })
            }
            Err(e) => {
                return Err(HandoffError::Stat {
                    path: source,
                    source: e,
                })
            }
        }

        if exists(&destination).await {
            return Err(HandoffError::DestinationExists { path: destination });
        }

        move_file(&source, &destination).await?;

        match wait_for_stable_size(&destination, &self.policy).await {
            Ok(result) if result.is_stable() => {}
            Ok(_) => return Err(HandoffError::DestinationUnstable { path: destination }),
            Err(e) => {
                return Err(HandoffError::Stat {
                    path: destination,
                    source: e,
                })
            }
        }

        let asset = MediaAsset {
            id: Uuid::new_v4(),
            title: segment_title(&event.title, &info.segment_number),
            owner: event.owner.clone(),
            path: destination.clone(),
            is_draft: event.is_draft,
            kind: event.kind.clone(),
            created_at: now,
        };

        let assets = store
            .append_asset(event.id, asset)
            .map_err(|e| HandoffError::Attach {
                path: destination.clone(),
                source: e,
            })?;

        info!(
            event_id = event.id,
            path = %destination.display(),
            assets = assets.len(),
            "segment handed off"
        );
        Ok(assets)
    }
}

/// Log a handoff failure with its reason and path.
pub(crate) fn log_failure(event_id: u64, error: &HandoffError) {
    warn!(
        event_id,
        reason = error.reason(),
        path = ?error.path(),
        error = %error,
        "segment handoff failed"
    );
}
