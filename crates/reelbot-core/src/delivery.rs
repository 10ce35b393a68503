//! Result delivery planning
//!
//! Turns the files a job produced into upload batches that respect the
//! platform ceiling: long videos are dropped, large videos are compressed
//! once, anything still above the ceiling is never handed to the transport.

use crate::config::{
    AppSettings, PHOTO_GROUP_SIZE, THROTTLE_MEDIA_THRESHOLD, VIDEO_GROUP_SIZE,
};
use crate::error::JobError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kind of media Telegram can receive from us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// `.mp4`
    Video,
    /// `.jpg`, `.jpeg`, `.png`
    Photo,
}

impl MediaKind {
    /// Classify a file by extension; other files are not media
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp4" => Some(Self::Video),
            "jpg" | "jpeg" | "png" => Some(Self::Photo),
            _ => None,
        }
    }
}

/// A media file produced by a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Location inside the job's working directory
    pub path: PathBuf,
    /// Video or photo
    pub kind: MediaKind,
    /// Size in bytes when last checked
    pub size: u64,
}

/// Recursively collect media files under `dir`, sorted by path.
///
/// # Errors
///
/// Returns an I/O error if a directory cannot be listed.
pub fn collect_media(dir: &Path) -> io::Result<Vec<MediaFile>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if meta.is_dir() {
                pending.push(path);
            } else if let Some(kind) = MediaKind::from_path(&path) {
                found.push(MediaFile {
                    path,
                    kind,
                    size: meta.len(),
                });
            }
        }
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

/// Check `size` against the upload ceiling
///
/// # Errors
///
/// Returns `JobError::ArtifactTooLarge` when `size > limit`.
pub const fn ensure_within_ceiling(size: u64, limit: u64) -> Result<(), JobError> {
    if size > limit {
        return Err(JobError::ArtifactTooLarge { size, limit });
    }
    Ok(())
}

/// Media inspection and transcoding used while planning
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Duration of a video, `None` if it cannot be determined
    async fn duration(&self, path: &Path, cancel: &CancellationToken) -> Option<Duration>;

    /// Re-encode the video in place aiming at `target_bytes`
    async fn compress(
        &self,
        path: &Path,
        duration: Duration,
        target_bytes: u64,
        cancel: &CancellationToken,
    ) -> Result<(), JobError>;
}

/// Limits applied while planning
#[derive(Debug, Clone, Copy)]
pub struct DeliveryLimits {
    /// Upload ceiling
    pub max_bytes: u64,
    /// Size compression aims for
    pub compression_target_bytes: u64,
    /// Longest accepted video
    pub max_duration: Duration,
}

impl DeliveryLimits {
    /// Limits from settings
    #[must_use]
    pub const fn from_settings(settings: &AppSettings) -> Self {
        Self {
            max_bytes: settings.max_artifact_bytes(),
            compression_target_bytes: settings.compression_target_bytes(),
            max_duration: settings.max_video_duration(),
        }
    }
}

/// One upload: a single file or a media group of the same kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBatch {
    /// Kind shared by all files
    pub kind: MediaKind,
    /// Files in upload order
    pub files: Vec<MediaFile>,
}

impl MediaBatch {
    /// Whether the batch must be sent as a media group
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.files.len() > 1
    }
}

/// What the transport should send for a job
#[derive(Debug, Clone, Default)]
pub struct DeliveryPlan {
    /// Uploads in order
    pub batches: Vec<MediaBatch>,
    /// Files that were dropped, as user-facing errors
    pub notices: Vec<JobError>,
    /// Pause between batches
    pub throttle: bool,
}

/// Working directory of a finished job with its delivery plan.
///
/// Dropping the artifact deletes the directory and every file in it.
#[derive(Debug)]
pub struct Artifact {
    workdir: TempDir,
    plan: DeliveryPlan,
}

impl Artifact {
    /// Bundle a working directory with its plan
    #[must_use]
    pub const fn new(workdir: TempDir, plan: DeliveryPlan) -> Self {
        Self { workdir, plan }
    }

    /// Upload plan
    #[must_use]
    pub const fn plan(&self) -> &DeliveryPlan {
        &self.plan
    }

    /// Directory holding the media
    #[must_use]
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }
}

/// Build the delivery plan for `media`.
///
/// # Errors
///
/// - `JobError::Cancelled` if `cancel` fires during probing or compression
/// - the first notice (or `DownloadFailed`) if no file survives
pub async fn plan_delivery(
    media: Vec<MediaFile>,
    limits: &DeliveryLimits,
    probe: &dyn MediaProbe,
    cancel: &CancellationToken,
) -> Result<DeliveryPlan, JobError> {
    let throttle = media.len() > THROTTLE_MEDIA_THRESHOLD;
    if throttle {
        debug!(count = media.len(), "Too many media files, enabling throttle");
    }

    let mut videos = Vec::new();
    let mut photos = Vec::new();
    let mut notices = Vec::new();

    for file in media {
        let prepared = match file.kind {
            MediaKind::Video => prepare_video(file, limits, probe, cancel).await,
            MediaKind::Photo => ensure_within_ceiling(file.size, limits.max_bytes).map(|()| file),
        };
        match prepared {
            Ok(file) if file.kind == MediaKind::Video => videos.push(file),
            Ok(file) => photos.push(file),
            Err(JobError::Cancelled) => return Err(JobError::Cancelled),
            Err(notice) => {
                info!(reason = %notice, "Dropping media file");
                notices.push(notice);
            }
        }
    }

    if videos.is_empty() && photos.is_empty() {
        return Err(notices
            .into_iter()
            .next()
            .unwrap_or_else(|| JobError::DownloadFailed("no media found".to_string())));
    }

    let mut batches = group(videos, MediaKind::Video, VIDEO_GROUP_SIZE);
    batches.extend(group(photos, MediaKind::Photo, PHOTO_GROUP_SIZE));

    Ok(DeliveryPlan {
        batches,
        notices,
        throttle,
    })
}

fn group(files: Vec<MediaFile>, kind: MediaKind, size: usize) -> Vec<MediaBatch> {
    files
        .chunks(size)
        .map(|chunk| MediaBatch {
            kind,
            files: chunk.to_vec(),
        })
        .collect()
}

async fn prepare_video(
    file: MediaFile,
    limits: &DeliveryLimits,
    probe: &dyn MediaProbe,
    cancel: &CancellationToken,
) -> Result<MediaFile, JobError> {
    let duration = probe.duration(&file.path, cancel).await;
    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    if let Some(duration) = duration {
        if duration > limits.max_duration {
            return Err(JobError::VideoTooLong {
                duration_secs: duration.as_secs(),
                limit_secs: limits.max_duration.as_secs(),
            });
        }
    }

    if file.size <= limits.max_bytes {
        return Ok(file);
    }

    // Bitrate is derived from the duration; without it we cannot compress
    let Some(duration) = duration.filter(|d| !d.is_zero()) else {
        return Err(JobError::ArtifactTooLarge {
            size: file.size,
            limit: limits.max_bytes,
        });
    };

    info!(path = %file.path.display(), size = file.size, "Video above ceiling, compressing");
    match probe
        .compress(&file.path, duration, limits.compression_target_bytes, cancel)
        .await
    {
        Ok(()) => {}
        Err(JobError::Cancelled) => return Err(JobError::Cancelled),
        Err(e) => warn!(error = %e, path = %file.path.display(), "Compression failed"),
    }

    let size = tokio::fs::metadata(&file.path)
        .await
        .map_err(|e| JobError::DownloadFailed(format!("compressed video unreadable: {e}")))?
        .len();
    ensure_within_ceiling(size, limits.max_bytes)?;
    Ok(MediaFile { size, ..file })
}
