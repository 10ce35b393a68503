//! yt-dlp / gallery-dl downloader
//!
//! The production [`JobRunner`]: checks the video duration from metadata,
//! downloads into a private temporary directory, falls back to gallery-dl
//! for Instagram posts and finally plans the delivery of what was produced.

use crate::config::AppSettings;
use crate::delivery::{collect_media, plan_delivery, Artifact, DeliveryLimits, MediaProbe};
use crate::dispatcher::JobRunner;
use crate::error::JobError;
use crate::job::Job;
use crate::process::{run_command, ExecResult};
use crate::utils::truncate_str;
use async_trait::async_trait;
use lazy_regex::regex_is_match;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// yt-dlp output that means retrying will not help
const FATAL_ERROR_PATTERNS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video is private",
    "This video is not available",
    "Sign in to confirm your age",
    "age-restricted",
    "members-only",
    "removed by the uploader",
    "This video has been removed",
    "no longer available",
    "blocked it in your country",
    "geo-restricted",
    "copyright claim",
    "terminated account",
    "Unsupported URL",
    "is not a valid URL",
    "Unable to extract video data",
    "Requested content is not available",
    "login required",
    "HTTP Error 403",
    "HTTP Error 404",
];

/// yt-dlp output caused by network trouble on either side
const TRANSIENT_ERROR_PATTERNS: &[&str] = &[
    "Connection reset",
    "Connection timed out",
    "Read timed out",
    "Unable to download webpage",
    "HTTP Error 429",
    "HTTP Error 503",
    "network is unreachable",
    "Temporary failure in name resolution",
];

const FORMAT_SORT: &str = "vcodec:h264,fps,res,acodec:m4a";
const MAX_REASON_CHARS: usize = 200;

#[derive(Deserialize)]
struct Metadata {
    duration: Option<f64>,
}

/// Short human-readable reason for a failed downloader run
#[must_use]
pub fn classify_failure(output: &str, exit_code: i32) -> String {
    if let Some(pattern) = FATAL_ERROR_PATTERNS.iter().find(|p| output.contains(**p)) {
        return (*pattern).to_string();
    }
    if let Some(pattern) = TRANSIENT_ERROR_PATTERNS.iter().find(|p| output.contains(**p)) {
        return format!("{pattern} (temporary, try again later)");
    }
    output
        .lines()
        .rev()
        .find_map(|line| line.split_once("ERROR:").map(|(_, msg)| msg.trim()))
        .filter(|msg| !msg.is_empty())
        .map_or_else(
            || format!("downloader exited with code {exit_code}"),
            |msg| truncate_str(msg, MAX_REASON_CHARS),
        )
}

/// Instagram post (not reel) URLs are retried with gallery-dl
#[must_use]
pub fn is_instagram_post(url: &str) -> bool {
    regex_is_match!(r"^https?://(?:www\.)?instagram\.com/[^/]+/[^/]+/?.*$", url)
        && !url.contains("/reel")
}

/// Duration from the first line of `yt-dlp -j` output
fn metadata_duration(stdout: &str) -> Option<Duration> {
    let line = stdout.lines().find(|line| line.trim_start().starts_with('{'))?;
    let metadata: Metadata = serde_json::from_str(line).ok()?;
    metadata
        .duration
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn failure(result: &ExecResult) -> JobError {
    JobError::DownloadFailed(classify_failure(&result.combined_output(), result.exit_code))
}

/// Downloads media with yt-dlp (gallery-dl as a fallback)
pub struct MediaDownloader {
    ytdlp_bin: String,
    gallery_dl_bin: String,
    cookies: Option<PathBuf>,
    download_timeout: Duration,
    limits: DeliveryLimits,
    probe: Arc<dyn MediaProbe>,
}

impl MediaDownloader {
    /// Create a downloader; `probe` is used for delivery planning
    #[must_use]
    pub fn new(settings: &AppSettings, probe: Arc<dyn MediaProbe>) -> Self {
        let cookies = settings.cookies_path().map(Path::to_path_buf);
        if let Some(path) = &cookies {
            info!(path = %path.display(), "Using cookies for downloads");
        }
        Self {
            ytdlp_bin: settings.ytdlp_bin.clone(),
            gallery_dl_bin: settings.gallery_dl_bin.clone(),
            cookies,
            download_timeout: settings.download_timeout(),
            limits: DeliveryLimits::from_settings(settings),
            probe,
        }
    }

    fn cookie_args(&self) -> Vec<OsString> {
        self.cookies
            .iter()
            .flat_map(|path| [OsString::from("--cookies"), path.as_os_str().to_owned()])
            .collect()
    }

    /// Duration reported by `yt-dlp -j`. Failures other than cancellation
    /// only mean the duration is unknown.
    async fn probe_duration(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>, JobError> {
        let mut args = self.cookie_args();
        args.extend(["-j", "--no-playlist", "--skip-download", url].map(OsString::from));

        match run_command(&self.ytdlp_bin, &args, self.download_timeout, cancel).await {
            Ok(result) if result.success() => Ok(metadata_duration(&result.stdout)),
            Ok(result) => {
                debug!(
                    exit_code = result.exit_code,
                    reason = %classify_failure(&result.stderr, result.exit_code),
                    "Metadata unavailable"
                );
                Ok(None)
            }
            Err(JobError::Cancelled) => Err(JobError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Metadata request failed");
                Ok(None)
            }
        }
    }

    async fn ytdlp(
        &self,
        url: &str,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let mut args = self.cookie_args();
        args.extend(["-S", FORMAT_SORT, url, "-o"].map(OsString::from));
        args.push(dir.join("%(id)s.%(ext)s").into_os_string());

        let result = run_command(&self.ytdlp_bin, &args, self.download_timeout, cancel).await?;
        if result.success() {
            return Ok(());
        }
        warn!(exit_code = result.exit_code, "yt-dlp failed");
        Err(failure(&result))
    }

    async fn gallery_dl(
        &self,
        url: &str,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let mut args = self.cookie_args();
        args.push(url.into());
        args.push("-d".into());
        args.push(dir.as_os_str().to_owned());

        let result = run_command(&self.gallery_dl_bin, &args, self.download_timeout, cancel).await?;
        if result.success() {
            return Ok(());
        }
        warn!(exit_code = result.exit_code, "gallery-dl failed");
        Err(failure(&result))
    }

    async fn fetch(
        &self,
        url: &str,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        match self.ytdlp(url, dir, cancel).await {
            Err(JobError::DownloadFailed(reason)) if is_instagram_post(url) => {
                info!(%reason, "yt-dlp failed on an Instagram post, trying gallery-dl");
                self.gallery_dl(url, dir, cancel).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl JobRunner for MediaDownloader {
    async fn run(&self, job: &Job, cancel: CancellationToken) -> Result<Artifact, JobError> {
        let url = job.source_url.as_str();

        if let Some(duration) = self.probe_duration(url, &cancel).await? {
            if duration > self.limits.max_duration {
                return Err(JobError::VideoTooLong {
                    duration_secs: duration.as_secs(),
                    limit_secs: self.limits.max_duration.as_secs(),
                });
            }
        }

        let workdir = tempfile::Builder::new()
            .prefix("reelbot-")
            .tempdir()
            .map_err(|e| JobError::DownloadFailed(format!("cannot create work directory: {e}")))?;
        debug!(job_id = %job.id, dir = %workdir.path().display(), "Downloading");

        self.fetch(url, workdir.path(), &cancel).await?;

        let media = collect_media(workdir.path())
            .map_err(|e| JobError::DownloadFailed(format!("cannot read downloads: {e}")))?;
        info!(job_id = %job.id, files = media.len(), "Download finished");

        let plan = plan_delivery(media, &self.limits, self.probe.as_ref(), &cancel).await?;
        Ok(Artifact::new(workdir, plan))
    }
}
