//! ffprobe/ffmpeg backed [`MediaProbe`].

use crate::config::AppSettings;
use crate::delivery::MediaProbe;
use crate::error::JobError;
use crate::process::run_command;
use crate::utils::truncate_str;
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs `ffprobe` for durations and a low-priority `ffmpeg` for compression
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    timeout: Duration,
}

impl Ffmpeg {
    /// Create a transcoder with explicit binaries and ffmpeg timeout
    #[must_use]
    pub fn new(
        ffmpeg_bin: impl Into<String>,
        ffprobe_bin: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            timeout,
        }
    }

    /// Create a transcoder from settings
    #[must_use]
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(
            settings.ffmpeg_bin.clone(),
            settings.ffprobe_bin.clone(),
            settings.transcode_timeout(),
        )
    }
}

/// Video bitrate in kbit/s that makes `duration` fit in `target_bytes`
#[must_use]
pub fn target_bitrate_kbps(target_bytes: u64, duration: Duration) -> u64 {
    let secs = duration.as_secs_f64().max(1.0);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let kbps = (target_bytes as f64 * 8.0 / secs / 1000.0) as u64;
    kbps.max(1)
}

/// Parse the `format=duration` value printed by ffprobe
fn parse_duration(stdout: &str) -> Option<Duration> {
    let secs: f64 = stdout.lines().next()?.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

fn compressed_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map_or_else(|| "video".into(), |s| s.to_string_lossy().into_owned());
    path.with_file_name(format!("{stem}_compressed.mp4"))
}

#[async_trait]
impl MediaProbe for Ffmpeg {
    async fn duration(&self, path: &Path, cancel: &CancellationToken) -> Option<Duration> {
        let args = [
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-show_entries"),
            OsStr::new("format=duration"),
            OsStr::new("-of"),
            OsStr::new("default=noprint_wrappers=1:nokey=1"),
            path.as_os_str(),
        ];
        match run_command(&self.ffprobe_bin, &args, PROBE_TIMEOUT, cancel).await {
            Ok(result) if result.success() => {
                let duration = parse_duration(&result.stdout);
                debug!(path = %path.display(), ?duration, "Probed video duration");
                duration
            }
            Ok(result) => {
                warn!(
                    path = %path.display(),
                    exit_code = result.exit_code,
                    stderr = %truncate_str(&result.stderr, 300),
                    "ffprobe failed"
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ffprobe did not finish");
                None
            }
        }
    }

    async fn compress(
        &self,
        path: &Path,
        duration: Duration,
        target_bytes: u64,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let output = compressed_path(path);
        let kbps = target_bitrate_kbps(target_bytes, duration);
        info!(path = %path.display(), kbps, "Compressing video");

        let args: Vec<OsString> = vec![
            "-n".into(),
            "19".into(),
            self.ffmpeg_bin.clone().into(),
            "-i".into(),
            path.as_os_str().to_owned(),
            "-b:v".into(),
            format!("{kbps}k").into(),
            "-vf".into(),
            "scale=-2:720".into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "fast".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "128k".into(),
            "-y".into(),
            output.as_os_str().to_owned(),
        ];

        let result = match run_command("nice", &args, self.timeout, cancel).await {
            Ok(result) => result,
            Err(e) => {
                let _ = tokio::fs::remove_file(&output).await;
                return Err(e);
            }
        };

        if !result.success() {
            let _ = tokio::fs::remove_file(&output).await;
            let tail = result
                .stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or_default()
                .to_string();
            return Err(JobError::DownloadFailed(format!(
                "ffmpeg exited with code {}: {}",
                result.exit_code,
                truncate_str(tail, 200)
            )));
        }

        tokio::fs::rename(&output, path)
            .await
            .map_err(|e| JobError::DownloadFailed(format!("failed to replace video: {e}")))?;
        Ok(())
    }
}
