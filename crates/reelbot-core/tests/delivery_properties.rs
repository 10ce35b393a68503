use async_trait::async_trait;
use proptest::prelude::*;
use reelbot_core::delivery::{
    ensure_within_ceiling, plan_delivery, DeliveryLimits, MediaFile, MediaKind, MediaProbe,
};
use reelbot_core::error::JobError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MB: u64 = 1024 * 1024;

/// Probe that knows nothing and cannot compress
struct NoProbe;

#[async_trait]
impl MediaProbe for NoProbe {
    async fn duration(&self, _path: &Path, _cancel: &CancellationToken) -> Option<Duration> {
        None
    }

    async fn compress(
        &self,
        _path: &Path,
        _duration: Duration,
        _target_bytes: u64,
        _cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        Err(JobError::DownloadFailed("no transcoder".to_string()))
    }
}

fn limits() -> DeliveryLimits {
    DeliveryLimits {
        max_bytes: 50 * MB,
        compression_target_bytes: 40 * MB,
        max_duration: Duration::from_secs(720),
    }
}

fn media() -> impl Strategy<Value = Vec<MediaFile>> {
    proptest::collection::vec((any::<bool>(), 0..120 * MB), 0..25).prop_map(|files| {
        files
            .into_iter()
            .enumerate()
            .map(|(i, (video, size))| MediaFile {
                path: PathBuf::from(format!("{i}.{}", if video { "mp4" } else { "jpg" })),
                kind: if video { MediaKind::Video } else { MediaKind::Photo },
                size,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn ceiling_check_matches_comparison(size in any::<u64>(), limit in any::<u64>()) {
        prop_assert_eq!(ensure_within_ceiling(size, limit).is_ok(), size <= limit);
    }

    /// Nothing above the ceiling ever lands in a batch, and batches respect
    /// the group sizes.
    #[test]
    fn planned_batches_stay_under_ceiling(files in media()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let total = files.len();
        let oversized = files.iter().filter(|f| f.size > 50 * MB).count();
        let cancel = CancellationToken::new();
        let plan = runtime.block_on(plan_delivery(files, &limits(), &NoProbe, &cancel));

        match plan {
            Ok(plan) => {
                let planned: usize = plan.batches.iter().map(|b| b.files.len()).sum();
                prop_assert_eq!(planned + plan.notices.len(), total);
                prop_assert_eq!(plan.notices.len(), oversized);
                prop_assert_eq!(plan.throttle, total > 10);
                for batch in &plan.batches {
                    let max = match batch.kind {
                        MediaKind::Video => 2,
                        MediaKind::Photo => 10,
                    };
                    prop_assert!(!batch.files.is_empty() && batch.files.len() <= max);
                    for file in &batch.files {
                        prop_assert!(file.size <= 50 * MB);
                        prop_assert_eq!(file.kind, batch.kind);
                    }
                }
            }
            Err(e) => {
                prop_assert_eq!(oversized, total);
                let expected_no_media = total == 0;
                prop_assert_eq!(matches!(e, JobError::DownloadFailed(_)), expected_no_media);
            }
        }
    }
}
