#![cfg(unix)]

use reelbot_core::error::JobError;
use reelbot_core::process::run_command;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn timed_out_process_is_killed() {
    let dir = tempfile::tempdir().map_err(|e| e.to_string());
    let Ok(dir) = dir else {
        panic!("no temp dir");
    };
    let marker = dir.path().join("survived");
    let script = format!("sleep 3 && touch {}", marker.display());

    let started = Instant::now();
    let result = run_command(
        "sh",
        &["-c", script.as_str()],
        Duration::from_millis(300),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(
        result.err(),
        Some(JobError::Timeout {
            after: Duration::from_millis(300)
        })
    );
    assert!(started.elapsed() < Duration::from_secs(3));

    // Had the shell lived on, it would have created the marker by now
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!marker.exists(), "process outlived its timeout");
}

#[tokio::test]
async fn fast_process_is_untouched_by_timeout() -> Result<(), JobError> {
    let result = run_command(
        "sh",
        &["-c", "printf ok"],
        Duration::from_secs(10),
        &CancellationToken::new(),
    )
    .await?;
    assert!(result.success());
    assert_eq!(result.stdout, "ok");
    Ok(())
}

#[tokio::test]
async fn background_child_does_not_hold_the_caller() -> Result<(), JobError> {
    // The backgrounded sleep inherits the pipes and keeps them open after sh exits
    let started = Instant::now();
    let result = run_command(
        "sh",
        &["-c", "sleep 8 & echo hi"],
        Duration::from_secs(1),
        &CancellationToken::new(),
    )
    .await?;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(result.success());
    assert_eq!(result.stdout.trim(), "hi");
    Ok(())
}

#[tokio::test]
async fn timed_out_background_child_does_not_hold_the_caller() {
    let started = Instant::now();
    let result = run_command(
        "sh",
        &["-c", "sleep 8 & sleep 8"],
        Duration::from_millis(300),
        &CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(JobError::Timeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(3));
}
