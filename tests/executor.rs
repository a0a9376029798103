//! Process executor: resolution, deadlines, capture caps, and error
//! classification against real `sh` subprocesses.
#![cfg(unix)]

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use colloquy::dispatch::cli::{MAX_OUTPUT_BYTES, ProcessExecutor, TRUNCATION_MARKER};
use colloquy::error::{CliErrorKind, ExitError};

fn sh(timeout: Duration) -> ProcessExecutor {
    ProcessExecutor::new("test", "sh", timeout)
}

fn script(body: &str) -> Vec<String> {
    vec!["-c".to_string(), body.to_string()]
}

// ---------------------------------------------------------------------------
// Success path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn returns_trimmed_stdout() {
    let out = sh(Duration::from_secs(10))
        .run(&script("printf '  hello world \\n\\n'"), None, None)
        .await
        .unwrap();
    assert_eq!(out.stdout, "hello world");
    assert!(!out.truncated);
}

#[tokio::test]
async fn stderr_chatter_does_not_fail_success() {
    let out = sh(Duration::from_secs(10))
        .run(&script("echo progress >&2; echo answer"), None, None)
        .await
        .unwrap();
    assert_eq!(out.stdout, "answer");
}

#[tokio::test]
async fn runs_in_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let out = sh(Duration::from_secs(10))
        .run(&script("pwd"), Some(dir.path()), None)
        .await
        .unwrap();
    assert_eq!(
        std::fs::canonicalize(&out.stdout).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap()
    );
}

#[tokio::test]
async fn arguments_are_not_shell_interpreted() {
    let args = vec![
        "-c".to_string(),
        "printf '%s' \"$1\"".to_string(),
        "sh".to_string(),
        "a; echo injected $(whoami)".to_string(),
    ];
    let out = sh(Duration::from_secs(10)).run(&args, None, None).await.unwrap();
    assert_eq!(out.stdout, "a; echo injected $(whoami)");
}

// ---------------------------------------------------------------------------
// Not found: nothing is spawned
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_executable_is_not_found() {
    let exec = ProcessExecutor::new("ghost", "colloquy-no-such-binary-9f2c", Duration::from_secs(5));
    assert!(!exec.is_available());

    let err = tokio_test::assert_err!(exec.run(&[], None, None).await);
    assert_eq!(err.kind, CliErrorKind::NotFound);
    assert!(err.is_not_found());
    assert_eq!(err.provider, "ghost");
    assert!(err.message.contains("colloquy-no-such-binary-9f2c"));
    assert!(err.source.is_some());
}

// ---------------------------------------------------------------------------
// Process failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stderr_becomes_failure_message() {
    let err = sh(Duration::from_secs(10))
        .run(&script("echo 'unknown model: foo' >&2; exit 3"), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, CliErrorKind::ProcessFailed);
    assert_eq!(err.message, "unknown model: foo");

    let exit = err
        .source
        .as_ref()
        .and_then(|s| s.downcast_ref::<ExitError>())
        .expect("exit status wrapped");
    assert_eq!(exit.0.code(), Some(3));
}

#[tokio::test]
async fn silent_failure_is_generic() {
    let err = sh(Duration::from_secs(10))
        .run(&script("exit 1"), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, CliErrorKind::ProcessFailed);
    assert_eq!(err.message, "command failed");
    assert!(err.source.is_some());
}

#[tokio::test]
async fn nonzero_exit_fails_even_with_stdout() {
    let err = sh(Duration::from_secs(10))
        .run(&script("echo 'looks fine'; exit 1"), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, CliErrorKind::ProcessFailed);
}

// ---------------------------------------------------------------------------
// Deadline and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deadline_is_timeout_not_process_failure() {
    let start = Instant::now();
    let err = sh(Duration::from_millis(1))
        .run(&script("sleep 5"), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, CliErrorKind::Timeout);
    assert!(err.is_timeout());
    assert!(
        err.source
            .as_ref()
            .is_some_and(|s| s.downcast_ref::<tokio::time::error::Elapsed>().is_some())
    );
    assert!(
        start.elapsed() < Duration::from_secs(3),
        "timed-out process must not be awaited, took {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn cancellation_kills_process() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = sh(Duration::from_secs(30))
        .run(&script("sleep 30"), None, Some(&token))
        .await
        .unwrap_err();
    assert_eq!(err.kind, CliErrorKind::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(5));
}

// ---------------------------------------------------------------------------
// Capture caps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stdout_over_cap_is_truncated_with_marker() {
    let body = format!("head -c {} /dev/zero | tr '\\0' x", MAX_OUTPUT_BYTES + 64 * 1024);
    let out = sh(Duration::from_secs(60))
        .run(&script(&body), None, None)
        .await
        .unwrap();

    assert!(out.truncated);
    assert!(out.stdout.ends_with(TRUNCATION_MARKER));
    let kept = out.stdout.len() - TRUNCATION_MARKER.len();
    assert!(kept <= MAX_OUTPUT_BYTES, "kept {kept} bytes");
    assert_eq!(kept, MAX_OUTPUT_BYTES);
}

#[tokio::test]
async fn output_at_cap_is_not_truncated() {
    let body = format!("head -c {MAX_OUTPUT_BYTES} /dev/zero | tr '\\0' y");
    let out = sh(Duration::from_secs(60))
        .run(&script(&body), None, None)
        .await
        .unwrap();
    assert!(!out.truncated);
    assert_eq!(out.stdout.len(), MAX_OUTPUT_BYTES);
}

#[tokio::test]
async fn stderr_over_cap_marks_failure_message() {
    let body = format!(
        "head -c {} /dev/zero | tr '\\0' e >&2; exit 1",
        MAX_OUTPUT_BYTES + 1024
    );
    let err = sh(Duration::from_secs(60))
        .run(&script(&body), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, CliErrorKind::ProcessFailed);
    assert!(err.message.ends_with(TRUNCATION_MARKER));
    assert!(err.message.len() <= MAX_OUTPUT_BYTES + TRUNCATION_MARKER.len());
}

// ---------------------------------------------------------------------------
// Abandoned calls
// ---------------------------------------------------------------------------

/// Live means present in /proc and not a zombie awaiting reaping.
#[cfg(target_os = "linux")]
fn is_running(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .is_some_and(|(_, rest)| !rest.starts_with('Z')),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn dropped_run_kills_grandchildren() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("grandchild.pid");
    let body = format!("sleep 30 & echo $! > '{}'; wait", pidfile.display());

    let exec = sh(Duration::from_secs(60));
    let args = script(&body);
    let abandoned = tokio::time::timeout(Duration::from_millis(500), exec.run(&args, None, None)).await;
    assert!(abandoned.is_err(), "run should still be pending");

    let pid: i32 = std::fs::read_to_string(&pidfile)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while is_running(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!is_running(pid), "grandchild {pid} outlived the dropped call");
}
