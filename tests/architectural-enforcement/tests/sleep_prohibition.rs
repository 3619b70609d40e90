//! Production code must not sleep
//!
//! Waiting belongs on I/O, channels, `CancellationToken`s or
//! `tokio::time::timeout`. Tests may sleep.

use architectural_enforcement::{assert_clean, scan, PRODUCTION_DIRS};

fn is_sleep(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(PRODUCTION_DIRS, is_sleep);
    assert_clean("no sleep in production code", &violations);
}

#[test]
fn test_detector_matches_common_forms() {
    assert!(is_sleep("std::thread::sleep(Duration::from_millis(5));"));
    assert!(is_sleep("tokio::time::sleep(d).await;"));
    assert!(!is_sleep("tokio::time::timeout(d, fut).await"));
}
