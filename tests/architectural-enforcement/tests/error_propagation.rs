//! Production code propagates errors instead of panicking
//!
//! `unwrap_or`, `unwrap_or_default` and friends are fine; bare `unwrap()`
//! and `expect(..)` are not.

use architectural_enforcement::{assert_clean, scan, PRODUCTION_DIRS};

fn is_panicking_unwrap(code: &str) -> bool {
    code.contains(".unwrap()") || code.contains(".expect(")
}

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(PRODUCTION_DIRS, is_panicking_unwrap);
    assert_clean("no unwrap()/expect() in production code", &violations);
}

#[test]
fn test_detector_allows_fallbacks() {
    assert!(is_panicking_unwrap("let x = y.unwrap();"));
    assert!(is_panicking_unwrap("let x = y.expect(\"set\");"));
    assert!(!is_panicking_unwrap("let x = y.unwrap_or_default();"));
    assert!(!is_panicking_unwrap("let x = y.unwrap_or(0);"));
}
