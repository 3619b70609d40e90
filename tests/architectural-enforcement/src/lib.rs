//! Architectural Enforcement Integration Tests
//!
//! Source scans that enforce rules the compiler cannot:
//! - No sleeping in production code; wait on I/O, channels or tokens
//! - No `unwrap()`/`expect()` in production code; propagate errors
//! - The relay core stays free of sockets and WebSocket libraries
//!
//! "Production code" is every line of a `src/` file before its first
//! `#[cfg(test)]`.

use std::fs;
use std::path::{Path, PathBuf};

/// Source directories scanned, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/daemon/src"];

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The trimmed line
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under the given workspace-relative directories
#[must_use]
pub fn rust_files(dirs: &[&str]) -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in dirs {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Lines of a file up to its first `#[cfg(test)]`, with comments stripped
///
/// Yields `(line_number, code)` pairs.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = line.split("//").next().unwrap_or(line);
        lines.push((idx + 1, code));
    }
    lines
}

/// Scan production code for lines matching `is_violation`
#[must_use]
pub fn scan(dirs: &[&str], is_violation: impl Fn(&str) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in rust_files(dirs) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if is_violation(code) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Panic with a readable report if any violations were found
pub fn assert_clean(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{rule}:");
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!("Found {} violation(s) of: {rule}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_tests() {
        let src = "fn a() {}\n// note\nfn b() { x.unwrap() } // trailing\n#[cfg(test)]\nfn c() {}\n";
        let lines = production_lines(src);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].0, 3);
        assert!(!lines[1].1.contains("trailing"));
    }

    #[test]
    fn test_scanned_dirs_exist() {
        assert!(!rust_files(PRODUCTION_DIRS).is_empty());
    }
}
