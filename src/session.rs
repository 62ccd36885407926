//! Run-artifact session management.
//!
//! Each orchestrated run gets a session directory under a global base
//! location, holding per-machine subdirectories with archived report JSON
//! and screenshots of failed image comparisons. Sessions are cleaned up on
//! drop unless explicitly kept.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::config;
use crate::report::TestReport;

/// A run session with organized artifact management.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep files after the session ends
    pub keep: bool,
}

impl Session {
    /// Create a new session with a unique ID under the configured base dir.
    pub fn new() -> Self {
        let id = generate_session_id();
        let dir = PathBuf::from(config::session_base_dir()).join(&id);
        Self { id, dir, keep: false }
    }

    /// Create a session with a specific name prefix.
    pub fn with_name(name: &str) -> Self {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let id = format!("{}_{}", sanitize_name(name), timestamp);
        let dir = PathBuf::from(config::session_base_dir()).join(&id);
        Self { id, dir, keep: false }
    }

    /// Create a session in a specific directory. User-specified directories
    /// are kept by default.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_session_id);
        Self { id, dir, keep: true }
    }

    /// Set whether to keep files after the session ends.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Initialize the session directory and write run metadata.
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "tool_version": env!("CARGO_PKG_VERSION"),
        });
        fs::write(
            self.dir.join(".session.json"),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    /// Artifact directory for one machine, created on first use.
    pub fn machine_dir(&self, identifier: &str) -> std::io::Result<PathBuf> {
        let dir = self.dir.join(sanitize_name(identifier));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Archive a finished report as pretty JSON under the machine's dir.
    /// Failures are logged, never propagated — archiving is best-effort.
    pub fn archive_report(&self, report: &TestReport) {
        let result = self.machine_dir(&report.identifier).and_then(|dir| {
            let json = serde_json::to_string_pretty(report)?;
            fs::write(dir.join("report.json"), json)
        });
        if let Err(err) = result {
            warn!("[Session] failed to archive report for {}: {}", report.identifier, err);
        }
    }

    /// Save a failed-comparison screenshot. Best-effort.
    pub fn save_failure_screenshot(&self, identifier: &str, stage: &str, png: &[u8]) {
        let result = self
            .machine_dir(identifier)
            .and_then(|dir| fs::write(dir.join(format!("{}_mismatch.png", sanitize_name(stage))), png));
        if let Err(err) = result {
            warn!("[Session] failed to save screenshot for {}/{}: {}", identifier, stage, err);
        }
    }

    /// List archived report files in the session.
    pub fn list_reports(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut reports = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    let report = path.join("report.json");
                    if report.exists() {
                        reports.push(report);
                    }
                }
            }
        }
        reports.sort();
        Ok(reports)
    }

    /// Clean up the session directory.
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// Generate a unique session ID
fn generate_session_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let pid = std::process::id();
    format!("run_{}_{}", timestamp, pid)
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Clean up sessions older than the specified duration.
pub fn cleanup_old_sessions(max_age: std::time::Duration) -> std::io::Result<usize> {
    let base = PathBuf::from(config::session_base_dir());
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(&base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        if let Ok(age) = now.duration_since(modified) {
            if age > max_age && fs::remove_dir_all(&path).is_ok() {
                cleaned += 1;
            }
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_with_name() {
        let session = Session::with_name("qa run");
        assert!(session.id.starts_with("qa_run_"));
        assert!(!session.keep);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("873-JJBX-0004"), "873-JJBX-0004");
        assert_eq!(sanitize_name("a/b c"), "a_b_c");
    }

    #[test]
    fn test_archive_and_list_reports() {
        let base = tempfile::tempdir().unwrap();
        let session = Session::in_dir(base.path().join("run_x"));
        session.init().unwrap();

        let report = TestReport::new("http://x", "873-JJBX-0004", "JJBX");
        session.archive_report(&report);

        let reports = session.list_reports().unwrap();
        assert_eq!(reports.len(), 1);
        let data = fs::read_to_string(&reports[0]).unwrap();
        assert!(data.contains("873-JJBX-0004"));
    }

    #[test]
    fn test_cleanup_removes_unkept_session() {
        let base = tempfile::tempdir().unwrap();
        let mut session = Session::in_dir(base.path().join("run_y"));
        session.keep = false;
        session.init().unwrap();
        assert!(session.dir.exists());
        session.cleanup().unwrap();
        assert!(!session.dir.exists());
        // Drop after cleanup must not panic on the missing directory.
    }
}
