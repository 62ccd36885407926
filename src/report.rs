//! Per-machine test reports.
//!
//! A report accumulates across the lifecycle of one machine, is delivered
//! once through the notification sink, and is then discarded. Rendering to
//! text follows the webhook's message conventions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::audio::AudioAnalysis;
use crate::analysis::visual::StageComparison;
use crate::surface::ConsoleEvent;

/// How entering the machine went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Entry not attempted yet
    Pending,
    /// Entered and verified in-game
    Success,
    /// Entry attempted and failed
    Failed,
    /// Machine skipped (no profile matched)
    Skipped,
}

/// Outcome status shared by button and bet records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Error,
}

/// One button-response test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonOutcome {
    pub button: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_detected: Option<bool>,
}

/// One bet-simulation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetOutcome {
    pub bet_amount: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Video frame-health outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Unknown,
    Normal,
    Error,
}

/// One stage image-comparison outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<StageComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Audio check outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioOutcome {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AudioAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accumulating record of one machine's test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub url: String,
    pub identifier: String,
    pub machine_type: String,
    pub started_at: DateTime<Utc>,

    pub entry_status: EntryStatus,
    pub console_errors: Vec<ConsoleEvent>,

    pub video_status: VideoStatus,
    pub video_message: String,

    pub button_tests: Vec<ButtonOutcome>,
    pub bet_results: Vec<BetOutcome>,
    pub image_comparisons: Vec<StageOutcome>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioOutcome>,
}

impl TestReport {
    pub fn new(
        url: impl Into<String>,
        identifier: impl Into<String>,
        machine_type: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            identifier: identifier.into(),
            machine_type: machine_type.into(),
            started_at: Utc::now(),
            entry_status: EntryStatus::Pending,
            console_errors: Vec::new(),
            video_status: VideoStatus::Unknown,
            video_message: String::new(),
            button_tests: Vec::new(),
            bet_results: Vec::new(),
            image_comparisons: Vec::new(),
            audio: None,
        }
    }

    /// Record a synthetic error-grade event into the report.
    pub fn record_error(&mut self, kind: &str, text: impl Into<String>) {
        self.console_errors.push(ConsoleEvent::new(kind, text));
    }

    /// Render the report as webhook text.
    pub fn render_text(&self) -> String {
        let mut lines = vec![
            format!("**Machine Test Report** ({})", env!("CARGO_PKG_VERSION")),
            String::new(),
            format!("**URL:** {}", self.url),
            format!("**Machine:** {} ({})", self.identifier, self.machine_type),
            String::new(),
            "---".to_string(),
            String::new(),
        ];

        let entry = match self.entry_status {
            EntryStatus::Pending => "[..] **Entry:** pending",
            EntryStatus::Success => "[OK] **Entry:** success",
            EntryStatus::Failed => "[X] **Entry:** failed",
            EntryStatus::Skipped => "[--] **Entry:** skipped (no matching profile)",
        };
        lines.push(entry.to_string());

        if self.console_errors.is_empty() {
            lines.push("[OK] **Console errors:** none".to_string());
        } else {
            lines.push(String::new());
            lines.push(format!("[!] **Console errors:** {}", self.console_errors.len()));
            for (i, event) in self.console_errors.iter().take(5).enumerate() {
                let text: String = event.text.chars().take(100).collect();
                lines.push(format!("  {}. [{}] {}", i + 1, event.kind, text));
            }
            if self.console_errors.len() > 5 {
                lines.push(format!("  ... {} more", self.console_errors.len() - 5));
            }
        }

        match self.video_status {
            VideoStatus::Normal => lines.push("[OK] **Video:** normal".to_string()),
            VideoStatus::Unknown => lines.push("[..] **Video:** not checked".to_string()),
            VideoStatus::Error => {
                lines.push(format!("[X] **Video:** error - {}", self.video_message));
            }
        }

        if self.button_tests.is_empty() {
            lines.push("[!] **Buttons:** not tested".to_string());
        } else {
            lines.push(String::new());
            lines.push("**Buttons:**".to_string());
            for test in &self.button_tests {
                let mark = match test.status {
                    OutcomeStatus::Success => "[OK]",
                    OutcomeStatus::Failed => "[X]",
                    OutcomeStatus::Error => "[X]",
                };
                let reason = test
                    .reason
                    .as_ref()
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default();
                lines.push(format!("  {} {}{}", mark, test.button, reason));
            }
        }

        if !self.bet_results.is_empty() {
            lines.push(String::new());
            lines.push("**Bets:**".to_string());
            for bet in &self.bet_results {
                let mark = if bet.success { "[OK]" } else { "[X]" };
                lines.push(format!("  {} bet {}", mark, bet.bet_amount));
            }
        }

        if !self.image_comparisons.is_empty() {
            lines.push(String::new());
            lines.push("**Image comparisons:**".to_string());
            for outcome in &self.image_comparisons {
                let mark = if outcome.matched { "[OK]" } else { "[X]" };
                match &outcome.comparison {
                    Some(comparison) => lines.push(format!(
                        "  {} {}: {}/{} matched",
                        mark, outcome.stage, comparison.matched_images, comparison.total_images
                    )),
                    None => lines.push(format!("  {} {}", mark, outcome.stage)),
                }
            }
        }

        if let Some(audio) = &self.audio {
            if audio.passed {
                lines.push("[OK] **Audio:** in spec".to_string());
            } else {
                lines.push("[X] **Audio:** out of spec".to_string());
                if let Some(analysis) = &audio.analysis {
                    for issue in &analysis.issues {
                        lines.push(format!("  - {}", issue));
                    }
                }
                if let Some(error) = &audio.error {
                    lines.push(format!("  - {}", error));
                }
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_report_is_pending() {
        let report = TestReport::new("http://x", "873-JJBX-0004", "JJBX");
        assert_eq!(report.entry_status, EntryStatus::Pending);
        assert_eq!(report.video_status, VideoStatus::Unknown);
        assert!(report.console_errors.is_empty());
    }

    #[test]
    fn test_render_includes_core_sections() {
        let mut report = TestReport::new("http://x", "873-JJBX-0004", "JJBX");
        report.entry_status = EntryStatus::Success;
        report.video_status = VideoStatus::Normal;
        report.button_tests.push(ButtonOutcome {
            button: "SPIN".into(),
            status: OutcomeStatus::Success,
            selector: None,
            reason: None,
            highlight_detected: None,
        });
        let text = report.render_text();
        assert!(text.contains("873-JJBX-0004"));
        assert!(text.contains("**Entry:** success"));
        assert!(text.contains("**Video:** normal"));
        assert!(text.contains("SPIN"));
    }

    #[test]
    fn test_render_truncates_console_errors() {
        let mut report = TestReport::new("http://x", "id", "T");
        for i in 0..8 {
            report.record_error("error", format!("problem {}", i));
        }
        let text = report.render_text();
        assert!(text.contains("**Console errors:** 8"));
        assert!(text.contains("... 3 more"));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = TestReport::new("http://x", "id", "T");
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["entry_status"], "pending");
        assert_eq!(value["video_status"], "unknown");
    }
}
