use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uo_fingerprint::{DigestAlgorithm, Fingerprint, digest_bytes};

use crate::HarnessError;
use crate::compare::EntryDiff;

/// Orchestrator step a fixture was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Expectation,
    Copy,
    Run,
    Fingerprint,
    Compare,
}

impl Stage {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Expectation => "expectation",
            Self::Copy => "copy",
            Self::Run => "run",
            Self::Fingerprint => "fingerprint",
            Self::Compare => "compare",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The subject exited non-zero; nothing was fingerprinted.
    Execution { code: i32, output: String },
    Mismatch {
        actual: Fingerprint,
        diff: Vec<EntryDiff>,
    },
    /// A harness-side failure (I/O, unreadable expectation, spawn).
    Errored { stage: Stage, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed { reason: FailureReason },
}

impl CaseStatus {
    #[must_use]
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }

    #[must_use]
    pub fn errored(stage: Stage, error: impl std::fmt::Display) -> Self {
        Self::failed(FailureReason::Errored {
            stage,
            message: error.to_string(),
        })
    }

    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub fixture: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: CaseStatus,
    #[serde(default)]
    pub retained_workspace: Option<PathBuf>,
    pub elapsed_ms: u64,
}

impl CaseResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status.is_passed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub fixture_root: PathBuf,
    pub executable: PathBuf,
    pub subject_config: Option<PathBuf>,
    pub digest: DigestAlgorithm,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
    pub generated_unix_ms: u64,
}

impl SuiteReport {
    /// True when no selected fixture failed. An empty selection passes.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub ts_unix_ms: u64,
    pub suite: String,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub failed_fixtures: Vec<String>,
    pub report_hash: String,
}

#[must_use]
pub fn render_case_line(result: &CaseResult) -> String {
    format!("Testing {}...{}", result.fixture, render_status(result))
}

#[must_use]
pub fn render_status(result: &CaseResult) -> &'static str {
    if result.passed() { "PASSED" } else { "FAILED" }
}

/// Verbose-mode text for a failed case: captured subject output, the actual
/// fingerprint with its differences, or the harness error.
#[must_use]
pub fn render_case_detail(result: &CaseResult) -> Option<String> {
    let CaseStatus::Failed { reason } = &result.status else {
        return None;
    };

    let mut text = match reason {
        FailureReason::Execution { code, output } => {
            format!("error: subject exited with status {code}. Output:\n{output}")
        }
        FailureReason::Mismatch { actual, diff } => {
            let mut text = String::from("error: check failed\n");
            text.push_str(
                &actual
                    .to_json_pretty()
                    .unwrap_or_else(|error| format!("<unprintable fingerprint: {error}>")),
            );
            for entry in diff {
                text.push_str("\n  ");
                text.push_str(&entry.render());
            }
            text
        }
        FailureReason::Errored { stage, message } => {
            format!("error: {} stage failed: {message}", stage.name())
        }
    };
    if let Some(path) = &result.retained_workspace {
        text.push_str(&format!("\nworkspace retained at {}", path.display()));
    }
    Some(text)
}

pub fn write_json_report(path: &Path, report: &SuiteReport) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

/// Append one JSONL row summarising `report` to `path`.
pub fn append_run_history(
    path: &Path,
    report: &SuiteReport,
) -> Result<RunHistoryEntry, HarnessError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let report_json = serde_json::to_vec(report)?;
    let entry = RunHistoryEntry {
        ts_unix_ms: now_unix_ms(),
        suite: report.suite.clone(),
        fixture_count: report.fixture_count,
        passed: report.passed,
        failed: report.failed,
        failed_fixtures: report
            .results
            .iter()
            .filter(|result| !result.passed())
            .map(|result| result.fixture.clone())
            .collect(),
        report_hash: format!(
            "sha256:{}",
            digest_bytes(&report_json, DigestAlgorithm::Sha256)
        ),
    };
    writeln!(file, "{}", serde_json::to_string(&entry)?)?;
    Ok(entry)
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
