#![forbid(unsafe_code)]

//! Fixture-driven conformance runs for an archive unpacking tool.
//!
//! A run resolves the subject executable once, then takes every selected
//! fixture through copy → run → fingerprint → compare, one at a time, each
//! in a fresh scratch workspace.

pub mod compare;
pub mod json_stream;
pub mod locate;
pub mod report;
pub mod runner;
pub mod workspace;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use uo_fingerprint::{DigestAlgorithm, EXPECTATION_FILE, Fingerprint, load_expectation};

pub use compare::{Comparison, EntryDiff, Verdict, compare_fingerprints, compare_workspace, diff};
pub use json_stream::{DecodeError, JsonStream, decode_stacked};
pub use locate::{BuildCommand, BuildResolutionError, find_executable, resolve_executable};
pub use report::{
    CaseResult, CaseStatus, FailureReason, RunHistoryEntry, Stage, SuiteReport,
    append_run_history, render_case_detail, render_case_line, render_status, write_json_report,
};
pub use runner::{ExecutionError, RunnerError, invoke_subject, prepare_workspace, run_subject};
pub use workspace::{FilesystemError, ScratchWorkspace, copy_tree};

pub const DEFAULT_FIXTURE_DIR: &str = "integration";
pub const DEFAULT_SUBJECT_CONFIG: &str = "subject-config.json";
pub const HARNESS_SETTINGS_FILE: &str = "harness.yaml";
pub const DEFAULT_EXCLUDED_DIRS: [&str; 3] = ["__pycache__", ".cache", "target"];

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub repo_root: PathBuf,
    pub fixture_root: PathBuf,
    pub build: BuildCommand,
    /// Skips build resolution when set.
    pub subject: Option<PathBuf>,
    /// Template copied once per run and handed to the subject as `-c`.
    pub subject_config: Option<PathBuf>,
    pub digest: DigestAlgorithm,
    pub excluded_dirs: Vec<String>,
    pub keep_failed: bool,
    pub scratch_parent: Option<PathBuf>,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let fixture_root = repo_root.join(DEFAULT_FIXTURE_DIR);
        Self::with_fixture_root(repo_root, fixture_root)
    }

    #[must_use]
    pub fn with_fixture_root(
        repo_root: impl Into<PathBuf>,
        fixture_root: impl Into<PathBuf>,
    ) -> Self {
        let repo_root = repo_root.into();
        let fixture_root = fixture_root.into();
        let subject_config = Some(fixture_root.join(DEFAULT_SUBJECT_CONFIG))
            .filter(|template| template.is_file());
        Self {
            build: BuildCommand::cargo_json(&repo_root),
            subject: None,
            subject_config,
            digest: DigestAlgorithm::default(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.map(str::to_owned).to_vec(),
            keep_failed: false,
            scratch_parent: None,
            repo_root,
            fixture_root,
        }
    }

    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.fixture_root.join(HARNESS_SETTINGS_FILE)
    }

    /// Apply `<fixture_root>/harness.yaml` when present. Returns whether a
    /// settings file was found.
    pub fn load_settings(&mut self) -> Result<bool, HarnessError> {
        let path = self.settings_path();
        if !path.is_file() {
            return Ok(false);
        }
        let settings: HarnessSettings = serde_yaml::from_str(&fs::read_to_string(&path)?)?;
        self.apply_settings(settings);
        tracing::debug!(path = %path.display(), "applied harness settings");
        Ok(true)
    }

    pub fn apply_settings(&mut self, settings: HarnessSettings) {
        if let Some(mut build) = settings.build {
            if build.working_dir.is_none() {
                build.working_dir = Some(self.repo_root.clone());
            }
            self.build = build;
        }
        if let Some(digest) = settings.digest {
            self.digest = digest;
        }
        if let Some(excluded_dirs) = settings.excluded_dirs {
            self.excluded_dirs = excluded_dirs;
        }
        if let Some(template) = settings.subject_config {
            self.subject_config = Some(self.fixture_root.join(template));
        }
        if let Some(keep_failed) = settings.keep_failed {
            self.keep_failed = keep_failed;
        }
    }
}

/// Contents of `harness.yaml`. Every field is optional; relative paths are
/// resolved against the fixture root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    #[serde(default)]
    pub build: Option<BuildCommand>,
    #[serde(default)]
    pub digest: Option<DigestAlgorithm>,
    #[serde(default)]
    pub excluded_dirs: Option<Vec<String>>,
    #[serde(default)]
    pub subject_config: Option<PathBuf>,
    #[serde(default)]
    pub keep_failed: Option<bool>,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    BuildResolution(#[from] BuildResolutionError),
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    #[error("fixture root does not exist: {}", .0.display())]
    MissingFixtureRoot(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub name: String,
    pub path: PathBuf,
}

impl Fixture {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }

    #[must_use]
    pub fn expectation_path(&self) -> PathBuf {
        self.path.join(EXPECTATION_FILE)
    }
}

/// Every immediate subdirectory of `root` except `excluded`, sorted by name.
pub fn discover_fixtures(root: &Path, excluded: &[String]) -> Result<Vec<Fixture>, HarnessError> {
    if !root.is_dir() {
        return Err(HarnessError::MissingFixtureRoot(root.to_path_buf()));
    }

    let mut fixtures = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let fixture = Fixture::new(path);
        if excluded.iter().any(|name| *name == fixture.name) {
            continue;
        }
        fixtures.push(fixture);
    }
    fixtures.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(fixtures)
}

/// Explicit names win over discovery. A name is taken as a path when that
/// directory exists, otherwise it is looked up under the fixture root. Names
/// that resolve to nothing are kept so the run reports them as errored.
pub fn select_fixtures(
    config: &HarnessConfig,
    names: &[String],
) -> Result<Vec<Fixture>, HarnessError> {
    if names.is_empty() {
        return discover_fixtures(&config.fixture_root, &config.excluded_dirs);
    }
    Ok(names
        .iter()
        .map(|name| {
            let direct = PathBuf::from(name);
            if direct.is_dir() {
                Fixture::new(direct)
            } else {
                Fixture {
                    name: name.clone(),
                    path: config.fixture_root.join(name),
                }
            }
        })
        .collect())
}

/// Progress notifications emitted while a suite runs.
#[derive(Debug, Clone, Copy)]
pub enum SuiteEvent<'a> {
    Started(&'a Fixture),
    Finished(&'a CaseResult),
}

/// Run context: configuration plus the state resolved once per run.
#[derive(Debug)]
pub struct Harness {
    config: HarnessConfig,
    executable: PathBuf,
    subject_config: Option<NamedTempFile>,
}

impl Harness {
    /// Resolve the subject and stage the subject configuration. Fails before
    /// any fixture runs.
    pub fn init(config: HarnessConfig) -> Result<Self, HarnessError> {
        let executable = match &config.subject {
            Some(subject) => subject.clone(),
            None => resolve_executable(&config.build)?,
        };
        let subject_config = config
            .subject_config
            .as_deref()
            .map(stage_subject_config)
            .transpose()?;
        Ok(Self {
            config,
            executable,
            subject_config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    #[must_use]
    pub fn subject_config_path(&self) -> Option<&Path> {
        self.subject_config.as_ref().map(NamedTempFile::path)
    }

    pub fn run_suite(
        &self,
        fixtures: &[Fixture],
        mut observer: impl FnMut(SuiteEvent<'_>),
    ) -> SuiteReport {
        if fixtures.is_empty() {
            tracing::warn!(root = %self.config.fixture_root.display(), "no fixtures selected");
        }

        let mut results = Vec::with_capacity(fixtures.len());
        for fixture in fixtures {
            observer(SuiteEvent::Started(fixture));
            let result = self.run_fixture(fixture);
            observer(SuiteEvent::Finished(&result));
            results.push(result);
        }

        let failed = results.iter().filter(|result| !result.passed()).count();
        SuiteReport {
            suite: self
                .config
                .fixture_root
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "fixtures".to_owned()),
            fixture_root: self.config.fixture_root.clone(),
            executable: self.executable.clone(),
            subject_config: self.config.subject_config.clone(),
            digest: self.config.digest,
            fixture_count: results.len(),
            passed: results.len() - failed,
            failed,
            results,
            generated_unix_ms: report::now_unix_ms(),
        }
    }

    pub fn run_fixture(&self, fixture: &Fixture) -> CaseResult {
        let span = tracing::info_span!("fixture", name = %fixture.name);
        let _entered = span.enter();
        let started = Instant::now();

        let (status, retained_workspace) = self.execute(fixture);
        match &status {
            CaseStatus::Passed => tracing::debug!("passed"),
            CaseStatus::Failed { reason } => tracing::debug!(?reason, "failed"),
        }

        CaseResult {
            fixture: fixture.name.clone(),
            path: fixture.path.clone(),
            status,
            retained_workspace,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn execute(&self, fixture: &Fixture) -> (CaseStatus, Option<PathBuf>) {
        let expected = match load_expectation(&fixture.expectation_path()) {
            Ok(expected) => expected,
            Err(error) => return (CaseStatus::errored(Stage::Expectation, error), None),
        };
        let workspace = match ScratchWorkspace::create_in(self.config.scratch_parent.as_deref()) {
            Ok(workspace) => workspace,
            Err(error) => return (CaseStatus::errored(Stage::Copy, error), None),
        };

        let status = self.drive(fixture, &workspace, &expected);
        if status.is_passed() || !self.config.keep_failed {
            return (status, None);
        }
        let kept = workspace.retain();
        tracing::warn!(path = %kept.display(), "retained workspace of failed fixture");
        (status, Some(kept))
    }

    fn drive(
        &self,
        fixture: &Fixture,
        workspace: &ScratchWorkspace,
        expected: &Fingerprint,
    ) -> CaseStatus {
        tracing::debug!(stage = Stage::Copy.name(), "entering stage");
        if let Err(error) = prepare_workspace(workspace.path(), &fixture.path) {
            return CaseStatus::errored(Stage::Copy, error);
        }

        tracing::debug!(stage = Stage::Run.name(), "entering stage");
        match invoke_subject(&self.executable, self.subject_config_path(), workspace.path()) {
            Ok(_) => {}
            Err(RunnerError::Execution(ExecutionError { code, output })) => {
                return CaseStatus::failed(FailureReason::Execution { code, output });
            }
            Err(error) => return CaseStatus::errored(Stage::Run, error),
        }

        tracing::debug!(stage = Stage::Fingerprint.name(), "entering stage");
        let comparison = match compare_workspace(workspace.path(), expected, self.config.digest) {
            Ok(comparison) => comparison,
            Err(error) => return CaseStatus::errored(Stage::Fingerprint, error),
        };

        tracing::debug!(stage = Stage::Compare.name(), "entering stage");
        match comparison.verdict {
            Verdict::Passed => CaseStatus::Passed,
            Verdict::Failed => CaseStatus::failed(FailureReason::Mismatch {
                diff: diff(expected, &comparison.actual),
                actual: comparison.actual,
            }),
        }
    }
}

fn stage_subject_config(template: &Path) -> Result<NamedTempFile, HarnessError> {
    let staged = tempfile::Builder::new()
        .prefix("uo-subject-config")
        .suffix(".json")
        .tempfile()?;
    fs::copy(template, staged.path()).map_err(FilesystemError::at("copy", template))?;
    tracing::debug!(
        template = %template.display(),
        staged = %staged.path().display(),
        "staged subject configuration"
    );
    Ok(staged)
}

/// INIT, RESOLVE_EXECUTABLE, then every selected fixture in order.
pub fn run_conformance(
    config: HarnessConfig,
    names: &[String],
    observer: impl FnMut(SuiteEvent<'_>),
) -> Result<SuiteReport, HarnessError> {
    let fixtures = select_fixtures(&config, names)?;
    let harness = Harness::init(config)?;
    Ok(harness.run_suite(&fixtures, observer))
}
