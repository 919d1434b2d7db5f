use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use uo_fingerprint::EXPECTATION_FILE;

use crate::workspace::{FilesystemError, copy_tree};

/// The subject exited unsuccessfully. `output` is stdout and stderr as one
/// interleaved text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("subject exited with status {code}. Output:\n{output}")]
pub struct ExecutionError {
    /// Exit status, or -1 when the process was killed by a signal.
    pub code: i32,
    pub output: String,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    #[error("failed to spawn subject {}: {source}", .executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Seed `workspace` with the fixture and remove the expectation document
/// from the copy so the subject never sees it.
pub fn prepare_workspace(workspace: &Path, fixture: &Path) -> Result<usize, FilesystemError> {
    let copied = copy_tree(fixture, workspace)?;
    let expectation = workspace.join(EXPECTATION_FILE);
    fs::remove_file(&expectation).map_err(FilesystemError::at("remove", &expectation))?;
    tracing::debug!(copied, workspace = %workspace.display(), "seeded scratch workspace");
    Ok(copied.saturating_sub(1))
}

/// Run `executable [-c config] workspace` to completion and return its
/// combined output. A non-zero exit becomes [`RunnerError::Execution`].
pub fn invoke_subject(
    executable: &Path,
    config: Option<&Path>,
    workspace: &Path,
) -> Result<String, RunnerError> {
    let spawn_error = |source| RunnerError::Spawn {
        executable: executable.to_path_buf(),
        source,
    };

    // One pipe shared by stdout and stderr keeps the interleaving the
    // subject produced.
    let (mut reader, writer) = io::pipe().map_err(spawn_error)?;
    let mut command = Command::new(executable);
    if let Some(config) = config {
        command.arg("-c").arg(config);
    }
    command
        .arg(workspace)
        .stdin(Stdio::null())
        .stdout(writer.try_clone().map_err(spawn_error)?)
        .stderr(writer);

    let mut child = command.spawn().map_err(spawn_error)?;
    // The command holds the write ends; they must close before reading to EOF.
    drop(command);

    let mut raw = Vec::new();
    let drained = reader.read_to_end(&mut raw);
    let status = child.wait().map_err(spawn_error)?;
    drained.map_err(spawn_error)?;
    let output = String::from_utf8_lossy(&raw).into_owned();

    tracing::debug!(
        executable = %executable.display(),
        status = ?status.code(),
        output_bytes = raw.len(),
        "subject finished"
    );
    if !status.success() {
        return Err(ExecutionError {
            code: status.code().unwrap_or(-1),
            output,
        }
        .into());
    }
    Ok(output)
}

/// Copy the fixture into `workspace` and run the subject on it. After an
/// execution failure the workspace is left as the subject left it.
pub fn run_subject(
    workspace: &Path,
    fixture: &Path,
    executable: &Path,
    config: Option<&Path>,
) -> Result<String, RunnerError> {
    prepare_workspace(workspace, fixture)?;
    invoke_subject(executable, config, workspace)
}
