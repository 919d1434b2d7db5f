use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::json_stream::{DecodeError, JsonStream};

/// Build invocation whose stdout is a stream of JSON events, one of which
/// names the produced executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl BuildCommand {
    #[must_use]
    pub fn cargo_json(working_dir: &Path) -> Self {
        Self {
            program: "cargo".to_owned(),
            args: vec![
                "build".to_owned(),
                "--quiet".to_owned(),
                "--message-format=json".to_owned(),
            ],
            working_dir: Some(working_dir.to_path_buf()),
        }
    }

    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Error)]
pub enum BuildResolutionError {
    #[error("failed to spawn build command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("build command `{command}` failed: status={status}, stderr={stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("build command `{command}` wrote non UTF-8 output")]
    NonUtf8Output { command: String },
    #[error("build event stream is malformed: {0}")]
    Decode(#[from] DecodeError),
    #[error("no executable found in build output")]
    NoExecutable,
}

/// Run `command` and return the first executable its event stream reports.
pub fn resolve_executable(command: &BuildCommand) -> Result<PathBuf, BuildResolutionError> {
    let rendered = command.display();
    tracing::info!(command = %rendered, "resolving subject executable");

    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &command.working_dir {
        process.current_dir(dir);
    }
    let output = process
        .output()
        .map_err(|source| BuildResolutionError::Spawn {
            command: rendered.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(BuildResolutionError::Failed {
            command: rendered,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let events = String::from_utf8(output.stdout)
        .map_err(|_| BuildResolutionError::NonUtf8Output { command: rendered })?;
    let executable = find_executable(&events)?;
    tracing::info!(executable = %executable.display(), "resolved subject executable");
    Ok(executable)
}

/// Scan a JSON event stream for the first non-empty `"executable"` field.
/// Values after the match are never decoded.
pub fn find_executable(events: &str) -> Result<PathBuf, BuildResolutionError> {
    for event in JsonStream::<Value>::new(events) {
        let event = event?;
        if let Some(path) = event
            .get("executable")
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
        {
            return Ok(PathBuf::from(path));
        }
    }
    Err(BuildResolutionError::NoExecutable)
}
