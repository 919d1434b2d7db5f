use std::path::Path;

use serde::{Deserialize, Serialize};
use uo_fingerprint::{DigestAlgorithm, Entry, Fingerprint, FingerprintError, fingerprint_content};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
}

/// Outcome of checking a workspace. `actual` is always present so callers
/// can show it whatever the verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub verdict: Verdict,
    pub actual: Fingerprint,
}

pub fn compare_workspace(
    workspace: &Path,
    expected: &Fingerprint,
    algorithm: DigestAlgorithm,
) -> Result<Comparison, FingerprintError> {
    let actual = fingerprint_content(workspace, algorithm)?;
    Ok(Comparison {
        verdict: compare_fingerprints(&actual, expected),
        actual,
    })
}

#[must_use]
pub fn compare_fingerprints(actual: &Fingerprint, expected: &Fingerprint) -> Verdict {
    if actual == expected {
        Verdict::Passed
    } else {
        Verdict::Failed
    }
}

/// One path-level difference, for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryDiff {
    Added { path: String },
    Removed { path: String },
    Changed {
        path: String,
        expected: String,
        actual: String,
    },
}

impl EntryDiff {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Added { path } | Self::Removed { path } | Self::Changed { path, .. } => path,
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Added { path } => format!("+ {path}"),
            Self::Removed { path } => format!("- {path}"),
            Self::Changed {
                path,
                expected,
                actual,
            } => format!("~ {path} (expected {expected}, actual {actual})"),
        }
    }
}

/// Differences between `expected` and `actual`, sorted by path. Entries of a
/// wholly added or removed directory are reported once, at the directory.
#[must_use]
pub fn diff(expected: &Fingerprint, actual: &Fingerprint) -> Vec<EntryDiff> {
    let mut out = Vec::new();
    diff_level("", expected, actual, &mut out);
    out
}

fn diff_level(
    prefix: &str,
    expected: &Fingerprint,
    actual: &Fingerprint,
    out: &mut Vec<EntryDiff>,
) {
    let join = |name: &str| {
        if prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{prefix}/{name}")
        }
    };

    let mut names = expected
        .iter()
        .map(|(name, _)| name)
        .chain(actual.iter().map(|(name, _)| name))
        .collect::<Vec<_>>();
    names.sort_unstable();
    names.dedup();

    for name in names {
        let path = join(name);
        match (expected.get(name), actual.get(name)) {
            (Some(Entry::Directory(want)), Some(Entry::Directory(got))) => {
                diff_level(&path, want, got, out);
            }
            (Some(want), Some(got)) if want != got => out.push(EntryDiff::Changed {
                path,
                expected: describe_entry(want),
                actual: describe_entry(got),
            }),
            (Some(_), Some(_)) => {}
            (Some(_), None) => out.push(EntryDiff::Removed { path }),
            (None, Some(_)) => out.push(EntryDiff::Added { path }),
            (None, None) => {}
        }
    }
}

fn describe_entry(entry: &Entry) -> String {
    match entry {
        Entry::Size(bytes) => format!("{bytes} bytes"),
        Entry::Digest(digest) => digest.chars().take(16).collect(),
        Entry::Directory(_) => "directory".to_owned(),
    }
}
