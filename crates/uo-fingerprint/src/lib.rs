#![forbid(unsafe_code)]

//! Directory fingerprints for unpack-oracle fixtures.
//!
//! A [`Fingerprint`] is a recursive map from entry name to either a nested
//! fingerprint (directories) or a leaf describing a file. In size mode the
//! leaf is the byte length; in content mode it is a lowercase hex digest of
//! the file contents. Fixtures ship a content-mode fingerprint of the
//! expected post-unpack tree as [`EXPECTATION_FILE`].

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved name of the expectation document at the root of every fixture.
pub const EXPECTATION_FILE: &str = "description.json";

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAlgorithm {
    /// BLAKE2b with a 64-byte digest. Used by the reference fixtures.
    #[default]
    Blake2b,
    Sha256,
}

impl DigestAlgorithm {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Blake2b => "blake2b",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of the hex rendering of one digest.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Blake2b => 128,
            Self::Sha256 => 64,
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blake2b" | "blake2b512" => Some(Self::Blake2b),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }

    fn hasher(self) -> ContentHasher {
        match self {
            Self::Blake2b => ContentHasher::Blake2b(<blake2::Blake2b512 as blake2::Digest>::new()),
            Self::Sha256 => ContentHasher::Sha256(<sha2::Sha256 as sha2::Digest>::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintMode {
    /// Leaf = byte length. Fast, but blind to same-length edits.
    Size,
    /// Leaf = hex digest of the full content.
    Content(DigestAlgorithm),
}

impl Default for FingerprintMode {
    fn default() -> Self {
        Self::Content(DigestAlgorithm::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    Size(u64),
    Digest(String),
    Directory(Fingerprint),
}

impl Entry {
    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    #[must_use]
    pub fn as_directory(&self) -> Option<&Fingerprint> {
        match self {
            Self::Directory(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Structural description of a directory tree. Entry order carries no
/// meaning; equality compares the full recursive name set and every leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint {
    entries: BTreeMap<String, Entry>,
}

impl Fingerprint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: Entry) -> Option<Entry> {
        self.entries.insert(name.into(), entry)
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        self.entries.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Number of files anywhere below this level.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.entries
            .values()
            .map(|entry| match entry {
                Entry::Directory(inner) => inner.file_count(),
                _ => 1,
            })
            .sum()
    }

    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Two-space indented JSON, the on-disk form of the expectation document.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl FromIterator<(String, Entry)> for Fingerprint {
    fn from_iter<I: IntoIterator<Item = (String, Entry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("entry name is not valid UTF-8: {}", .path.display())]
    NonUtf8Name { path: PathBuf },
    #[error("neither a regular file nor a directory: {}", .path.display())]
    UnsupportedFileType { path: PathBuf },
    #[error("symlink cycle: {} leads back to an ancestor directory", .path.display())]
    SymlinkCycle { path: PathBuf },
    #[error("invalid expectation document {}: {source}", .path.display())]
    Document {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl FingerprintError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Fingerprint every entry below `root`. Any read failure aborts the whole
/// call; no partial fingerprint is returned.
pub fn fingerprint(root: &Path, mode: FingerprintMode) -> Result<Fingerprint, FingerprintError> {
    let mut walker = Walker {
        mode,
        ancestors: Vec::new(),
    };
    let result = walker.describe_dir(root)?;
    tracing::debug!(
        root = %root.display(),
        mode = ?mode,
        files = result.file_count(),
        "fingerprinted directory"
    );
    Ok(result)
}

pub fn fingerprint_size(root: &Path) -> Result<Fingerprint, FingerprintError> {
    fingerprint(root, FingerprintMode::Size)
}

pub fn fingerprint_content(
    root: &Path,
    algorithm: DigestAlgorithm,
) -> Result<Fingerprint, FingerprintError> {
    fingerprint(root, FingerprintMode::Content(algorithm))
}

/// Fingerprint `root` the way a fixture expectation describes it. A root
/// [`EXPECTATION_FILE`] is left out wherever the new document is written,
/// since the subject's workspace never contains it.
pub fn describe_fixture(
    root: &Path,
    mode: FingerprintMode,
) -> Result<Fingerprint, FingerprintError> {
    let mut description = fingerprint(root, mode)?;
    description.remove(EXPECTATION_FILE);
    Ok(description)
}

struct Walker {
    mode: FingerprintMode,
    // Canonical paths of the directories currently being described.
    ancestors: Vec<PathBuf>,
}

impl Walker {
    fn describe_dir(&mut self, dir: &Path) -> Result<Fingerprint, FingerprintError> {
        let canonical = fs::canonicalize(dir).map_err(FingerprintError::io(dir))?;
        if self.ancestors.contains(&canonical) {
            return Err(FingerprintError::SymlinkCycle {
                path: dir.to_path_buf(),
            });
        }
        self.ancestors.push(canonical);

        let mut description = Fingerprint::new();
        for entry in fs::read_dir(dir).map_err(FingerprintError::io(dir))? {
            let entry = entry.map_err(FingerprintError::io(dir))?;
            let path = entry.path();
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| FingerprintError::NonUtf8Name { path: path.clone() })?;

            // fs::metadata follows symlinks, so a link is described by its target.
            let metadata = fs::metadata(&path).map_err(FingerprintError::io(&path))?;
            let value = if metadata.is_dir() {
                Entry::Directory(self.describe_dir(&path)?)
            } else if metadata.is_file() {
                match self.mode {
                    FingerprintMode::Size => Entry::Size(metadata.len()),
                    FingerprintMode::Content(algorithm) => {
                        Entry::Digest(digest_file(&path, algorithm)?)
                    }
                }
            } else {
                return Err(FingerprintError::UnsupportedFileType { path });
            };
            description.insert(name, value);
        }

        self.ancestors.pop();
        Ok(description)
    }
}

enum ContentHasher {
    Blake2b(blake2::Blake2b512),
    Sha256(sha2::Sha256),
}

impl ContentHasher {
    fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Blake2b(hasher) => blake2::Digest::update(hasher, chunk),
            Self::Sha256(hasher) => sha2::Digest::update(hasher, chunk),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Blake2b(hasher) => hex_encode(&blake2::Digest::finalize(hasher)),
            Self::Sha256(hasher) => hex_encode(&sha2::Digest::finalize(hasher)),
        }
    }
}

/// Lowercase hex rendering of `bytes`.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(hex_digit(byte >> 4));
        out.push(hex_digit(byte & 0x0f));
    }
    out
}

fn hex_digit(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16).unwrap_or('0')
}

/// Stream a file through `algorithm` in fixed-size chunks.
pub fn digest_file(path: &Path, algorithm: DigestAlgorithm) -> Result<String, FingerprintError> {
    let mut file = File::open(path).map_err(FingerprintError::io(path))?;
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0_u8; CHUNK_SIZE];
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(FingerprintError::io(path)(error)),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize_hex())
}

#[must_use]
pub fn digest_bytes(bytes: &[u8], algorithm: DigestAlgorithm) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(bytes);
    hasher.finalize_hex()
}

pub fn load_expectation(path: &Path) -> Result<Fingerprint, FingerprintError> {
    let body = fs::read_to_string(path).map_err(FingerprintError::io(path))?;
    Fingerprint::from_json(&body).map_err(|source| FingerprintError::Document {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_expectation(path: &Path, expected: &Fingerprint) -> Result<(), FingerprintError> {
    let body = expected
        .to_json_pretty()
        .map_err(|source| FingerprintError::Document {
            path: path.to_path_buf(),
            source,
        })?;
    fs::write(path, body).map_err(FingerprintError::io(path))
}
