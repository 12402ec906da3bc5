//! The program under repair: source files, include directories, disk
//! materialisation, and diff/patch plumbing.
//!
//! A [`Solution`] owns the authoritative in-memory copy of every file.
//! Content may diverge from disk until saved; [`Solution::verify_integrity`]
//! tells whether the on-disk state matches, which verifiers require before
//! they are run.

pub mod format;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;
use tracing::{debug, info};

pub use format::{FormatOptions, FormatStyle};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from solution and source file operations.
#[derive(Debug, Error)]
pub enum SolutionError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("path is not a file: {0}")]
    NotAFile(PathBuf),

    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("duplicate file in solution: {0}")]
    DuplicateFile(PathBuf),

    #[error("file is not part of the solution: {0}")]
    UnknownFile(PathBuf),

    #[error("unsaved changes on disk, save the solution first: {0:?}")]
    Integrity(Vec<PathBuf>),

    #[error("diff failed (exit 2): {output}")]
    DiffFailed { output: String },

    #[error("patch applied partially (exit 1)\npatch:\n{patch}\noutput:\n{output}")]
    PartialPatch { patch: String, output: String },

    #[error("patch failed (exit 2)\npatch:\n{patch}\noutput:\n{output}")]
    PatchFailed { patch: String, output: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SolutionError>;

// ---------------------------------------------------------------------------
// SourceFile
// ---------------------------------------------------------------------------

/// A source file: absolute path plus the authoritative in-memory content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFile {
    path: PathBuf,
    pub content: String,
}

impl SourceFile {
    /// Create a source file from a path and content. Relative paths are
    /// resolved against the current directory.
    pub fn new(path: impl AsRef<Path>, content: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: absolutize(path.as_ref())?,
            content: content.into(),
        })
    }

    /// Load a source file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let abs = absolutize(path.as_ref())?;
        let content = fs::read_to_string(&abs).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SolutionError::NotFound(abs.clone())
            } else {
                SolutionError::Io(e)
            }
        })?;
        Ok(Self { path: abs, content })
    }

    /// Absolute path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File extension without the dot, empty when there is none.
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
    }

    /// Total number of lines.
    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }

    /// Replace lines `[start, end]` (inclusive, 0-based) with `patch`.
    /// Single-line replacement uses `start == end`. The dominant line-ending
    /// style and the presence of a trailing newline are preserved.
    ///
    /// # Panics
    /// Panics when `start > end`; that is a caller bug.
    pub fn apply_line_patch(source: &str, patch: &str, start: usize, end: usize) -> String {
        assert!(
            start <= end,
            "start ({start}) must be less than or equal to end ({end})"
        );
        let eol = if source.contains("\r\n") { "\r\n" } else { "\n" };
        let lines: Vec<&str> = source.lines().collect();

        let mut result: Vec<&str> = Vec::with_capacity(lines.len() + 1);
        result.extend(&lines[..start.min(lines.len())]);
        result.push(patch);
        if end + 1 < lines.len() {
            result.extend(&lines[end + 1..]);
        }

        let mut patched = result.join(eol);
        if source.ends_with('\n') {
            patched.push_str(eol);
        }
        patched
    }

    /// Write the in-memory content to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &self.content)?;
        Ok(())
    }

    /// Write the in-memory content back to the file's own path.
    pub fn save(&self) -> Result<()> {
        let path = self.path.clone();
        self.save_to(&path)
    }

    /// Whether the in-memory content matches the bytes on disk.
    pub fn verify_integrity(&self) -> bool {
        match fs::read_to_string(&self.path) {
            Ok(on_disk) => on_disk == self.content,
            Err(_) => false,
        }
    }

    /// Unified diff from `original` to `self` via the external `diff` tool.
    /// Exit code 2 is fatal; 0 and 1 (identical / different) both succeed.
    pub fn diff(&self, original: &SourceFile) -> Result<String> {
        let mut ours = NamedTempFile::new()?;
        ours.write_all(self.content.as_bytes())?;
        ours.flush()?;
        let mut theirs = NamedTempFile::new()?;
        theirs.write_all(original.content.as_bytes())?;
        theirs.flush()?;

        let output = Command::new("diff")
            .arg("-u")
            .arg("--label")
            .arg(original.path.as_os_str())
            .arg("--label")
            .arg(self.path.as_os_str())
            .arg(theirs.path())
            .arg(ours.path())
            .output()?;

        let text = merged_output(&output);
        if output.status.code() == Some(2) {
            return Err(SolutionError::DiffFailed { output: text });
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Solution
// ---------------------------------------------------------------------------

/// An ordered collection of source files plus include directories.
///
/// Structurally immutable after construction: files can change content, but
/// the file set and include set are fixed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Solution {
    files: Vec<SourceFile>,
    include_dirs: Vec<PathBuf>,
}

impl Solution {
    /// Build a solution from already-loaded files. Enforces unique absolute
    /// file paths; include directories must exist and are deduplicated
    /// preserving first occurrence.
    pub fn new(files: Vec<SourceFile>, include_dirs: Vec<PathBuf>) -> Result<Self> {
        let mut seen: Vec<&Path> = Vec::with_capacity(files.len());
        for file in &files {
            if seen.contains(&file.path()) {
                return Err(SolutionError::DuplicateFile(file.path().to_path_buf()));
            }
            seen.push(file.path());
        }

        let mut dirs: Vec<PathBuf> = Vec::with_capacity(include_dirs.len());
        for dir in include_dirs {
            let abs = absolutize(&dir)?;
            if !abs.is_dir() {
                return Err(SolutionError::NotADirectory(abs));
            }
            if !dirs.contains(&abs) {
                dirs.push(abs);
            }
        }

        Ok(Self {
            files,
            include_dirs: dirs,
        })
    }

    /// Load a solution from files and/or directories on disk. Directories
    /// are scanned recursively.
    pub fn from_paths(paths: &[PathBuf], include_dirs: Vec<PathBuf>) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            let abs = absolutize(path)?;
            if abs.is_file() {
                files.push(SourceFile::load(&abs)?);
            } else if abs.is_dir() {
                for file_path in collect_files(&abs)? {
                    files.push(SourceFile::load(&file_path)?);
                }
            } else {
                return Err(SolutionError::NotAFile(abs));
            }
        }
        Self::new(files, include_dirs)
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    /// Files whose extension (dot-stripped) is in `extensions`.
    pub fn files_by_extension(&self, extensions: &[&str]) -> Vec<&SourceFile> {
        self.files
            .iter()
            .filter(|f| extensions.contains(&f.extension()))
            .collect()
    }

    /// Common parent directory of all files. Single file: its parent.
    /// No files: the current directory.
    pub fn working_dir(&self) -> PathBuf {
        let mut paths = self.files.iter().map(|f| f.path());
        let Some(first) = paths.next() else {
            return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        };
        let mut common = first.parent().unwrap_or(first).to_path_buf();
        for path in paths {
            while !path.starts_with(&common) {
                let Some(parent) = common.parent() else { break };
                common = parent.to_path_buf();
            }
        }
        common
    }

    /// Find a file by absolute or relative path.
    pub fn resolve(&self, path: &Path) -> Option<&SourceFile> {
        let abs = absolutize(path).ok()?;
        self.files.iter().find(|f| f.path() == abs)
    }

    /// Whether a path is part of this solution.
    pub fn contains(&self, path: &Path) -> bool {
        self.resolve(path).is_some()
    }

    /// Replace the in-memory content of one file.
    pub fn set_content(&mut self, path: &Path, content: String) -> Result<()> {
        let abs = absolutize(path)?;
        let file = self
            .files
            .iter_mut()
            .find(|f| f.path() == abs)
            .ok_or(SolutionError::UnknownFile(abs))?;
        file.content = content;
        Ok(())
    }

    /// Whether every file's in-memory content matches the disk.
    pub fn verify_integrity(&self) -> bool {
        self.files.iter().all(|f| f.verify_integrity())
    }

    fn stale_files(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| !f.verify_integrity())
            .map(|f| f.path().to_path_buf())
            .collect()
    }

    /// Materialise the solution under `dest`, preserving layout relative to
    /// the working directory. Include directories inside the working dir
    /// keep their relative structure; ones outside (e.g. `/usr/include`) are
    /// copied by basename so header resolution stays stable.
    pub fn save_to(&self, dest: &Path) -> Result<Solution> {
        info!(dest = %dest.display(), "saving solution");
        let dest = absolutize(dest)?;
        fs::create_dir_all(&dest)?;

        let working_dir = self.working_dir();

        let mut new_files = Vec::with_capacity(self.files.len());
        for file in &self.files {
            // Every file path starts with the common ancestor; fall back to
            // the basename just in case.
            let relative: PathBuf = match file.path().strip_prefix(&working_dir) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => PathBuf::from(file.path().file_name().unwrap_or(file.path().as_os_str())),
            };
            let new_path = dest.join(relative);
            file.save_to(&new_path)?;
            new_files.push(SourceFile::new(&new_path, file.content.clone())?);
        }

        let mut new_dirs = Vec::with_capacity(self.include_dirs.len());
        for dir in &self.include_dirs {
            let new_dir = match dir.strip_prefix(&working_dir) {
                Ok(relative) => dest.join(relative),
                Err(_) => dest.join(dir.file_name().unwrap_or(dir.as_os_str())),
            };
            copy_dir_recursive(dir, &new_dir)?;
            new_dirs.push(new_dir);
        }

        Solution::new(new_files, new_dirs)
    }

    /// Materialise under a fresh temporary directory. The guard keeps the
    /// directory alive; dropping it removes the tree.
    pub fn save_temp(&self) -> Result<(Solution, TempDir)> {
        let temp = tempfile::Builder::new().prefix("bmcfix-").tempdir()?;
        let saved = self.save_to(temp.path())?;
        Ok((saved, temp))
    }

    /// Recursive unified diff from `self` to `other` via `diff -ruN` over
    /// the two working directories. Requires both solutions on disk.
    pub fn diff(&self, other: &Solution) -> Result<String> {
        for solution in [self, other] {
            if !solution.verify_integrity() {
                return Err(SolutionError::Integrity(solution.stale_files()));
            }
        }

        let output = Command::new("diff")
            .arg("-ruN")
            .arg(self.working_dir())
            .arg(other.working_dir())
            .output()?;

        let text = merged_output(&output);
        if output.status.code() == Some(2) {
            return Err(SolutionError::DiffFailed { output: text });
        }
        Ok(text)
    }

    /// Apply a unified diff with the external `patch` tool, run from the
    /// working directory. Exit 1 means some hunks did not apply; exit 2 is
    /// serious trouble. Requires the solution on disk.
    pub fn apply_patch(&self, patch: &str) -> Result<()> {
        if !self.verify_integrity() {
            return Err(SolutionError::Integrity(self.stale_files()));
        }

        let mut patch_file = NamedTempFile::new()?;
        patch_file.write_all(patch.as_bytes())?;
        patch_file.flush()?;

        let output = Command::new("patch")
            .arg("-d")
            .arg(self.working_dir())
            .arg("-i")
            .arg(patch_file.path())
            .output()?;

        let text = merged_output(&output);
        debug!(exit = ?output.status.code(), "patch finished");
        match output.status.code() {
            Some(1) => Err(SolutionError::PartialPatch {
                patch: patch.to_string(),
                output: text,
            }),
            Some(2) => Err(SolutionError::PatchFailed {
                patch: patch.to_string(),
                output: text,
            }),
            _ => Ok(()),
        }
    }

    /// Combine two solutions: files concatenated, include dirs set-union.
    pub fn combine(&self, other: &Solution) -> Result<Solution> {
        let files = self
            .files
            .iter()
            .chain(other.files.iter())
            .cloned()
            .collect();
        let dirs = self
            .include_dirs
            .iter()
            .chain(other.include_dirs.iter())
            .cloned()
            .collect();
        Solution::new(files, dirs)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn absolutize(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        let path = entry.path();
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

fn merged_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}
