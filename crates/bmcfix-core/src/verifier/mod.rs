//! Verifier contract and the typed result of a verification run.

pub mod cache;
pub mod esbmc;
pub mod parse;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::issue::{Issue, OutputIssue};
use crate::solution::{Solution, SolutionError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from running a verifier.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("forbidden verifier parameter: {0} (set it through its own field)")]
    ForbiddenParam(String),

    #[error("verifier exceeded the wall-clock limit of {limit_secs}s")]
    Timeout { limit_secs: u64 },

    #[error("verifier terminated by signal {signal}")]
    Crashed { signal: i32 },

    #[error("solution has no verifiable input files")]
    NoInputFiles,

    #[error(transparent)]
    Solution(#[from] SolutionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VerifierError>;

// ---------------------------------------------------------------------------
// Request / output
// ---------------------------------------------------------------------------

/// Per-run verification parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyRequest {
    /// Extra parameters for the verifier binary. Must not contain the flags
    /// the adapter injects itself.
    pub params: Vec<String>,

    /// Seconds granted to the verifier. The adapter waits an extra slack
    /// window on top so the verifier can terminate gracefully.
    pub timeout_secs: u64,

    /// Entry function to verify from.
    pub entry_function: String,
}

impl Default for VerifyRequest {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            timeout_secs: 60,
            entry_function: "main".to_string(),
        }
    }
}

/// The result of one verifier run. Read-only once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifierOutput {
    /// Exit code: 0 verified, 1 property violated, anything else is a
    /// compilation/tool error.
    pub return_code: i32,

    /// Merged stdout+stderr, UTF-8 (lossy).
    pub output: String,

    /// Parsed issues. Failing runs always carry at least one.
    pub issues: Vec<OutputIssue>,

    /// Wall-clock duration of the run, absent for cache hits.
    pub duration_ms: Option<u64>,
}

impl VerifierOutput {
    /// Whether verification succeeded.
    pub fn successful(&self) -> bool {
        self.return_code == 0
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    /// The issue to address first: highest severity, earliest occurrence
    /// winning ties.
    pub fn primary_issue(&self) -> Option<&Issue> {
        let mut best: Option<&Issue> = None;
        for entry in &self.issues {
            let issue = entry.issue();
            match best {
                Some(current) if issue.severity <= current.severity => {}
                _ => best = Some(issue),
            }
        }
        best
    }

    /// 1-based line of the primary issue.
    pub fn error_line(&self) -> Option<usize> {
        self.primary_issue().map(Issue::line_number)
    }

    /// 0-based line of the primary issue.
    pub fn error_line_idx(&self) -> Option<usize> {
        self.primary_issue().map(Issue::line_idx)
    }

    /// Error class of the primary issue.
    pub fn error_type(&self) -> Option<&str> {
        self.primary_issue().map(|i| i.error_type.as_str())
    }

    /// File of the primary issue.
    pub fn error_file(&self) -> Option<&Path> {
        self.primary_issue().map(Issue::path)
    }
}

// ---------------------------------------------------------------------------
// Verifier trait
// ---------------------------------------------------------------------------

/// A source verifier backend.
///
/// Callers must materialise the solution to disk first; `verify`
/// implementations require `solution.verify_integrity()` to hold.
#[async_trait]
pub trait SourceVerifier: Send + Sync {
    /// Stable component name, used by the registry and for logging.
    fn name(&self) -> &str;

    /// Run the verifier over the solution.
    async fn verify(&self, solution: &Solution, request: &VerifyRequest)
        -> Result<VerifierOutput>;
}

/// Default include-file extensions a C/C++ verifier consumes.
pub const SOURCE_EXTENSIONS: &[&str] = &["c", "cpp", "cc", "cxx"];

/// Fabricate the generic failure issue used when a nonzero run produced no
/// parseable diagnostics.
pub(crate) fn generic_failure_issue(output: &str, fallback_path: &Path) -> Issue {
    use crate::issue::Severity;
    use crate::trace::ProgramTrace;

    let message = output
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("verifier reported failure without diagnostics")
        .trim()
        .to_string();
    Issue::new(
        "Verification Error",
        message,
        Severity::Error,
        vec![ProgramTrace::new(0, fallback_path.to_path_buf(), 0)],
    )
    .expect("single-point trace is non-empty")
}
