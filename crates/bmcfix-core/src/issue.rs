//! Typed diagnostics produced by verifier output parsing.
//!
//! The stack trace is the single source of truth for location data: every
//! issue carries at least one trace point, and the derived accessors read
//! the last point, which marks the failure site. Model-checker violations
//! additionally carry a counterexample state trace.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::trace::{CounterexampleProgramTrace, ProgramTrace};

/// Severity of an issue. The derived ordering ranks `Error` highest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A diagnostic with a location trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    /// Error class reported by the producing tool, e.g.
    /// `dereference failure: array bounds violated`.
    pub error_type: String,

    /// Human-readable description.
    pub message: String,

    /// Severity level.
    pub severity: Severity,

    /// Call chain leading to the failure site. Never empty; simple errors
    /// have a single point.
    stack_trace: Vec<ProgramTrace>,
}

impl Issue {
    /// Create an issue. Returns `None` when `stack_trace` is empty, since
    /// an issue without a location is unusable downstream.
    pub fn new(
        error_type: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        stack_trace: Vec<ProgramTrace>,
    ) -> Option<Self> {
        if stack_trace.is_empty() {
            return None;
        }
        Some(Self {
            error_type: error_type.into(),
            message: message.into(),
            severity,
            stack_trace,
        })
    }

    pub fn stack_trace(&self) -> &[ProgramTrace] {
        &self.stack_trace
    }

    fn failure_site(&self) -> &ProgramTrace {
        self.stack_trace.last().expect("stack trace is never empty")
    }

    /// File of the failure site (last trace point).
    pub fn path(&self) -> &Path {
        &self.failure_site().path
    }

    /// Line of the failure site, 0-based.
    pub fn line_idx(&self) -> usize {
        self.failure_site().line_idx
    }

    /// Line of the failure site, 1-based.
    pub fn line_number(&self) -> usize {
        self.line_idx() + 1
    }

    /// Symbol at the failure site, when known.
    pub fn function_name(&self) -> Option<&str> {
        self.failure_site().name.as_deref()
    }

    /// Render the stack trace for prompts and reports, one
    /// `at <fn> in <path>:<line>` entry per line.
    pub fn stack_trace_formatted(&self) -> String {
        self.stack_trace
            .iter()
            .map(|t| {
                format!(
                    "\tat {} in {}:{}",
                    t.name.as_deref().unwrap_or("<unknown>"),
                    t.path.display(),
                    t.line_number()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A model-checker violation: an [`Issue`] plus the counterexample state
/// trace demonstrating it. Only produced by verifiers that emit
/// counterexamples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifierIssue {
    #[serde(flatten)]
    pub issue: Issue,

    /// Program states leading to the violation. Never empty.
    counterexample: Vec<CounterexampleProgramTrace>,
}

impl VerifierIssue {
    /// Create a verifier issue. Returns `None` when `counterexample` is
    /// empty; use a plain [`Issue`] in that case.
    pub fn new(issue: Issue, counterexample: Vec<CounterexampleProgramTrace>) -> Option<Self> {
        if counterexample.is_empty() {
            return None;
        }
        Some(Self {
            issue,
            counterexample,
        })
    }

    pub fn counterexample(&self) -> &[CounterexampleProgramTrace] {
        &self.counterexample
    }

    /// Render the counterexample for prompts, one state per entry with the
    /// assignment indented below when present.
    pub fn counterexample_formatted(&self) -> String {
        let mut lines = Vec::new();
        for state in &self.counterexample {
            lines.push(format!(
                "\tState {}: at {} in {}:{}",
                state.trace.trace_index,
                state.trace.name.as_deref().unwrap_or("<unknown>"),
                state.trace.path.display(),
                state.trace.line_number()
            ));
            if let Some(assignment) = &state.assignment {
                lines.push(format!("\t\t{assignment}"));
            }
        }
        lines.join("\n")
    }
}

/// Closed set of issue shapes a verifier run can produce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputIssue {
    /// Plain diagnostic (compiler error, timeout, generic failure).
    Diagnostic(Issue),

    /// Property violation with counterexample states.
    Violation(VerifierIssue),
}

impl OutputIssue {
    /// Uniform read access to the underlying issue.
    pub fn issue(&self) -> &Issue {
        match self {
            Self::Diagnostic(issue) => issue,
            Self::Violation(violation) => &violation.issue,
        }
    }

    /// The counterexample, when this is a violation.
    pub fn as_violation(&self) -> Option<&VerifierIssue> {
        match self {
            Self::Violation(violation) => Some(violation),
            Self::Diagnostic(_) => None,
        }
    }
}
