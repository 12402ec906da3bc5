//! Program trace points referenced by diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One point in a program trace (stack trace or counterexample).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgramTrace {
    /// Position of this point within its trace.
    pub trace_index: usize,

    /// Source file of the trace point. May be a system file outside the
    /// solution, or a file that no longer exists for compilation errors.
    pub path: PathBuf,

    /// Symbol the trace points at, when the verifier reports one.
    pub name: Option<String>,

    /// Line of the trace point (0-based).
    pub line_idx: usize,
}

impl ProgramTrace {
    /// Create a trace point without a symbol name.
    pub fn new(trace_index: usize, path: impl Into<PathBuf>, line_idx: usize) -> Self {
        Self {
            trace_index,
            path: path.into(),
            name: None,
            line_idx,
        }
    }

    /// Attach the symbol name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Line number of the trace point (1-based).
    pub fn line_number(&self) -> usize {
        self.line_idx + 1
    }
}

/// Trace point enriched with the variable assignment of a counterexample
/// state, e.g. `dist[0] = 2147483647 (01111111 ...)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterexampleProgramTrace {
    #[serde(flatten)]
    pub trace: ProgramTrace,

    /// Assignment recorded at this state, when the state carries one.
    pub assignment: Option<String>,
}

impl CounterexampleProgramTrace {
    pub fn new(trace: ProgramTrace, assignment: Option<String>) -> Self {
        Self { trace, assignment }
    }
}
