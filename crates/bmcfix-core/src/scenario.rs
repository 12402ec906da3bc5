//! Error-kind classification and the scenario table that conditions the
//! LLM on the class of failure.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chat::Message;

/// Failure classes the scenario table can key on. `Other` carries the raw
/// error-type string for classes without a dedicated scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AssertionFailure,
    DereferenceFailure,
    ArrayBoundsViolated,
    ArithmeticOverflow,
    DivisionByZero,
    MemoryLeak,
    Timeout,
    CompilationError,
    Other(String),
}

impl ErrorKind {
    /// Classify a verifier error-type string.
    pub fn classify(error_type: &str) -> Self {
        let lower = error_type.to_lowercase();
        if lower.contains("array bounds") {
            return Self::ArrayBoundsViolated;
        }
        if lower.contains("dereference failure") || lower.contains("null pointer") {
            return Self::DereferenceFailure;
        }
        if lower.contains("assertion") {
            return Self::AssertionFailure;
        }
        if lower.contains("overflow") {
            return Self::ArithmeticOverflow;
        }
        if lower.contains("division by zero") {
            return Self::DivisionByZero;
        }
        if lower.contains("memory leak") || lower.contains("forgotten memory") {
            return Self::MemoryLeak;
        }
        if lower.contains("timed out") || lower == "timeout" {
            return Self::Timeout;
        }
        if lower.contains("compilation error") || lower.contains("parsing error") {
            return Self::CompilationError;
        }
        Self::Other(error_type.to_string())
    }
}

/// Prompts for one failure class: frozen system context plus the message
/// that opens (and re-opens) each repair turn. Both may use the
/// `{{source_code}}`, `{{esbmc_output}}`, `{{error_line}}` and
/// `{{error_type}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    pub system_messages: Vec<Message>,
    pub initial_message: String,
}

/// Scenario lookup with a mandatory base fallback, so resolution never
/// fails regardless of what the verifier reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioTable {
    base: Scenario,
    overrides: HashMap<ErrorKind, Scenario>,
}

impl ScenarioTable {
    pub fn new(base: Scenario) -> Self {
        Self {
            base,
            overrides: HashMap::new(),
        }
    }

    pub fn with_scenario(mut self, kind: ErrorKind, scenario: Scenario) -> Self {
        self.overrides.insert(kind, scenario);
        self
    }

    pub fn base(&self) -> &Scenario {
        &self.base
    }

    /// The scenario for a failure class, falling back to base.
    pub fn scenario_for(&self, kind: &ErrorKind) -> &Scenario {
        self.overrides.get(kind).unwrap_or(&self.base)
    }

    /// Whether a dedicated scenario exists for this class.
    pub fn has_override(&self, kind: &ErrorKind) -> bool {
        self.overrides.contains_key(kind)
    }
}

impl Default for ScenarioTable {
    /// Generic repair prompts usable with any failure class.
    fn default() -> Self {
        Self::new(Scenario {
            system_messages: vec![Message::system(
                "You are an automated program repair tool for C programs checked \
                 by a bounded model checker. You reply with the complete repaired \
                 source file in a single fenced code block and nothing else.",
            )],
            initial_message: "The following program fails verification with error \
                              `{{error_type}}` at line {{error_line}}.\n\nSource:\n\
                              {{source_code}}\n\nVerifier output:\n{{esbmc_output}}\n\n\
                              Provide the corrected program."
                .to_string(),
        })
    }
}
