//! bmcfix core library
//!
//! LLM-augmented automated program repair for C/C++ programs checked by a
//! bounded model checker. The [`engine::RepairEngine`] drives the loop:
//! verify, parse the diagnostics, prompt the model with the evidence,
//! patch, and re-verify until success or the attempt budget runs out.

pub mod chat;
pub mod engine;
pub mod generator;
pub mod issue;
pub mod registry;
pub mod scenario;
pub mod solution;
pub mod telemetry;
pub mod trace;
pub mod verifier;

pub use chat::{
    ChatError, ChatInterface, ChatModel, ChatResponse, FinishReason, Message, RetryPolicy, Role,
};
pub use engine::{RepairConfig, RepairEngine, RepairError, RepairOutcome, RepairReport};
pub use generator::{
    extract_fenced_code, GeneratorError, MessageHistory, OutputSlice, SolutionGenerator,
    SourceFormat, StateUpdate,
};
pub use issue::{Issue, OutputIssue, Severity, VerifierIssue};
pub use registry::VerifierRegistry;
pub use scenario::{ErrorKind, Scenario, ScenarioTable};
pub use solution::{FormatOptions, FormatStyle, Solution, SolutionError, SourceFile};
pub use trace::{CounterexampleProgramTrace, ProgramTrace};
pub use verifier::cache::VerifierCache;
pub use verifier::esbmc::{EsbmcConfig, EsbmcVerifier};
pub use verifier::{SourceVerifier, VerifierError, VerifierOutput, VerifyRequest};

pub use telemetry::init_tracing;

/// bmcfix version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
