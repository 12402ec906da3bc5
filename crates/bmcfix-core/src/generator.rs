//! Conversation-driven candidate generation.
//!
//! The generator works in a cycle: `update_state` with the latest source
//! and verifier output, then `generate` for a repair candidate. The
//! scenario table conditions the prompts on the classified failure kind;
//! the history strategy decides how much of the conversation the model
//! sees each turn.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::chat::{ChatError, ChatInterface, FinishReason, Message};
use crate::scenario::{ErrorKind, ScenarioTable};
use crate::solution::SourceFile;
use crate::verifier::parse;

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// How much conversation history the model sees per turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageHistory {
    /// Every turn's user+assistant pair retained.
    #[default]
    Full,
    /// Only the current system + initial prompt is sent; the full history
    /// is still retained for logging.
    LatestOnly,
    /// Conversation reversed before each send (most recent first).
    Reverse,
}

/// How the source code is presented to the model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// The whole file.
    #[default]
    Full,
    /// Only the erroring line; the reply line is patched back in.
    Single,
}

/// Which slice of the raw verifier output is substituted into prompts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputSlice {
    #[default]
    Full,
    ViolatedProperty,
    Counterexample,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("verifier timed out, no usable evidence for repair")]
    VerifierTimeout,

    #[error("error line not found in verifier output")]
    ErrorLineNotFound,

    #[error("verifier output has no {0} section")]
    MissingSection(&'static str),

    #[error("update_state must be called before generate")]
    StateNotSet,

    #[error(transparent)]
    Chat(#[from] ChatError),
}

pub type Result<T> = std::result::Result<T, GeneratorError>;

/// What `update_state` made of the verifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    /// Output parsed into the requested slice.
    Clean,
    /// The verifier reported a source parse error; the raw diagnostics
    /// became the prompt evidence instead of the requested slice.
    ParseErrorRecovered,
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

struct RepairState {
    source_raw: String,
    source_formatted: String,
    evidence: String,
    error_type: Option<String>,
    scenario_kind: Option<ErrorKind>,
}

/// Generates repair candidates from verifier evidence.
pub struct SolutionGenerator {
    chat: ChatInterface,
    scenarios: ScenarioTable,
    history: MessageHistory,
    source_format: SourceFormat,
    output_slice: OutputSlice,
    ignore_system_message: bool,
    state: Option<RepairState>,
    invocations: u32,
}

impl SolutionGenerator {
    pub fn new(
        chat: ChatInterface,
        scenarios: ScenarioTable,
        history: MessageHistory,
        source_format: SourceFormat,
        output_slice: OutputSlice,
    ) -> Self {
        Self {
            chat,
            scenarios,
            history,
            source_format,
            output_slice,
            ignore_system_message: false,
            state: None,
            invocations: 0,
        }
    }

    pub fn ignore_system_message(mut self, ignore: bool) -> Self {
        self.ignore_system_message = ignore;
        self
    }

    /// The retained conversation, for logging and inspection.
    pub fn messages(&self) -> &[Message] {
        self.chat.messages()
    }

    pub fn invocations(&self) -> u32 {
        self.invocations
    }

    /// Reset the conversation. Code cannot be summarised, so compression
    /// starts the conversation over from the currently set state.
    pub fn compress(&mut self) {
        debug!("compressing generator conversation by reset");
        self.chat.clear_messages();
        self.chat.set_system_messages(Vec::new());
        self.invocations = 0;
    }

    /// Set the current repair inputs and classify the failure scenario.
    ///
    /// A timeout in the output is fatal; a source parse error is recovered
    /// locally by using the raw diagnostics as evidence.
    pub fn update_state(&mut self, source_code: &str, verifier_output: &str) -> Result<StateUpdate> {
        if verifier_output.contains(parse::TIMEOUT_MARKER) {
            return Err(GeneratorError::VerifierTimeout);
        }

        let (evidence, update, parse_error) =
            if verifier_output.contains(parse::PARSE_ERROR_MARKER) {
                // Compiler diagnostics are small, keep them whole.
                (
                    verifier_output.to_string(),
                    StateUpdate::ParseErrorRecovered,
                    true,
                )
            } else {
                let sliced = match self.output_slice {
                    OutputSlice::Full => verifier_output.to_string(),
                    OutputSlice::ViolatedProperty => parse::violated_property(verifier_output)
                        .ok_or(GeneratorError::MissingSection("violated property"))?,
                    OutputSlice::Counterexample => parse::counterexample(verifier_output)
                        .ok_or(GeneratorError::MissingSection("counterexample"))?
                        .to_string(),
                };
                (sliced, StateUpdate::Clean, false)
            };

        let error_type = if parse_error {
            Some(parse::COMPILATION_ERROR_TYPE.to_string())
        } else {
            parse::error_type(verifier_output)
        };
        let scenario_kind = error_type.as_deref().map(ErrorKind::classify);
        if let Some(kind) = &scenario_kind {
            debug!(
                ?kind,
                dedicated = self.scenarios.has_override(kind),
                "classified failure scenario"
            );
        }

        let source_formatted = match self.source_format {
            SourceFormat::Full => source_code.to_string(),
            SourceFormat::Single => {
                let idx =
                    parse::error_line_idx(&evidence).ok_or(GeneratorError::ErrorLineNotFound)?;
                source_code
                    .lines()
                    .nth(idx)
                    .ok_or(GeneratorError::ErrorLineNotFound)?
                    .to_string()
            }
        };

        self.state = Some(RepairState {
            source_raw: source_code.to_string(),
            source_formatted,
            evidence,
            error_type,
            scenario_kind,
        });
        Ok(update)
    }

    /// Prompt the model for a repair candidate.
    ///
    /// Regardless of the history strategy, the retained conversation grows
    /// by exactly one user and one assistant message per call. A
    /// [`FinishReason::Length`] reply is handed back for the caller to
    /// decide between compression and giving up.
    pub async fn generate(&mut self) -> Result<(String, FinishReason)> {
        if self.state.is_none() {
            return Err(GeneratorError::StateNotSet);
        }

        match self.history {
            MessageHistory::Full => self.generate_once(false).await,
            MessageHistory::LatestOnly => {
                // Stash the conversation so the model only sees the current
                // state, then append the new turn to the stash.
                let mut stashed = self.chat.replace_messages(Vec::new());
                let result = self.generate_once(false).await;
                let turn = self.chat.replace_messages(Vec::new());
                stashed.extend(turn);
                self.chat.replace_messages(stashed);
                result
            }
            MessageHistory::Reverse => self.generate_once(true).await,
        }
    }

    async fn generate_once(&mut self, reverse: bool) -> Result<(String, FinishReason)> {
        let state = self.state.as_ref().expect("state checked by generate");
        let scenario = match &state.scenario_kind {
            Some(kind) => self.scenarios.scenario_for(kind),
            None => self.scenarios.base(),
        };

        if self.invocations == 0 && !self.ignore_system_message {
            self.chat
                .set_system_messages(scenario.system_messages.clone());
        }
        self.chat
            .push_message(Message::user(scenario.initial_message.clone()));
        self.invocations += 1;

        let error_line = parse::error_line(&state.evidence)
            .map(|l| l.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let error_type = state
            .error_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let vars = crate::chat::template::vars([
            ("source_code", state.source_formatted.as_str()),
            ("esbmc_output", state.evidence.as_str()),
            ("error_line", error_line.as_str()),
            ("error_type", error_type.as_str()),
        ]);
        self.chat.apply_template(&vars);

        let response = if reverse {
            // Most recent first for the model; the retained conversation
            // stays chronological with the reply appended.
            let chronological = self.chat.messages().to_vec();
            self.chat.reverse_messages();
            let response = self.chat.send(None).await;
            let mut restored = chronological;
            if let Ok(resp) = &response {
                restored.push(resp.message.clone());
            }
            self.chat.replace_messages(restored);
            response?
        } else {
            self.chat.send(None).await?
        };

        if response.finish_reason == FinishReason::Length {
            warn!("reply exceeded the token limit");
            return Ok((String::new(), FinishReason::Length));
        }

        let mut candidate = extract_fenced_code(&response.message.content).to_string();

        // A single-line prompt yields a single-line reply; put it back into
        // the full source at the reported line.
        if self.source_format == SourceFormat::Single {
            let state = self.state.as_ref().expect("state checked by generate");
            let idx =
                parse::error_line_idx(&state.evidence).ok_or(GeneratorError::ErrorLineNotFound)?;
            candidate = SourceFile::apply_line_patch(&state.source_raw, &candidate, idx, idx);
        }

        Ok((candidate, FinishReason::Stop))
    }
}

// ---------------------------------------------------------------------------
// Code extraction
// ---------------------------------------------------------------------------

/// Strip a reply down to its fenced code block: from the first triple
/// backtick, past the language tag line, up to the last triple backtick.
/// Replies without a well-formed block are returned unchanged.
pub fn extract_fenced_code(reply: &str) -> &str {
    let Some(open) = reply.find("```") else {
        return reply;
    };
    let Some(newline) = reply[open..].find('\n') else {
        return reply;
    };
    let start = open + newline + 1;
    let Some(close) = reply.rfind("```") else {
        return reply;
    };
    if close < start {
        return reply;
    }
    // Exclude the newline before the closing fence when there is one.
    let end = if reply[..close].ends_with('\n') {
        close - 1
    } else {
        close
    };
    if end < start {
        return "";
    }
    &reply[start..end]
}
