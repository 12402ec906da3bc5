//! The repair loop: verify, generate, patch, re-verify, bounded by the
//! attempt budget.
//!
//! One engine instance drives one repair task. Verifier runs and
//! generation turns strictly alternate; per-attempt temp directories are
//! owned here and released in LIFO order at termination. Cancellation is
//! checked between attempts and before each subprocess spawn.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{ChatError, ChatInterface, ChatModel, FinishReason, RetryPolicy};
use crate::generator::{
    GeneratorError, MessageHistory, OutputSlice, SolutionGenerator, SourceFormat, StateUpdate,
};
use crate::scenario::ScenarioTable;
use crate::solution::{Solution, SolutionError, SourceFile};
use crate::verifier::{SourceVerifier, VerifierError, VerifierOutput, VerifyRequest};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Frozen configuration for one repair run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepairConfig {
    /// Maximum generate/patch/verify cycles before giving up.
    pub max_attempts: u32,

    pub message_history: MessageHistory,
    pub source_format: SourceFormat,
    pub output_slice: OutputSlice,

    /// Continue repairing even when the initial verification already
    /// passes.
    pub allow_successful_initial: bool,

    /// Skip the scenario's system messages entirely.
    pub ignore_system_message: bool,

    /// Parameters for the initial verifier run.
    pub verify: VerifyRequest,

    /// Verifier timeout for attempt runs; defaults to the initial timeout.
    pub attempt_timeout_secs: Option<u64>,

    /// Remove per-attempt temp directories at termination.
    pub temp_auto_clean: bool,

    /// Emit a unified diff of (original, repaired) on success.
    pub generate_patches: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            message_history: MessageHistory::default(),
            source_format: SourceFormat::default(),
            output_slice: OutputSlice::default(),
            allow_successful_initial: false,
            ignore_system_message: false,
            verify: VerifyRequest::default(),
            attempt_timeout_secs: None,
            temp_auto_clean: true,
            generate_patches: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal state of a repair run that did not fail fatally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    /// The initial verification already passed; nothing changed.
    AlreadyVerified,

    /// A candidate passed verification.
    Success,

    /// Every attempt failed verification.
    Exhausted,
}

impl RepairOutcome {
    /// Process exit code for CLI consumers. Fatal errors map to 2.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::AlreadyVerified | Self::Success => 0,
            Self::Exhausted => 1,
        }
    }
}

/// Structured result of a repair run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairReport {
    pub run_id: Uuid,
    pub outcome: RepairOutcome,

    /// Attempts actually used.
    pub attempts: u32,

    pub original: Solution,

    /// The repaired solution; for [`RepairOutcome::AlreadyVerified`] it
    /// equals the original.
    pub repaired: Option<Solution>,

    /// Output of the last verifier run.
    pub last_output: Option<VerifierOutput>,

    /// Unified diff of (original, repaired), when patch generation is on.
    pub diff: Option<String>,

    pub finished_at: DateTime<Utc>,
}

impl RepairReport {
    pub fn successful(&self) -> bool {
        matches!(
            self.outcome,
            RepairOutcome::AlreadyVerified | RepairOutcome::Success
        )
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal repair failures. CLI consumers map these to exit code 2.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error(transparent)]
    Verifier(#[from] VerifierError),

    #[error(transparent)]
    Solution(#[from] SolutionError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Generator(GeneratorError),

    #[error("token limit exceeded again after compression")]
    TokenLimitExceeded,

    #[error("repair cancelled")]
    Cancelled,
}

impl From<GeneratorError> for RepairError {
    fn from(error: GeneratorError) -> Self {
        match error {
            GeneratorError::Chat(chat) => Self::Chat(chat),
            other => Self::Generator(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, RepairError>;

// ---------------------------------------------------------------------------
// Temp directory ownership
// ---------------------------------------------------------------------------

/// Engine-owned temp directory guards, released LIFO at termination.
/// On panic the guards drop normally, so directories never leak.
struct TempStack {
    guards: Vec<TempDir>,
    auto_clean: bool,
}

impl TempStack {
    fn new(auto_clean: bool) -> Self {
        Self {
            guards: Vec::new(),
            auto_clean,
        }
    }

    fn push(&mut self, guard: TempDir) {
        self.guards.push(guard);
    }

    #[allow(deprecated)]
    fn finish(&mut self) {
        while let Some(guard) = self.guards.pop() {
            if self.auto_clean {
                debug!(path = %guard.path().display(), "removing attempt temp dir");
                drop(guard);
            } else {
                let kept = guard.into_path();
                info!(path = %kept.display(), "keeping attempt temp dir");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

type SolutionCallback = Box<dyn Fn(&SourceFile) + Send + Sync>;

/// Drives one repair task to a terminal state.
pub struct RepairEngine {
    solution: Solution,
    verifier: Arc<dyn SourceVerifier>,
    model: Arc<dyn ChatModel>,
    scenarios: ScenarioTable,
    config: RepairConfig,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
    on_solution_found: Option<SolutionCallback>,
}

impl RepairEngine {
    pub fn new(
        solution: Solution,
        verifier: Arc<dyn SourceVerifier>,
        model: Arc<dyn ChatModel>,
        scenarios: ScenarioTable,
        config: RepairConfig,
    ) -> Self {
        Self {
            solution,
            verifier,
            model,
            scenarios,
            config,
            retry: RetryPolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            on_solution_found: None,
        }
    }

    /// Transport retry policy for chat requests.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Callback fired with the repaired file on success.
    pub fn on_solution_found(mut self, callback: SolutionCallback) -> Self {
        self.on_solution_found = Some(callback);
        self
    }

    /// Cooperative cancellation flag. Setting it makes the engine stop at
    /// the next attempt boundary or subprocess spawn.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(RepairError::Cancelled);
        }
        Ok(())
    }

    /// Run the repair loop to a terminal state.
    pub async fn run(self) -> Result<RepairReport> {
        let run_id = Uuid::new_v4();
        let mut temps = TempStack::new(self.config.temp_auto_clean);
        let result = self.run_inner(run_id, &mut temps).await;
        temps.finish();
        result
    }

    async fn run_inner(&self, run_id: Uuid, temps: &mut TempStack) -> Result<RepairReport> {
        info!(%run_id, max_attempts = self.config.max_attempts, "starting repair run");

        // Unsaved changes would make the verifier see stale code; force a
        // temp materialisation first.
        let mut working = self.solution.clone();
        if !working.verify_integrity() {
            debug!("solution has unsaved changes, materialising to temp");
            let (saved, guard) = working.save_temp()?;
            temps.push(guard);
            working = saved;
        }

        self.check_cancelled()?;
        let initial = self.verifier.verify(&working, &self.config.verify).await?;
        info!(
            successful = initial.successful(),
            issues = initial.issue_count(),
            "initial verification finished"
        );

        if initial.successful() && !self.config.allow_successful_initial {
            return Ok(self.report(
                run_id,
                RepairOutcome::AlreadyVerified,
                0,
                Some(self.solution.clone()),
                Some(initial),
                None,
            ));
        }

        let first_file = working
            .files()
            .first()
            .ok_or(VerifierError::NoInputFiles)?
            .path()
            .to_path_buf();
        let target_path: PathBuf = initial
            .error_file()
            .and_then(|p| working.resolve(p))
            .map(|f| f.path().to_path_buf())
            .unwrap_or(first_file);
        // Materialised copies live under new roots but keep the relative
        // layout; the relative path is what identifies the target in them.
        let target_rel: PathBuf = match target_path.strip_prefix(working.working_dir()) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => PathBuf::from(
                target_path
                    .file_name()
                    .unwrap_or(target_path.as_os_str()),
            ),
        };
        debug!(target = %target_path.display(), "repair target selected");

        let chat = ChatInterface::new(self.model.clone(), Vec::new())
            .with_retry(self.retry.clone());
        let mut generator = SolutionGenerator::new(
            chat,
            self.scenarios.clone(),
            self.config.message_history,
            self.config.source_format,
            self.config.output_slice,
        )
        .ignore_system_message(self.config.ignore_system_message);

        let attempt_request = VerifyRequest {
            timeout_secs: self
                .config
                .attempt_timeout_secs
                .unwrap_or(self.config.verify.timeout_secs),
            ..self.config.verify.clone()
        };

        let mut source_code = working
            .resolve(&target_path)
            .map(|f| f.content.clone())
            .unwrap_or_default();
        let mut raw_output = initial.output.clone();
        let mut last_output = initial;

        for attempt in 1..=self.config.max_attempts {
            self.check_cancelled()?;

            match generator.update_state(&source_code, &raw_output) {
                Ok(StateUpdate::Clean) => {}
                Ok(StateUpdate::ParseErrorRecovered) => {
                    warn!(attempt, "candidate did not compile; diagnostics become evidence");
                }
                Err(error) => return Err(error.into()),
            }

            let candidate = self.generate_with_compression(&mut generator).await?;

            let mut patched = working.clone();
            patched.set_content(&target_path, candidate.clone())?;
            self.check_cancelled()?;
            let (temp_solution, guard) = patched.save_temp()?;
            temps.push(guard);

            let output = self.verifier.verify(&temp_solution, &attempt_request).await?;
            if output.successful() {
                info!(attempt, "candidate verified successfully");
                if let Some(callback) = &self.on_solution_found {
                    let repaired_path = temp_solution.working_dir().join(&target_rel);
                    if let Some(file) = temp_solution
                        .resolve(&repaired_path)
                        .or_else(|| temp_solution.files().first())
                    {
                        callback(file);
                    }
                }
                let diff = if self.config.generate_patches {
                    Some(working.diff(&temp_solution)?)
                } else {
                    None
                };
                return Ok(self.report(
                    run_id,
                    RepairOutcome::Success,
                    attempt,
                    Some(temp_solution),
                    Some(output),
                    diff,
                ));
            }

            info!(
                attempt,
                max_attempts = self.config.max_attempts,
                "attempt failed, retrying"
            );
            source_code = candidate;
            raw_output = output.output.clone();
            last_output = output;
        }

        Ok(self.report(
            run_id,
            RepairOutcome::Exhausted,
            self.config.max_attempts,
            None,
            Some(last_output),
            None,
        ))
    }

    /// One generation with a single compression retry: a second oversize
    /// reply in the same attempt is fatal.
    async fn generate_with_compression(
        &self,
        generator: &mut SolutionGenerator,
    ) -> Result<String> {
        let (candidate, reason) = generator.generate().await?;
        if reason != FinishReason::Length {
            return Ok(candidate);
        }

        warn!("token limit reached, compressing conversation and retrying once");
        generator.compress();
        let (candidate, reason) = generator.generate().await?;
        if reason == FinishReason::Length {
            return Err(RepairError::TokenLimitExceeded);
        }
        Ok(candidate)
    }

    fn report(
        &self,
        run_id: Uuid,
        outcome: RepairOutcome,
        attempts: u32,
        repaired: Option<Solution>,
        last_output: Option<VerifierOutput>,
        diff: Option<String>,
    ) -> RepairReport {
        RepairReport {
            run_id,
            outcome,
            attempts,
            original: self.solution.clone(),
            repaired,
            last_output,
            diff,
            finished_at: Utc::now(),
        }
    }
}
