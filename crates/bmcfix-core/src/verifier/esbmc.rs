//! Adapter for the ESBMC bounded model checker.
//!
//! Subprocess contract:
//! `<bin> [params...] --input-file <files...> [-I<dir>...] --timeout <N>s
//! --function <entry>`, run from the solution's working directory with
//! merged stdout+stderr. Exit 0 = verified, 1 = property violated, anything
//! else = compilation/tool error. The subprocess gets the configured
//! timeout; the parent waits an extra slack window and then kills it.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::cache::VerifierCache;
use super::{
    parse, Result, SourceVerifier, VerifierError, VerifierOutput, VerifyRequest,
    SOURCE_EXTENSIONS,
};
use crate::solution::{Solution, SolutionError};

/// Flags the adapter injects itself; callers must not supply them.
const FORBIDDEN_PARAMS: &[&str] = &["--timeout", "--function", "--input-file", "--multi-property"];

/// Extra wall-clock seconds granted on top of the verifier timeout so it
/// can terminate gracefully before being killed.
const TIMEOUT_SLACK_SECS: u64 = 10;

#[cfg(unix)]
const SIGSEGV: i32 = 11;

/// Configuration for the ESBMC adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EsbmcConfig {
    /// Path to the verifier binary.
    pub binary_path: PathBuf,

    /// Default parameters when the request supplies none.
    pub params: Vec<String>,

    /// Whether to consult the content-addressed result cache.
    pub enable_cache: bool,

    /// Directory for persisted cache blobs; `None` keeps the cache
    /// memory-only.
    pub cache_dir: Option<PathBuf>,
}

impl Default for EsbmcConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("esbmc"),
            params: Vec::new(),
            enable_cache: false,
            cache_dir: None,
        }
    }
}

/// The ESBMC verifier adapter.
pub struct EsbmcVerifier {
    config: EsbmcConfig,
    cache: Option<VerifierCache>,
}

impl EsbmcVerifier {
    pub fn new(config: EsbmcConfig) -> std::io::Result<Self> {
        let cache = if config.enable_cache {
            Some(match &config.cache_dir {
                Some(dir) => VerifierCache::with_dir(dir)?,
                None => VerifierCache::in_memory(),
            })
        } else {
            None
        };
        Ok(Self { config, cache })
    }

    fn effective_params<'a>(&'a self, request: &'a VerifyRequest) -> &'a [String] {
        if request.params.is_empty() {
            &self.config.params
        } else {
            &request.params
        }
    }

    fn validate_params(params: &[String]) -> Result<()> {
        for param in params {
            if FORBIDDEN_PARAMS.contains(&param.as_str()) {
                return Err(VerifierError::ForbiddenParam(param.clone()));
            }
        }
        Ok(())
    }

    fn build_command(
        &self,
        solution: &Solution,
        request: &VerifyRequest,
    ) -> Result<tokio::process::Command> {
        let input_files = solution.files_by_extension(SOURCE_EXTENSIONS);
        if input_files.is_empty() {
            return Err(VerifierError::NoInputFiles);
        }

        let mut command = tokio::process::Command::new(&self.config.binary_path);
        command.args(&request.params);
        command.arg("--input-file");
        for file in &input_files {
            command.arg(file.path());
        }
        for dir in solution.include_dirs() {
            command.arg(format!("-I{}", dir.display()));
        }
        command.arg("--timeout");
        command.arg(format!("{}s", request.timeout_secs));
        command.arg("--function");
        command.arg(&request.entry_function);

        command.current_dir(solution.working_dir());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(Stdio::null());
        command.kill_on_drop(true);
        Ok(command)
    }

    async fn run(&self, solution: &Solution, request: &VerifyRequest) -> Result<(i32, String)> {
        let mut command = self.build_command(solution, request)?;
        info!(
            verifier = self.name(),
            timeout_secs = request.timeout_secs,
            entry = %request.entry_function,
            "running verifier"
        );

        let wall_limit = Duration::from_secs(request.timeout_secs + TIMEOUT_SLACK_SECS);
        let child = command.spawn()?;

        // kill_on_drop reaps the child when the wait future is dropped on
        // timeout; partial output is discarded.
        let output = match tokio::time::timeout(wall_limit, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(VerifierError::Timeout {
                    limit_secs: wall_limit.as_secs(),
                })
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if output.status.signal() == Some(SIGSEGV) {
                error!("verifier segfaulted, please report this to its developers");
                return Err(VerifierError::Crashed { signal: SIGSEGV });
            }
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.code().unwrap_or(-1), text))
    }
}

#[async_trait]
impl SourceVerifier for EsbmcVerifier {
    fn name(&self) -> &str {
        "esbmc"
    }

    async fn verify(
        &self,
        solution: &Solution,
        request: &VerifyRequest,
    ) -> Result<VerifierOutput> {
        // Resolve the params once so validation, the cache key and the
        // spawned argv all agree.
        let request = VerifyRequest {
            params: self.effective_params(request).to_vec(),
            ..request.clone()
        };
        let request = &request;
        Self::validate_params(&request.params)?;

        // Verify is never responsible for saving the solution.
        if !solution.verify_integrity() {
            let stale = solution
                .files()
                .iter()
                .filter(|f| !f.verify_integrity())
                .map(|f| f.path().to_path_buf())
                .collect();
            return Err(SolutionError::Integrity(stale).into());
        }

        let cache_key = self
            .cache
            .as_ref()
            .map(|_| VerifierCache::cache_key(solution, request));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(stored) = cache.get(key) {
                debug!(key = %key, "returning cached verifier output");
                return Ok(stored);
            }
        }

        let fallback_path = solution
            .files_by_extension(SOURCE_EXTENSIONS)
            .first()
            .map(|f| f.path().to_path_buf())
            .ok_or(VerifierError::NoInputFiles)?;

        let started = Instant::now();
        let (return_code, text) = self.run(solution, request).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let issues = parse::parse_output(return_code, &text, &fallback_path);
        let output = VerifierOutput {
            return_code,
            output: text,
            issues,
            duration_ms: Some(duration_ms),
        };
        debug!(
            successful = output.successful(),
            return_code,
            issues = output.issue_count(),
            duration_ms,
            "verifier finished"
        );

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            cache.put(key, &output);
        }
        Ok(output)
    }
}
