//! bmcfix - LLM-augmented program repair driven by a bounded model checker.
//!
//! ## Exit codes
//!
//! - 0: repaired (or the program already verified)
//! - 1: attempt budget exhausted without a repair
//! - 2: fatal error (forbidden params, verifier timeout/crash, transport
//!   failure, token limit after compression)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use bmcfix_core::chat::http::{HttpChatConfig, HttpChatModel};
use bmcfix_core::{
    EsbmcConfig, EsbmcVerifier, MessageHistory, OutputSlice, RepairConfig, RepairEngine,
    RepairOutcome, RepairReport, ScenarioTable, Solution, SourceFormat, VerifierRegistry,
    VerifyRequest,
};

#[derive(Parser)]
#[command(name = "bmcfix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automated program repair for C/C++ via a bounded model checker and an LLM", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair a program that fails verification
    Fix(FixArgs),
}

#[derive(clap::Args)]
struct FixArgs {
    /// Source files or directories to repair
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Include directories passed to the verifier
    #[arg(short = 'I', long = "include-dir")]
    include_dirs: Vec<PathBuf>,

    /// Path to the verifier binary
    #[arg(long, default_value = "esbmc")]
    verifier_path: PathBuf,

    /// Extra verifier parameters (repeatable)
    #[arg(long = "param")]
    params: Vec<String>,

    /// Entry function to verify from
    #[arg(long, default_value = "main")]
    function: String,

    /// Verifier timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Verifier timeout for repair attempts (defaults to --timeout)
    #[arg(long)]
    attempt_timeout: Option<u64>,

    /// Maximum repair attempts
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Message history strategy
    #[arg(long, value_enum, default_value = "full")]
    history: HistoryArg,

    /// How source code is shown to the model
    #[arg(long, value_enum, default_value = "full")]
    source_format: SourceFormatArg,

    /// Which verifier output slice is shown to the model
    #[arg(long, value_enum, default_value = "full")]
    output_format: OutputFormatArg,

    /// Keep repairing even when the initial verification passes
    #[arg(long)]
    allow_successful_initial: bool,

    /// Print a unified diff of the repair
    #[arg(long)]
    generate_patches: bool,

    /// Keep per-attempt temp directories for inspection
    #[arg(long)]
    keep_temps: bool,

    /// Enable the content-addressed verifier result cache
    #[arg(long)]
    enable_cache: bool,

    /// Directory for persisted cache blobs
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Chat completions endpoint
    #[arg(long, default_value = "https://api.openai.com/v1/chat/completions")]
    endpoint: String,

    /// Model identifier
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Environment variable holding the API key
    #[arg(long, default_value = "OPENAI_API_KEY")]
    api_key_env: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 1.0)]
    temperature: f32,

    /// Model context window in tokens
    #[arg(long, default_value_t = 16_384)]
    token_limit: usize,

    /// Per-request timeout in seconds for the model transport
    #[arg(long, default_value_t = 120)]
    request_timeout: u64,

    /// Maximum outbound calls per chat request before giving up
    #[arg(long, default_value_t = 3)]
    requests_max_tries: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum HistoryArg {
    Full,
    Latest,
    Reverse,
}

impl From<HistoryArg> for MessageHistory {
    fn from(arg: HistoryArg) -> Self {
        match arg {
            HistoryArg::Full => Self::Full,
            HistoryArg::Latest => Self::LatestOnly,
            HistoryArg::Reverse => Self::Reverse,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceFormatArg {
    Full,
    Single,
}

impl From<SourceFormatArg> for SourceFormat {
    fn from(arg: SourceFormatArg) -> Self {
        match arg {
            SourceFormatArg::Full => Self::Full,
            SourceFormatArg::Single => Self::Single,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormatArg {
    Full,
    /// Violated property block only
    Vp,
    /// Counterexample section only
    Ce,
}

impl From<OutputFormatArg> for OutputSlice {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Full => Self::Full,
            OutputFormatArg::Vp => Self::ViolatedProperty,
            OutputFormatArg::Ce => Self::Counterexample,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    bmcfix_core::init_tracing(cli.json, cli.verbose);

    let code = match cli.command {
        Commands::Fix(args) => run_fix(args).await,
    };
    std::process::exit(code);
}

async fn run_fix(args: FixArgs) -> i32 {
    match fix(args).await {
        Ok(report) => {
            print_report(&report);
            report.outcome.exit_code()
        }
        Err(error) => {
            eprintln!("bmcfix: fatal: {error:#}");
            2
        }
    }
}

async fn fix(args: FixArgs) -> anyhow::Result<RepairReport> {
    let solution = Solution::from_paths(&args.paths, args.include_dirs.clone())
        .context("loading solution")?;
    info!(files = solution.files().len(), "solution loaded");

    let mut registry = VerifierRegistry::new();
    registry.register(Arc::new(
        EsbmcVerifier::new(EsbmcConfig {
            binary_path: args.verifier_path.clone(),
            params: args.params.clone(),
            enable_cache: args.enable_cache,
            cache_dir: args.cache_dir.clone(),
        })
        .context("constructing verifier")?,
    ));
    let verifier = registry
        .get("esbmc")
        .context("verifier not registered")?;

    let api_key = std::env::var(&args.api_key_env).ok();
    let model = Arc::new(
        HttpChatModel::new(HttpChatConfig {
            endpoint: args.endpoint.clone(),
            api_key,
            model_id: args.model.clone(),
            temperature: args.temperature,
            token_limit: args.token_limit,
            request_timeout: Duration::from_secs(args.request_timeout),
        })
        .context("constructing chat model")?,
    );

    let config = RepairConfig {
        max_attempts: args.max_attempts,
        message_history: args.history.into(),
        source_format: args.source_format.into(),
        output_slice: args.output_format.into(),
        allow_successful_initial: args.allow_successful_initial,
        ignore_system_message: false,
        verify: VerifyRequest {
            params: args.params,
            timeout_secs: args.timeout,
            entry_function: args.function,
        },
        attempt_timeout_secs: args.attempt_timeout,
        temp_auto_clean: !args.keep_temps,
        generate_patches: args.generate_patches,
    };

    let engine = RepairEngine::new(
        solution,
        verifier,
        model,
        ScenarioTable::default(),
        config,
    )
    .with_retry(bmcfix_core::RetryPolicy {
        max_tries: args.requests_max_tries,
        ..Default::default()
    });
    Ok(engine.run().await?)
}

fn print_report(report: &RepairReport) {
    match report.outcome {
        RepairOutcome::AlreadyVerified => {
            println!("Program already verifies; nothing to repair.");
        }
        RepairOutcome::Success => {
            println!(
                "Repaired after {} attempt{}.",
                report.attempts,
                if report.attempts == 1 { "" } else { "s" }
            );
            if let Some(repaired) = &report.repaired {
                for file in repaired.files() {
                    println!("\n{}", file.content);
                }
            }
            if let Some(diff) = &report.diff {
                println!("--- patch ---\n{diff}");
            }
        }
        RepairOutcome::Exhausted => {
            println!("Failed all {} attempts.", report.attempts);
            if let Some(output) = &report.last_output {
                println!("--- last verifier output ---\n{}", output.output);
            }
        }
    }
}
