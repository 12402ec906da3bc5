//! End-to-end repair loop behaviour against scripted verifier and chat
//! model doubles.

mod common;

use std::sync::Arc;

use bmcfix_core::{
    MessageHistory, RepairConfig, RepairEngine, RepairError, RepairOutcome, ScenarioTable,
    SourceFormat,
};
use common::{
    bounds_violation_output, parse_error_output, passing_output, solution_on_disk, MockVerifier,
    ScriptedModel, BUGGY_PROGRAM,
};

fn engine(
    solution: bmcfix_core::Solution,
    verifier: Arc<MockVerifier>,
    model: Arc<ScriptedModel>,
    config: RepairConfig,
) -> RepairEngine {
    RepairEngine::new(
        solution,
        verifier,
        model,
        ScenarioTable::default(),
        config,
    )
}

const FIXED_PROGRAM_REPLY: &str = "\
Here is the corrected program:
```c
#include <stdlib.h>

int main() {
  int arr[5];
  for (int i = 0; i < 5; ++i)
    arr[i] = i;
  arr[4] = 0;
  return 0;
}
```
";

#[tokio::test]
async fn already_verified_terminates_after_one_run() {
    let (_dir, solution, _path) = solution_on_disk("int main(){return 0;}\n");
    let verifier = Arc::new(MockVerifier::always(passing_output()));
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    let report = engine(
        solution.clone(),
        verifier.clone(),
        model.clone(),
        RepairConfig::default(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.outcome, RepairOutcome::AlreadyVerified);
    assert_eq!(report.attempts, 0);
    assert_eq!(verifier.call_count(), 1);
    assert_eq!(model.call_count(), 0);
    assert_eq!(report.outcome.exit_code(), 0);

    // The repaired solution equals the original.
    let repaired = report.repaired.expect("repaired solution present");
    assert_eq!(repaired.files()[0].content, solution.files()[0].content);
}

#[tokio::test]
async fn one_shot_repair_patches_only_the_error_line() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::sequence(vec![
        bounds_violation_output(),
        passing_output(),
    ]));
    // Single-line format: the model replies with just the corrected line.
    let model = Arc::new(ScriptedModel::new(vec!["```c\n  arr[4] = 0;\n```"]));

    let config = RepairConfig {
        max_attempts: 3,
        source_format: SourceFormat::Single,
        ..Default::default()
    };
    let report = engine(solution.clone(), verifier.clone(), model.clone(), config)
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, RepairOutcome::Success);
    assert_eq!(report.attempts, 1);
    assert_eq!(verifier.call_count(), 2);
    assert_eq!(model.call_count(), 1);

    let repaired = report.repaired.expect("repaired solution present");
    let original_lines: Vec<&str> = BUGGY_PROGRAM.lines().collect();
    let repaired_lines: Vec<&str> = repaired.files()[0].content.lines().collect();
    assert_eq!(original_lines.len(), repaired_lines.len());
    for (idx, (original, fixed)) in original_lines.iter().zip(&repaired_lines).enumerate() {
        if idx == 6 {
            assert_eq!(*fixed, "  arr[4] = 0;");
            assert_ne!(original, fixed);
        } else {
            assert_eq!(original, fixed, "line {} must be untouched", idx + 1);
        }
    }
}

#[tokio::test]
async fn full_source_repair_succeeds() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::sequence(vec![
        bounds_violation_output(),
        passing_output(),
    ]));
    let model = Arc::new(ScriptedModel::new(vec![FIXED_PROGRAM_REPLY]));

    let report = engine(
        solution,
        verifier,
        model,
        RepairConfig {
            generate_patches: true,
            ..Default::default()
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.outcome, RepairOutcome::Success);
    let diff = report.diff.expect("diff requested");
    assert!(diff.contains("-  arr[5] = 0;"));
    assert!(diff.contains("+  arr[4] = 0;"));
}

#[tokio::test]
async fn exhaustion_counts_runs_and_calls() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::always(bounds_violation_output()));
    let model = Arc::new(ScriptedModel::new(vec![
        FIXED_PROGRAM_REPLY,
        FIXED_PROGRAM_REPLY,
        FIXED_PROGRAM_REPLY,
    ]));

    let config = RepairConfig {
        max_attempts: 3,
        ..Default::default()
    };
    let report = engine(solution, verifier.clone(), model.clone(), config)
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, RepairOutcome::Exhausted);
    assert_eq!(report.attempts, 3);
    // Initial run plus one per attempt.
    assert_eq!(verifier.call_count(), 4);
    assert_eq!(model.call_count(), 3);
    assert_eq!(report.outcome.exit_code(), 1);
    assert!(report.repaired.is_none());
    assert!(report.last_output.is_some());
}

#[tokio::test]
async fn token_limit_recovers_through_compression() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::sequence(vec![
        bounds_violation_output(),
        passing_output(),
    ]));
    // First generation reports Length; after compression the retry fits.
    let model = Arc::new(
        ScriptedModel::new(vec![FIXED_PROGRAM_REPLY, FIXED_PROGRAM_REPLY])
            .with_token_counts(vec![5_000, 10]),
    );

    let report = engine(
        solution,
        verifier.clone(),
        model.clone(),
        RepairConfig::default(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.outcome, RepairOutcome::Success);
    assert_eq!(report.attempts, 1);
    assert_eq!(model.call_count(), 2);
    // The compression retry still reaches the verifier.
    assert_eq!(verifier.call_count(), 2);
}

#[tokio::test]
async fn second_token_limit_in_one_attempt_is_fatal() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::always(bounds_violation_output()));
    let model = Arc::new(
        ScriptedModel::new(vec![FIXED_PROGRAM_REPLY, FIXED_PROGRAM_REPLY])
            .with_token_counts(vec![5_000, 5_000]),
    );

    let result = engine(solution, verifier, model, RepairConfig::default())
        .run()
        .await;
    assert!(matches!(result, Err(RepairError::TokenLimitExceeded)));
}

#[tokio::test]
async fn parse_error_feeds_diagnostics_into_next_attempt() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::sequence(vec![
        bounds_violation_output(),
        parse_error_output(),
        bounds_violation_output(),
    ]));
    let model = Arc::new(ScriptedModel::new(vec![
        "```c\nint main( { broken\n```",
        FIXED_PROGRAM_REPLY,
    ]));

    let config = RepairConfig {
        max_attempts: 2,
        ..Default::default()
    };
    let report = engine(solution, verifier.clone(), model.clone(), config)
        .run()
        .await
        .unwrap();

    // The parse error is an ordinary failed attempt, not a fatal error.
    assert_eq!(report.outcome, RepairOutcome::Exhausted);
    assert_eq!(verifier.call_count(), 3);
    assert_eq!(model.call_count(), 2);

    // Attempt 2's prompt carries the compiler diagnostics as evidence.
    let requests = model.request_log();
    let second_prompt: String = requests[1]
        .iter()
        .map(|m| m.content.clone())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(second_prompt.contains("ERROR: PARSING ERROR"));
    assert!(second_prompt.contains("expected ';'"));
}

#[tokio::test]
async fn verifier_timeout_in_evidence_is_fatal() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let timeout = common::parsed_output(1, "ERROR: Timed out\n");
    let verifier = Arc::new(MockVerifier::always(timeout));
    let model = Arc::new(ScriptedModel::new(vec![FIXED_PROGRAM_REPLY]));

    let result = engine(solution, verifier, model, RepairConfig::default())
        .run()
        .await;
    match result {
        Err(RepairError::Generator(
            bmcfix_core::GeneratorError::VerifierTimeout,
        )) => {}
        other => panic!("expected VerifierTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn transport_exhaustion_is_fatal() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::always(bounds_violation_output()));
    // No scripted replies: every invoke fails.
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    let result = engine(solution, verifier, model, RepairConfig::default())
        .with_retry(bmcfix_core::RetryPolicy {
            max_tries: 2,
            backoff_base_ms: 1,
        })
        .run()
        .await;
    assert!(matches!(result, Err(RepairError::Chat(_))));
}

#[tokio::test]
async fn success_callback_receives_repaired_file() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::sequence(vec![
        bounds_violation_output(),
        passing_output(),
    ]));
    let model = Arc::new(ScriptedModel::new(vec![FIXED_PROGRAM_REPLY]));

    let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let sink = seen.clone();
    let report = engine(solution, verifier, model, RepairConfig::default())
        .on_solution_found(Box::new(move |file| {
            sink.lock().unwrap().push(file.content.clone());
        }))
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, RepairOutcome::Success);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("arr[4] = 0;"));
}

#[tokio::test]
async fn success_callback_resolves_target_among_identical_files() {
    // Two files, and the one that is NOT repaired already holds the exact
    // text the model will produce. The callback must still report the
    // repaired file, identified by its relative path.
    let candidate = bmcfix_core::extract_fenced_code(FIXED_PROGRAM_REPLY);
    let dir = tempfile::tempdir().unwrap();
    let decoy_path = dir.path().join("decoy.c");
    std::fs::write(&decoy_path, candidate).unwrap();
    let main_path = dir.path().join("main.c");
    std::fs::write(&main_path, BUGGY_PROGRAM).unwrap();
    let solution =
        bmcfix_core::Solution::from_paths(&[decoy_path, main_path.clone()], Vec::new()).unwrap();

    // The violation names main.c by absolute path so it resolves as the
    // repair target even though the decoy sits first in the file list.
    let violation = common::parsed_output(
        1,
        &format!(
            "\
[Counterexample]


State 1 file {p} line 7 column 3 function main thread 0
----------------------------------------------------
  arr[5] = 0

Violated property:
  file {p} line 7 column 3 function main
  dereference failure: array bounds violated


VERIFICATION FAILED
",
            p = main_path.display()
        ),
    );
    let verifier = Arc::new(MockVerifier::sequence(vec![violation, passing_output()]));
    let model = Arc::new(ScriptedModel::new(vec![FIXED_PROGRAM_REPLY]));

    let seen = Arc::new(std::sync::Mutex::new(Vec::<std::path::PathBuf>::new()));
    let sink = seen.clone();
    let report = engine(solution, verifier, model, RepairConfig::default())
        .on_solution_found(Box::new(move |file| {
            sink.lock().unwrap().push(file.path().to_path_buf());
        }))
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, RepairOutcome::Success);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].file_name().unwrap(), "main.c");
}

#[tokio::test]
async fn cancellation_stops_before_next_attempt() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::always(bounds_violation_output()));
    let model = Arc::new(ScriptedModel::new(vec![FIXED_PROGRAM_REPLY]));

    let engine = engine(solution, verifier, model, RepairConfig::default());
    let flag = engine.cancellation_flag();
    flag.store(true, std::sync::atomic::Ordering::SeqCst);

    let result = engine.run().await;
    assert!(matches!(result, Err(RepairError::Cancelled)));
}

#[tokio::test]
async fn latest_only_history_repairs_like_full() {
    let (_dir, solution, _path) = solution_on_disk(BUGGY_PROGRAM);
    let verifier = Arc::new(MockVerifier::sequence(vec![
        bounds_violation_output(),
        bounds_violation_output(),
        passing_output(),
    ]));
    let model = Arc::new(ScriptedModel::new(vec![
        FIXED_PROGRAM_REPLY,
        FIXED_PROGRAM_REPLY,
    ]));

    let config = RepairConfig {
        max_attempts: 3,
        message_history: MessageHistory::LatestOnly,
        ..Default::default()
    };
    let report = engine(solution, verifier, model.clone(), config)
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, RepairOutcome::Success);
    assert_eq!(report.attempts, 2);

    // The model never sees more than the current state: one user message
    // per request regardless of how many attempts ran.
    for request in model.request_log() {
        let users = request
            .iter()
            .filter(|m| m.role == bmcfix_core::Role::User)
            .count();
        assert_eq!(users, 1);
    }
}
