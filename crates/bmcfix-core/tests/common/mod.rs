//! Scripted verifier and chat model doubles shared by integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bmcfix_core::verifier::parse;
use bmcfix_core::{
    ChatError, ChatModel, Message, Solution, SourceVerifier, VerifierOutput, VerifyRequest,
};

// ---------------------------------------------------------------------------
// Verifier double
// ---------------------------------------------------------------------------

/// Verifier that replays a scripted sequence of outputs. Once the script
/// runs out, the last output repeats.
pub struct MockVerifier {
    outputs: Mutex<Vec<VerifierOutput>>,
    next: AtomicU32,
    pub calls: AtomicU32,
}

impl MockVerifier {
    pub fn sequence(outputs: Vec<VerifierOutput>) -> Self {
        assert!(!outputs.is_empty(), "script needs at least one output");
        Self {
            outputs: Mutex::new(outputs),
            next: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(output: VerifierOutput) -> Self {
        Self::sequence(vec![output])
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SourceVerifier for MockVerifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn verify(
        &self,
        solution: &Solution,
        _request: &VerifyRequest,
    ) -> bmcfix_core::verifier::Result<VerifierOutput> {
        assert!(
            solution.verify_integrity(),
            "engine must materialise before verifying"
        );
        self.calls.fetch_add(1, Ordering::Relaxed);
        let outputs = self.outputs.lock().unwrap();
        let idx = (self.next.fetch_add(1, Ordering::Relaxed) as usize).min(outputs.len() - 1);
        Ok(outputs[idx].clone())
    }
}

/// Build a verifier output by parsing `raw` the way the real adapter does.
pub fn parsed_output(return_code: i32, raw: &str) -> VerifierOutput {
    VerifierOutput {
        return_code,
        output: raw.to_string(),
        issues: parse::parse_output(return_code, raw, Path::new("main.c")),
        duration_ms: Some(1),
    }
}

pub fn passing_output() -> VerifierOutput {
    parsed_output(0, "VERIFICATION SUCCESSFUL\n")
}

/// A property violation at line 7 of `main.c`.
pub fn bounds_violation_output() -> VerifierOutput {
    parsed_output(
        1,
        "\
[Counterexample]


State 1 file main.c line 7 column 3 function main thread 0
----------------------------------------------------
  arr[5] = 0

Violated property:
  file main.c line 7 column 3 function main
  dereference failure: array bounds violated


VERIFICATION FAILED
",
    )
}

/// A candidate that failed to compile.
pub fn parse_error_output() -> VerifierOutput {
    parsed_output(
        6,
        "\
ESBMC version 7.4.0
Parsing main.c
main.c:7:3: error: expected ';' after expression
  arr[5] = 0
  ^
ERROR: PARSING ERROR
",
    )
}

// ---------------------------------------------------------------------------
// Chat model double
// ---------------------------------------------------------------------------

/// Chat model that replays scripted replies and token counts, recording
/// every message stack it receives.
pub struct ScriptedModel {
    replies: Mutex<Vec<String>>,
    token_counts: Mutex<Vec<usize>>,
    limit: usize,
    pub requests: Mutex<Vec<Vec<Message>>>,
    pub calls: AtomicU32,
}

impl ScriptedModel {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            token_counts: Mutex::new(Vec::new()),
            limit: 1_000,
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Token counts returned per send, in order; afterwards a small
    /// constant. Counts above 1000 report `Length`.
    pub fn with_token_counts(self, counts: Vec<usize>) -> Self {
        *self.token_counts.lock().unwrap() = counts;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    /// The message stacks seen by the model, one per call.
    pub fn request_log(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, messages: &[Message]) -> bmcfix_core::chat::Result<Message> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().unwrap().push(messages.to_vec());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(ChatError::Transport {
                tries: 1,
                message: "scripted replies exhausted".to_string(),
            });
        }
        Ok(Message::assistant(replies.remove(0)))
    }

    fn count_tokens(&self, _messages: &[Message]) -> usize {
        let mut counts = self.token_counts.lock().unwrap();
        if counts.is_empty() {
            10
        } else {
            counts.remove(0)
        }
    }

    fn token_limit(&self) -> usize {
        self.limit
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const BUGGY_PROGRAM: &str = "\
#include <stdlib.h>

int main() {
  int arr[5];
  for (int i = 0; i < 5; ++i)
    arr[i] = i;
  arr[5] = 0;
  return 0;
}
";

/// Write `content` as `main.c` under a fresh directory and load it as a
/// single-file solution.
pub fn solution_on_disk(content: &str) -> (tempfile::TempDir, Solution, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.c");
    std::fs::write(&path, content).unwrap();
    let solution = Solution::from_paths(&[path.clone()], Vec::new()).unwrap();
    (dir, solution, path)
}
