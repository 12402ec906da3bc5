//! Pure parsers from raw verifier text to typed issues.
//!
//! The reference verifier interleaves several sections in one text stream;
//! the anchors below are the only stable structure it guarantees:
//!
//! - `Violated property:` followed by a location line and the failed
//!   property description
//! - `[Counterexample]` followed by `State <n> file <f> line <l> ...`
//!   headers, a dashed rule, and an optional assignment line
//! - `Stack trace:` followed by `<symbol> at file <f> line <l> ...` entries
//! - `ERROR: PARSING ERROR` switching the whole output to compiler
//!   diagnostics (`<file>:<line>:<col>: error: <msg>` triples)
//! - `ERROR: Timed out`

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::issue::{Issue, OutputIssue, Severity, VerifierIssue};
use crate::trace::{CounterexampleProgramTrace, ProgramTrace};

use super::generic_failure_issue;

/// Marker for compiler-side failures; the rest of the output is diagnostics.
pub const PARSE_ERROR_MARKER: &str = "ERROR: PARSING ERROR";

/// Marker for a verifier-side timeout.
pub const TIMEOUT_MARKER: &str = "ERROR: Timed out";

/// Error type assigned to timeout issues.
pub const TIMEOUT_ERROR_TYPE: &str = "Timeout";

/// Error type assigned to compiler diagnostics.
pub const COMPILATION_ERROR_TYPE: &str = "Compilation Error";

// ---------------------------------------------------------------------------
// Section extraction
// ---------------------------------------------------------------------------

/// The `Violated property:` line plus the two lines after it (location and
/// property description). First occurrence.
pub fn violated_property(output: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.trim_end() == "Violated property:")?;
    Some(lines[start..(start + 3).min(lines.len())].join("\n"))
}

/// Everything from `[Counterexample]` onwards.
pub fn counterexample(output: &str) -> Option<&str> {
    output.find("[Counterexample]").map(|idx| &output[idx..])
}

/// The stack trace section: from `Stack trace:` up to the next blank-line
/// gap.
pub fn stack_trace_section(output: &str) -> Option<&str> {
    let start = output.find("Stack trace:")?;
    let rest = &output[start..];
    let end = rest.find("\n\n").unwrap_or(rest.len());
    Some(&rest[..end])
}

/// 1-based error line from the violated property location, falling back to
/// the first compiler diagnostic line.
pub fn error_line(output: &str) -> Option<usize> {
    violated_property_location(output)
        .map(|(_, line)| line)
        .or_else(|| compiler_error_line(output))
}

/// 0-based variant of [`error_line`].
pub fn error_line_idx(output: &str) -> Option<usize> {
    error_line(output).map(|line| line - 1)
}

/// The error-type string: the property description under the LAST
/// `Violated property:` marker.
pub fn error_type(output: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines
        .iter()
        .rposition(|line| line.trim_end() == "Violated property:")?;
    lines.get(start + 2).map(|line| line.trim().to_string())
}

/// 1-based line of the first compiler diagnostic
/// (`<file>:<line>:<col>: error: ...`).
pub fn compiler_error_line(output: &str) -> Option<usize> {
    let re = diagnostic_header_re();
    output
        .lines()
        .find_map(|line| re.captures(line))
        .and_then(|caps| caps[2].parse().ok())
}

fn violated_property_location(output: &str) -> Option<(PathBuf, usize)> {
    let block = violated_property(output)?;
    let location = block.lines().nth(1)?;
    parse_location_words(location)
}

/// Extract `file <path>` and `line <N>` from a whitespace-separated line.
fn parse_location_words(line: &str) -> Option<(PathBuf, usize)> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let mut path = None;
    let mut line_number = None;
    for pair in words.windows(2) {
        match pair[0] {
            "file" => path = Some(PathBuf::from(pair[1])),
            "line" => line_number = pair[1].parse::<usize>().ok(),
            _ => {}
        }
    }
    Some((path?, line_number.filter(|n| *n > 0)?))
}

fn function_name(line: &str) -> Option<String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    words
        .windows(2)
        .find(|pair| pair[0] == "function")
        .map(|pair| pair[1].to_string())
}

// ---------------------------------------------------------------------------
// Structured parsing
// ---------------------------------------------------------------------------

fn state_header_re() -> Regex {
    Regex::new(r"^State (\d+) file (\S+) line (\d+)(?: column (\d+))?(?: function (\S+))? thread (\d+)")
        .expect("valid regex")
}

fn diagnostic_header_re() -> Regex {
    Regex::new(r"^([^:\s][^:]*):(\d+):(\d+):\s*error:\s*(.*)$").expect("valid regex")
}

/// Parse the counterexample state trace. Stops at the first line after
/// `[Counterexample]` that no longer yields a `State` header.
pub fn parse_counterexample(output: &str) -> Vec<CounterexampleProgramTrace> {
    let Some(section) = counterexample(output) else {
        return Vec::new();
    };
    let re = state_header_re();
    let lines: Vec<&str> = section.lines().collect();
    let mut traces = Vec::new();

    let mut idx = 0;
    while idx < lines.len() {
        let Some(caps) = re.captures(lines[idx]) else {
            idx += 1;
            continue;
        };
        let state: usize = caps[1].parse().unwrap_or(0);
        let path = PathBuf::from(&caps[2]);
        let line_number: usize = match caps[3].parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                idx += 1;
                continue;
            }
        };
        let name = caps.get(5).map(|m| m.as_str().to_string());

        // The header is followed by a dashed rule and an optional
        // assignment line.
        let mut assignment = None;
        let mut consumed = 1;
        if lines
            .get(idx + 1)
            .is_some_and(|l| !l.is_empty() && l.chars().all(|c| c == '-'))
        {
            consumed = 2;
            if let Some(line) = lines.get(idx + 2) {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !re.is_match(line) {
                    assignment = Some(trimmed.to_string());
                    consumed = 3;
                }
            }
        }

        let mut trace = ProgramTrace::new(state, path, line_number - 1);
        if let Some(name) = name {
            trace = trace.with_name(name);
        }
        traces.push(CounterexampleProgramTrace::new(trace, assignment));
        idx += consumed;
    }
    traces
}

/// Parse the stack trace section into trace points. Entries without a
/// location (bare trailing symbols) are skipped.
pub fn parse_stack_trace(output: &str) -> Vec<ProgramTrace> {
    let Some(section) = stack_trace_section(output) else {
        return Vec::new();
    };
    let re = Regex::new(r"at file (\S+) line (\d+)(?: column (\d+))?(?: function (\S+))?")
        .expect("valid regex");

    let mut traces = Vec::new();
    for line in section.lines().skip(1) {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let Ok(line_number) = caps[2].parse::<usize>() else {
            continue;
        };
        if line_number == 0 {
            continue;
        }
        let mut trace =
            ProgramTrace::new(traces.len(), PathBuf::from(&caps[1]), line_number - 1);
        if let Some(function) = caps.get(4) {
            trace = trace.with_name(function.as_str().to_string());
        }
        traces.push(trace);
    }
    traces
}

/// Parse compiler diagnostics: each `<file>:<line>:<col>: error: <msg>`
/// header is followed by the offending source line and a caret line, so
/// three lines are consumed per diagnostic.
pub fn parse_compiler_diagnostics(output: &str) -> Vec<Issue> {
    let re = diagnostic_header_re();
    let lines: Vec<&str> = output.lines().collect();
    let mut issues = Vec::new();

    let mut idx = 0;
    while idx < lines.len() {
        let Some(caps) = re.captures(lines[idx]) else {
            idx += 1;
            continue;
        };
        let line_number: usize = match caps[2].parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                idx += 1;
                continue;
            }
        };
        let trace = ProgramTrace::new(0, PathBuf::from(&caps[1]), line_number - 1);
        if let Some(issue) = Issue::new(
            COMPILATION_ERROR_TYPE,
            caps[4].trim().to_string(),
            Severity::Error,
            vec![trace],
        ) {
            issues.push(issue);
        }
        idx += 3;
    }
    issues
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Parse a complete verifier run into issues.
///
/// `fallback_path` locates fabricated issues (timeouts, unparseable
/// failures) which have no better anchor than the primary input file.
pub fn parse_output(return_code: i32, output: &str, fallback_path: &Path) -> Vec<OutputIssue> {
    if output.contains(TIMEOUT_MARKER) {
        let issue = Issue::new(
            TIMEOUT_ERROR_TYPE,
            "verifier timed out before reaching a verdict",
            Severity::Error,
            vec![ProgramTrace::new(0, fallback_path.to_path_buf(), 0)],
        )
        .expect("single-point trace is non-empty");
        return vec![OutputIssue::Diagnostic(issue)];
    }

    if output.contains(PARSE_ERROR_MARKER) {
        let issues: Vec<OutputIssue> = parse_compiler_diagnostics(output)
            .into_iter()
            .map(OutputIssue::Diagnostic)
            .collect();
        if !issues.is_empty() {
            return issues;
        }
    }

    if let Some((path, line_number)) = violated_property_location(output) {
        let error_type =
            error_type(output).unwrap_or_else(|| "property violation".to_string());
        let block = violated_property(output).unwrap_or_default();
        let site_function = block.lines().nth(1).and_then(function_name);

        // The stack trace lists the call chain; the violation site from the
        // property block becomes the final trace point.
        let mut stack = parse_stack_trace(output);
        let mut site = ProgramTrace::new(stack.len(), path, line_number - 1);
        if let Some(function) = site_function {
            site = site.with_name(function);
        }
        stack.push(site);

        if let Some(issue) = Issue::new(error_type, block, Severity::Error, stack) {
            let states = parse_counterexample(output);
            return match VerifierIssue::new(issue.clone(), states) {
                Some(violation) => vec![OutputIssue::Violation(violation)],
                None => vec![OutputIssue::Diagnostic(issue)],
            };
        }
    }

    if return_code != 0 {
        return vec![OutputIssue::Diagnostic(generic_failure_issue(
            output,
            fallback_path,
        ))];
    }
    Vec::new()
}
