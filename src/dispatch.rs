//! Input routing: the heuristic classifier and the dispatch state machine.
//!
//! The decision core is pure so the transition table stays deterministic
//! and testable; the driver threads a context value through the I/O
//! (backend link, sandbox client, terminal guard). No globals.

use crate::backend_link::BackendLink;
use crate::ipc::wire::{Reply, Request};
use crate::ipc::Endpoints;
use crate::sandbox;
use crate::terminal_restore;
use crate::verdict::Verdict;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use tracing::debug;

/// First words that mark a line as shell, never natural language.
pub const KNOWN_SHELL_COMMANDS: &[&str] = &[
    "ls", "cd", "pwd", "cat", "grep", "find", "ps", "top", "kill", "mkdir", "rmdir", "rm", "cp",
    "mv", "chmod", "chown", "sudo", "git", "docker", "kubectl", "ssh", "scp", "rsync", "tar",
    "gzip", "vim", "nano", "emacs", "less", "more", "head", "tail", "sort", "awk", "sed", "cut",
    "uniq", "wc", "diff", "patch", "make",
];

/// Tokens that suggest the line is a natural-language request.
pub const NL_INDICATORS: &[&str] = &[
    "write", "create", "generate", "explain", "analyze", "summarize", "what", "how", "why",
    "when", "where", "who", "which", "help", "assist", "suggest", "recommend", "find", "search",
    "poem", "story", "code", "script", "function", "class", "error", "bug", "issue", "problem",
    "fix", "solution",
];

const SHELL_METACHARS: &[char] = &['|', '>', '<', '&', ';', '`'];

/// Heuristic AI detection, applied in order: a question mark wins; a known
/// shell first word or any shell metacharacter rules AI out; otherwise any
/// natural-language indicator token rules it in.
pub fn looks_like_ai(line: &str) -> bool {
    if line.contains('?') {
        return true;
    }
    let first_word = line.split_whitespace().next().unwrap_or("");
    if KNOWN_SHELL_COMMANDS.contains(&first_word) {
        return false;
    }
    if line.contains(SHELL_METACHARS) {
        return false;
    }
    let lower = line.to_lowercase();
    lower
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
        .any(|token| NL_INDICATORS.contains(&token))
}

/// First routing decision for a non-builtin line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialRoute {
    AskBackend,
    TryShell,
}

pub fn initial_route(line: &str) -> InitialRoute {
    if looks_like_ai(line) {
        InitialRoute::AskBackend
    } else {
        InitialRoute::TryShell
    }
}

/// Decision after the direct run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterDirect {
    Done,
    ConsultSandbox,
}

pub fn after_direct(exit_code: i32) -> AfterDirect {
    if exit_code == 0 {
        AfterDirect::Done
    } else {
        AfterDirect::ConsultSandbox
    }
}

/// Decision after the sandbox verdict arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterVerdict {
    /// The line is real shell that really failed: surface the exit code.
    ReportExit,
    RunInteractive,
    AskBackend,
    NotFound,
}

pub fn after_verdict(verdict: Verdict) -> AfterVerdict {
    match verdict {
        Verdict::Valid { .. } => AfterVerdict::ReportExit,
        Verdict::Interactive => AfterVerdict::RunInteractive,
        Verdict::InvalidAiHelp => AfterVerdict::AskBackend,
        Verdict::InvalidUserError => AfterVerdict::NotFound,
        Verdict::OtherFailure => AfterVerdict::AskBackend,
    }
}

/// Everything the dispatch driver needs to act on a decision.
pub struct DispatchCtx<'a> {
    pub endpoints: &'a Endpoints,
    pub backend: &'a mut BackendLink,
    pub sandbox_ready: bool,
    pub verbose: u8,
}

/// Route one non-builtin input line to exactly one outcome.
pub fn dispatch_line(ctx: &mut DispatchCtx<'_>, line: &str) {
    let backend_ready = ctx.backend.is_ready();

    // With no helpers at all, degrade to plain shell and report the code.
    if !backend_ready && !ctx.sandbox_ready {
        let exit_code = run_direct(line);
        if exit_code != 0 {
            println!("Command failed (exit {exit_code})");
        }
        return;
    }

    if initial_route(line) == InitialRoute::AskBackend {
        if backend_ready {
            ask_backend(ctx, Request::Query(line.to_string()));
        } else {
            println!("Backend not available");
        }
        return;
    }

    let exit_code = run_direct(line);
    if after_direct(exit_code) == AfterDirect::Done {
        return;
    }

    let (verdict, record) = if ctx.sandbox_ready {
        match sandbox::validate(ctx.endpoints, line) {
            Ok(result) => result,
            Err(err) => {
                debug!("sandbox validation failed: {err:#}");
                (Verdict::OtherFailure, Default::default())
            }
        }
    } else {
        (Verdict::OtherFailure, Default::default())
    };

    match after_verdict(verdict) {
        AfterVerdict::ReportExit => println!("Command failed (exit {exit_code})"),
        AfterVerdict::NotFound => println!("Command not found or error"),
        AfterVerdict::RunInteractive => run_interactive(line, ctx.verbose),
        AfterVerdict::AskBackend => {
            if ctx.backend.is_ready() {
                let request = failed_command_request(line, exit_code, &record.stdout);
                ask_backend(ctx, request);
            } else {
                println!("Backend not available for AI help");
            }
        }
    }
}

/// Send one request through the proxy and print the outcome.
fn ask_backend(ctx: &mut DispatchCtx<'_>, request: Request) {
    match ctx.backend.send_query(&request) {
        Ok(Reply::SuggestedCommand(command)) => {
            if ctx.verbose >= 1 {
                println!("AI suggested command: {command}");
            }
            let exit_code = run_direct(&command);
            if exit_code != 0 {
                println!("Command failed (exit {exit_code})");
            }
        }
        Ok(Reply::EditNote(text)) => println!("{text}"),
        Ok(Reply::Text(text)) => {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
        Ok(Reply::Ready) | Ok(Reply::Loading) => {}
        Err(err) => println!("Backend unavailable: {err:#}"),
    }
}

/// Build the AI-help request for a failed shell line, attaching the
/// sandbox-captured output through a temp file when there is any.
fn failed_command_request(line: &str, exit_code: i32, captured: &[u8]) -> Request {
    if captured.is_empty() {
        return Request::Query(line.to_string());
    }
    match write_context_file(captured) {
        Some(path) => Request::BashFailed {
            exit_code,
            command: line.to_string(),
            output_path: path.to_string_lossy().into_owned(),
        },
        None => Request::Query(line.to_string()),
    }
}

fn write_context_file(captured: &[u8]) -> Option<PathBuf> {
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .subsec_nanos();
    let path = std::env::temp_dir().join(format!("awesh_ctx_{pid}_{nanos}"));
    fs::write(&path, captured).ok()?;
    Some(path)
}

/// Run the line through a user-level shell with inherited stdio.
pub fn run_direct(line: &str) -> i32 {
    match Command::new("bash").arg("-c").arg(line).status() {
        Ok(status) => exit_code_of(status),
        Err(_) => 127,
    }
}

/// Run an interactive command with the terminal handed over to the child.
pub fn run_interactive(line: &str, verbose: u8) {
    let _guard = terminal_restore::TerminalHandoff::begin();
    let status = Command::new("bash")
        .arg("-c")
        .arg(line)
        .env("TERM", "xterm-256color")
        .status();
    match status {
        Ok(status) => {
            let exit_code = exit_code_of(status);
            if exit_code != 0 && verbose >= 1 {
                println!("Command exited with code {exit_code}");
            }
        }
        Err(err) => println!("Failed to run interactive command: {err}"),
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("how do I compress a directory?", true)] // question mark
    #[case("what is using port 8080", true)] // indicator token
    #[case("explain this error", true)]
    #[case("ls -la", false)] // known shell first word
    #[case("find . -name '*.rs'", false)]
    #[case("rm -rf /", false)]
    #[case("show me errors | grep fatal", false)] // metacharacter
    #[case("frobnicate the widget", false)] // nothing matches
    #[case("write a poem about rust", true)]
    fn ai_heuristic_follows_the_rule_order(#[case] line: &str, #[case] expected: bool) {
        assert_eq!(looks_like_ai(line), expected);
    }

    #[test]
    fn indicator_match_is_whole_token_not_substring() {
        // "classify" contains "class" but is not the token "class".
        assert!(!looks_like_ai("classify these entries now"));
        assert!(looks_like_ai("add a class for entries"));
    }

    #[rstest]
    #[case(0, AfterDirect::Done)]
    #[case(1, AfterDirect::ConsultSandbox)]
    #[case(127, AfterDirect::ConsultSandbox)]
    fn direct_exit_steers_sandbox_consultation(#[case] exit: i32, #[case] expected: AfterDirect) {
        assert_eq!(after_direct(exit), expected);
    }

    #[rstest]
    #[case(Verdict::Valid { exit_code: 2 }, AfterVerdict::ReportExit)]
    #[case(Verdict::Interactive, AfterVerdict::RunInteractive)]
    #[case(Verdict::InvalidAiHelp, AfterVerdict::AskBackend)]
    #[case(Verdict::InvalidUserError, AfterVerdict::NotFound)]
    #[case(Verdict::OtherFailure, AfterVerdict::AskBackend)]
    fn verdicts_map_to_exactly_one_action(#[case] verdict: Verdict, #[case] expected: AfterVerdict) {
        assert_eq!(after_verdict(verdict), expected);
    }

    #[test]
    fn run_direct_reports_real_exit_codes() {
        assert_eq!(run_direct("true"), 0);
        assert_eq!(run_direct("exit 3"), 3);
    }

    #[test]
    fn failed_command_request_without_capture_is_a_query() {
        let request = failed_command_request("foo bar baz", 127, b"");
        assert_eq!(request, Request::Query("foo bar baz".to_string()));
    }

    #[test]
    fn failed_command_request_with_capture_points_at_the_context_file() {
        let request = failed_command_request("foo bar baz", 127, b"bash: foo: command not found");
        match request {
            Request::BashFailed {
                exit_code,
                command,
                output_path,
            } => {
                assert_eq!(exit_code, 127);
                assert_eq!(command, "foo bar baz");
                let written = fs::read(&output_path).expect("context file");
                assert_eq!(written, b"bash: foo: command not found");
                let _ = fs::remove_file(output_path);
            }
            other => panic!("expected BashFailed, got {other:?}"),
        }
    }
}
