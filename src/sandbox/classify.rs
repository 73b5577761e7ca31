//! Scrubbing and classification of probe output from the sandbox shell.
//!
//! The PTY stream mixes the candidate command's output with terminal
//! control sequences, command echo, and prompt glyphs. Scrubbing reduces it
//! to the lines a classification decision can be made from.

use crate::verdict::Verdict;

/// Substrings that mark the probe output as a shell error.
pub const ERROR_MARKERS: &[&str] = &[
    "command not found",
    "No such file or directory",
    "Permission denied",
    "bash:",
    "sh:",
    "error:",
    "Error:",
];

/// Prompt glyph fragments filtered from scrubbed output.
const PROMPT_GLYPHS: &[&str] = &["$ ", "# ", "> "];

const EXIT_MARKER: &str = "EXIT_CODE:";

/// Scrubbed probe output plus the parsed exit marker, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutput {
    pub text: String,
    pub exit_marker: Option<i32>,
}

/// Whitespace-separated word count of the original input line.
pub fn word_count(line: &str) -> usize {
    line.split_whitespace().count()
}

/// Strip terminal control sequences and filter echo/prompt lines, then pull
/// out the `EXIT_CODE:` marker the wrapper appended.
pub fn scrub(raw: &[u8], command: &str, sentinel: &str) -> ProbeOutput {
    let stripped = strip_ansi_escapes::strip(raw);
    let text = String::from_utf8_lossy(&stripped);
    let sentinel = sentinel.trim_end();

    let mut exit_marker = None;
    let mut kept = String::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(idx) = line.find(EXIT_MARKER) {
            if exit_marker.is_none() {
                exit_marker = parse_exit_marker(&line[idx + EXIT_MARKER.len()..]);
            }
            continue;
        }
        if keep_line(line, command, sentinel) {
            kept.push_str(line);
            kept.push('\n');
        }
    }
    ProbeOutput {
        text: kept,
        exit_marker,
    }
}

fn parse_exit_marker(rest: &str) -> Option<i32> {
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().ok()
}

fn keep_line(line: &str, command: &str, sentinel: &str) -> bool {
    if line.is_empty() {
        return false;
    }
    if !command.is_empty() && (line == command || line.starts_with(command)) {
        return false;
    }
    if !sentinel.is_empty() && line == sentinel {
        return false;
    }
    if PROMPT_GLYPHS.iter().any(|glyph| line.contains(glyph)) {
        return false;
    }
    true
}

/// Apply the classification rules in order:
/// no sentinel ⇒ interactive; error marker ⇒ invalid (split on word count);
/// exit marker present ⇒ valid regardless of value; otherwise unclassified.
pub fn classify(command: &str, probe: &ProbeOutput, sentinel_seen: bool) -> Verdict {
    if !sentinel_seen {
        return Verdict::Interactive;
    }
    if ERROR_MARKERS
        .iter()
        .any(|marker| probe.text.contains(marker))
    {
        return if word_count(command) >= 3 {
            Verdict::InvalidAiHelp
        } else {
            Verdict::InvalidUserError
        };
    }
    if let Some(exit_code) = probe.exit_marker {
        return Verdict::Valid {
            exit_code: exit_code.max(0),
        };
    }
    Verdict::OtherFailure
}
