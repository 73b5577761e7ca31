//! Sandbox verdicts and the record that carries them between processes.
//!
//! The verdict travels as an exit code inside a length-prefixed record so
//! payloads may contain arbitrary bytes, newlines and NULs included. Three
//! negative codes are stable wire values; any non-negative code means the
//! probed line is valid shell.

use anyhow::{bail, Context, Result};

/// Command needs a TTY: no prompt returned within the attempt budget.
pub const INTERACTIVE_CODE: i32 = -103;
/// Shell error with fewer than three words: treated as a typo.
pub const USER_ERROR_CODE: i32 = -109;
/// Shell error with three or more words: routed to the AI.
pub const AI_HELP_CODE: i32 = -113;
/// Internal sandbox failure or unclassifiable output.
pub const OTHER_FAILURE_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Parsed and ran to a clean prompt; carries the observed exit code.
    Valid { exit_code: i32 },
    Interactive,
    InvalidAiHelp,
    InvalidUserError,
    OtherFailure,
}

impl Verdict {
    pub fn wire_code(self) -> i32 {
        match self {
            Verdict::Valid { exit_code } => exit_code.max(0),
            Verdict::Interactive => INTERACTIVE_CODE,
            Verdict::InvalidAiHelp => AI_HELP_CODE,
            Verdict::InvalidUserError => USER_ERROR_CODE,
            Verdict::OtherFailure => OTHER_FAILURE_CODE,
        }
    }

    pub fn from_wire_code(code: i32) -> Verdict {
        match code {
            INTERACTIVE_CODE => Verdict::Interactive,
            AI_HELP_CODE => Verdict::InvalidAiHelp,
            USER_ERROR_CODE => Verdict::InvalidUserError,
            code if code >= 0 => Verdict::Valid { exit_code: code },
            _ => Verdict::OtherFailure,
        }
    }
}

/// The record published through the shared verdict slot.
///
/// Layout (lengths are decimal ASCII, payloads are raw bytes):
/// ```text
/// EXIT_CODE:<int>\n
/// STDOUT_LEN:<n>\nSTDOUT:<n bytes>\n
/// STDERR_LEN:<m>\nSTDERR:<m bytes>\n
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerdictRecord {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl VerdictRecord {
    pub fn new(exit_code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.stdout.len() + self.stderr.len());
        out.extend_from_slice(format!("EXIT_CODE:{}\n", self.exit_code).as_bytes());
        out.extend_from_slice(format!("STDOUT_LEN:{}\nSTDOUT:", self.stdout.len()).as_bytes());
        out.extend_from_slice(&self.stdout);
        out.push(b'\n');
        out.extend_from_slice(format!("STDERR_LEN:{}\nSTDERR:", self.stderr.len()).as_bytes());
        out.extend_from_slice(&self.stderr);
        out.push(b'\n');
        out
    }

    /// Decode a record from the front of `buf`; trailing bytes (the zeroed
    /// remainder of the shared slot) are ignored.
    pub fn decode(buf: &[u8]) -> Result<VerdictRecord> {
        let mut cursor = Cursor { buf, pos: 0 };
        let exit_code = cursor
            .labeled_int("EXIT_CODE:")
            .context("verdict record missing EXIT_CODE")?;
        let stdout_len = cursor
            .labeled_int("STDOUT_LEN:")
            .context("verdict record missing STDOUT_LEN")? as usize;
        let stdout = cursor
            .labeled_bytes("STDOUT:", stdout_len)
            .context("verdict record stdout payload truncated")?;
        let stderr_len = cursor
            .labeled_int("STDERR_LEN:")
            .context("verdict record missing STDERR_LEN")? as usize;
        let stderr = cursor
            .labeled_bytes("STDERR:", stderr_len)
            .context("verdict record stderr payload truncated")?;
        Ok(VerdictRecord {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// Clamp payloads so the encoded record fits within `max` bytes. The
    /// shared slot is fixed-size, so oversized captures lose their tail.
    pub fn fit_within(mut self, max: usize) -> VerdictRecord {
        // Worst-case framing: labels plus decimal lengths.
        const FRAMING_SLACK: usize = 96;
        let budget = max.saturating_sub(FRAMING_SLACK);
        if self.stdout.len() + self.stderr.len() > budget {
            self.stdout.truncate(budget.min(self.stdout.len()));
            let rest = budget - self.stdout.len();
            self.stderr.truncate(rest);
        }
        self
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn expect_label(&mut self, label: &str) -> Result<()> {
        let end = self.pos + label.len();
        if self.buf.len() < end || &self.buf[self.pos..end] != label.as_bytes() {
            bail!("expected {label:?} at offset {}", self.pos);
        }
        self.pos = end;
        Ok(())
    }

    /// `<label><decimal int>\n`
    fn labeled_int(&mut self, label: &str) -> Result<i32> {
        self.expect_label(label)?;
        let rest = &self.buf[self.pos..];
        let newline = rest
            .iter()
            .position(|&b| b == b'\n')
            .context("unterminated integer field")?;
        let text = std::str::from_utf8(&rest[..newline]).context("non-ASCII integer field")?;
        let value = text.parse().with_context(|| format!("bad integer {text:?}"))?;
        self.pos += newline + 1;
        Ok(value)
    }

    /// `<label><len bytes>\n` where `len` was declared by a prior field.
    fn labeled_bytes(&mut self, label: &str, len: usize) -> Result<Vec<u8>> {
        self.expect_label(label)?;
        let end = self.pos + len;
        if self.buf.len() < end + 1 {
            bail!("declared {len} payload bytes but buffer ends early");
        }
        let payload = self.buf[self.pos..end].to_vec();
        if self.buf[end] != b'\n' {
            bail!("payload not newline-terminated");
        }
        self.pos = end + 1;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wire_codes_round_trip_for_every_variant() {
        for verdict in [
            Verdict::Valid { exit_code: 0 },
            Verdict::Valid { exit_code: 2 },
            Verdict::Interactive,
            Verdict::InvalidAiHelp,
            Verdict::InvalidUserError,
            Verdict::OtherFailure,
        ] {
            assert_eq!(Verdict::from_wire_code(verdict.wire_code()), verdict);
        }
    }

    #[test]
    fn unreserved_negative_codes_map_to_other_failure() {
        assert_eq!(Verdict::from_wire_code(-1), Verdict::OtherFailure);
        assert_eq!(Verdict::from_wire_code(-42), Verdict::OtherFailure);
    }

    #[test]
    fn record_round_trips_newlines_and_nuls() {
        let record = VerdictRecord::new(
            127,
            b"line one\nline two\0with nul\n".to_vec(),
            b"bash: nope: command not found\n\0\0".to_vec(),
        );
        let decoded = VerdictRecord::decode(&record.encode()).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn decode_ignores_trailing_slot_zeroes() {
        let record = VerdictRecord::new(0, b"ok".to_vec(), Vec::new());
        let mut buf = record.encode();
        buf.extend_from_slice(&[0u8; 256]);
        assert_eq!(VerdictRecord::decode(&buf).expect("decode"), record);
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let record = VerdictRecord::new(0, b"0123456789".to_vec(), Vec::new());
        let mut buf = record.encode();
        buf.truncate(buf.len() - 8);
        assert!(VerdictRecord::decode(&buf).is_err());
    }

    #[test]
    fn fit_within_prefers_stdout_then_stderr() {
        let record = VerdictRecord::new(0, vec![b'a'; 300], vec![b'b'; 300]).fit_within(296);
        assert_eq!(record.stdout.len(), 200);
        assert_eq!(record.stderr.len(), 0);
        assert!(record.encode().len() <= 296);
    }

    proptest! {
        #[test]
        fn record_round_trips_arbitrary_bytes(
            exit_code in -200i32..200,
            stdout in proptest::collection::vec(any::<u8>(), 0..512),
            stderr in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let record = VerdictRecord::new(exit_code, stdout, stderr);
            let decoded = VerdictRecord::decode(&record.encode()).expect("decode");
            prop_assert_eq!(decoded, record);
        }
    }
}
