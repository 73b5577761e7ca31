//! Screening rules for frontend→backend traffic.
//!
//! Two tiers of compiled patterns plus a secondary lexical rule. System
//! prefixes bypass screening entirely; everything else either forwards
//! unchanged or is replaced by the fixed refusal notice.

use crate::ipc::wire;
use anyhow::{Context, Result};
use regex::Regex;

/// Fixed notice written back to the frontend when a payload is refused.
pub const SECURITY_BLOCKED_NOTICE: &str = "SECURITY_BLOCKED: Command blocked by security agent\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Dangerous,
    Sensitive,
}

const DANGEROUS_PATTERNS: &[&str] = &[
    r"rm\s+-rf\s+/",
    r"sudo\s+rm\s+-rf",
    r"dd\s+if=/dev/urandom",
    r"mkfs\s",
    r"fdisk\s",
];

const SENSITIVE_PATTERNS: &[&str] = &[
    r"passwd\s",
    r"chmod\s+777",
    r"chown\s",
    r"iptables\s",
    r"systemctl\s",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    Forward,
    Blocked { tier: Tier, rule: String },
}

pub struct PatternSet {
    rules: Vec<(Tier, Regex)>,
}

impl PatternSet {
    /// Compile both tiers once at startup.
    pub fn compile() -> Result<Self> {
        let mut rules = Vec::new();
        for pattern in DANGEROUS_PATTERNS {
            rules.push((
                Tier::Dangerous,
                Regex::new(pattern).with_context(|| format!("compiling {pattern:?}"))?,
            ));
        }
        for pattern in SENSITIVE_PATTERNS {
            rules.push((
                Tier::Sensitive,
                Regex::new(pattern).with_context(|| format!("compiling {pattern:?}"))?,
            ));
        }
        Ok(Self { rules })
    }

    /// Decide the fate of one frontend→backend payload.
    pub fn screen(&self, payload: &str) -> Screening {
        if wire::is_system_prefixed(payload) {
            return Screening::Forward;
        }
        for (tier, rule) in &self.rules {
            if rule.is_match(payload) {
                return Screening::Blocked {
                    tier: *tier,
                    rule: rule.as_str().to_string(),
                };
            }
        }
        // Secondary lexical rule: catches rm -rf variants the patterns miss.
        if payload.contains("rm") && payload.contains("-rf") {
            return Screening::Blocked {
                tier: Tier::Dangerous,
                rule: "rm+-rf".to_string(),
            };
        }
        Screening::Forward
    }
}
