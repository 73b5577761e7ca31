//! Frontend↔backend wire messages.
//!
//! The channel carries prefix-delimited plain text in both directions.
//! Requests originate at the frontend and pass through the security proxy;
//! replies come back untouched. System-prefixed requests (`CWD:`, `STATUS`,
//! `BASH_FAILED:`) are exempt from proxy screening.

/// A frontend-originated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Natural-language query for the AI.
    Query(String),
    /// Working-directory sync sent before each query.
    Cwd(String),
    /// AI readiness probe.
    Status,
    /// A shell line that failed, with its captured output on disk.
    BashFailed {
        exit_code: i32,
        command: String,
        output_path: String,
    },
    /// Verbosity handoff to the backend.
    Verbose(u8),
    /// Provider switch.
    Provider(String),
    /// Model switch.
    Model(String),
}

impl Request {
    pub fn encode(&self) -> String {
        match self {
            Request::Query(text) => format!("QUERY:{text}"),
            Request::Cwd(path) => format!("CWD:{path}"),
            Request::Status => "STATUS".to_string(),
            Request::BashFailed {
                exit_code,
                command,
                output_path,
            } => format!("BASH_FAILED:{exit_code}:{command}:{output_path}"),
            Request::Verbose(level) => format!("VERBOSE:{level}"),
            Request::Provider(name) => format!("AI_PROVIDER:{name}"),
            Request::Model(name) => format!("MODEL:{name}"),
        }
    }

    pub fn parse(raw: &str) -> Option<Request> {
        if raw == "STATUS" {
            return Some(Request::Status);
        }
        if let Some(text) = raw.strip_prefix("QUERY:") {
            return Some(Request::Query(text.to_string()));
        }
        if let Some(path) = raw.strip_prefix("CWD:") {
            return Some(Request::Cwd(path.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("BASH_FAILED:") {
            let (code, rest) = rest.split_once(':')?;
            // The command may itself contain colons; the output path is the
            // final colon-free segment.
            let (command, output_path) = rest.rsplit_once(':')?;
            return Some(Request::BashFailed {
                exit_code: code.parse().ok()?,
                command: command.to_string(),
                output_path: output_path.to_string(),
            });
        }
        if let Some(level) = raw.strip_prefix("VERBOSE:") {
            return Some(Request::Verbose(level.parse().ok()?));
        }
        if let Some(name) = raw.strip_prefix("AI_PROVIDER:") {
            return Some(Request::Provider(name.to_string()));
        }
        if let Some(name) = raw.strip_prefix("MODEL:") {
            return Some(Request::Model(name.to_string()));
        }
        None
    }
}

/// System prefixes are never subject to proxy pattern blocking.
pub fn is_system_prefixed(payload: &str) -> bool {
    payload.starts_with("CWD:") || payload == "STATUS" || payload.starts_with("BASH_FAILED:")
}

/// A backend-originated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ready,
    Loading,
    /// Backend routed the input as a shell command to run.
    SuggestedCommand(String),
    /// Backend routed the input as edit-mode content to display.
    EditNote(String),
    /// Free-form answer text.
    Text(String),
}

impl Reply {
    pub fn parse(raw: &str) -> Reply {
        if raw.starts_with("AI_READY") {
            return Reply::Ready;
        }
        if raw.starts_with("AI_LOADING") {
            return Reply::Loading;
        }
        if let Some(rest) = raw.strip_prefix("awesh_cmd:") {
            return Reply::SuggestedCommand(rest.trim_start().to_string());
        }
        if let Some(rest) = raw.strip_prefix("awesh_edit:") {
            return Reply::EditNote(rest.trim_start().to_string());
        }
        Reply::Text(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_trip_through_encode_and_parse() {
        let cases = vec![
            Request::Query("how do I compress a directory?".to_string()),
            Request::Cwd("/home/user/work".to_string()),
            Request::Status,
            Request::Verbose(2),
            Request::Provider("openrouter".to_string()),
            Request::Model("claude-sonnet".to_string()),
        ];
        for request in cases {
            assert_eq!(Request::parse(&request.encode()), Some(request));
        }
    }

    #[test]
    fn bash_failed_allows_colons_inside_the_command() {
        let request = Request::BashFailed {
            exit_code: 127,
            command: "echo a:b".to_string(),
            output_path: "/tmp/awesh_ctx_1".to_string(),
        };
        assert_eq!(Request::parse(&request.encode()), Some(request));
    }

    #[test]
    fn system_prefix_detection_matches_the_exempt_set() {
        assert!(is_system_prefixed("CWD:/home/user"));
        assert!(is_system_prefixed("STATUS"));
        assert!(is_system_prefixed("BASH_FAILED:1:rm -rf /:/tmp/out"));
        assert!(!is_system_prefixed("STATUSES"));
        assert!(!is_system_prefixed("QUERY:what is STATUS"));
    }

    #[test]
    fn replies_parse_by_prefix() {
        assert_eq!(Reply::parse("AI_READY"), Reply::Ready);
        assert_eq!(Reply::parse("AI_LOADING"), Reply::Loading);
        assert_eq!(
            Reply::parse("awesh_cmd: ls -la"),
            Reply::SuggestedCommand("ls -la".to_string())
        );
        assert_eq!(
            Reply::parse("awesh_edit: draft text"),
            Reply::EditNote("draft text".to_string())
        );
        assert_eq!(
            Reply::parse("plain answer"),
            Reply::Text("plain answer".to_string())
        );
    }
}
