//! Out-of-band messages the security proxy pushes to the frontend listener.

use std::io::Read;
use std::os::unix::net::{UnixListener, UnixStream};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OobMessage {
    StatusUpdate(String),
    SecurityAlert(String),
    VerboseUpdate(u8),
    ThreatDetected(String),
}

impl OobMessage {
    pub fn encode(&self) -> String {
        match self {
            OobMessage::StatusUpdate(text) => format!("STATUS_UPDATE:{text}"),
            OobMessage::SecurityAlert(text) => format!("SECURITY_ALERT:{text}"),
            OobMessage::VerboseUpdate(level) => format!("VERBOSE_UPDATE:{level}"),
            OobMessage::ThreatDetected(text) => format!("THREAT_DETECTED:{text}"),
        }
    }

    pub fn parse(raw: &str) -> Option<OobMessage> {
        if let Some(text) = raw.strip_prefix("STATUS_UPDATE:") {
            return Some(OobMessage::StatusUpdate(text.to_string()));
        }
        if let Some(text) = raw.strip_prefix("SECURITY_ALERT:") {
            return Some(OobMessage::SecurityAlert(text.to_string()));
        }
        if let Some(level) = raw.strip_prefix("VERBOSE_UPDATE:") {
            return Some(OobMessage::VerboseUpdate(level.trim().parse().ok()?));
        }
        if let Some(text) = raw.strip_prefix("THREAT_DETECTED:") {
            return Some(OobMessage::ThreatDetected(text.to_string()));
        }
        None
    }
}

/// Drain any queued out-of-band connections without blocking the prompt.
///
/// Each sender connects, writes one message, and closes; the listener must
/// already be in non-blocking mode.
pub fn drain_listener(listener: &UnixListener) -> Vec<OobMessage> {
    let mut messages = Vec::new();
    while let Ok((stream, _addr)) = listener.accept() {
        if let Some(message) = read_one(stream) {
            messages.push(message);
        }
    }
    messages
}

fn read_one(mut stream: UnixStream) -> Option<OobMessage> {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(200)));
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).ok()?;
    if n == 0 {
        return None;
    }
    OobMessage::parse(String::from_utf8_lossy(&buf[..n]).as_ref())
}

/// Best-effort push of one message to the frontend listener.
pub fn notify(frontend_socket: &std::path::Path, message: &OobMessage) {
    use std::io::Write;
    if let Ok(mut stream) = UnixStream::connect(frontend_socket) {
        let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));
        let _ = stream.write_all(message.encode().as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn messages_round_trip() {
        let cases = vec![
            OobMessage::StatusUpdate("all clear".to_string()),
            OobMessage::SecurityAlert("pattern hit".to_string()),
            OobMessage::VerboseUpdate(2),
            OobMessage::ThreatDetected("rm -rf".to_string()),
        ];
        for message in cases {
            assert_eq!(OobMessage::parse(&message.encode()), Some(message));
        }
    }

    #[test]
    fn unknown_prefixes_are_ignored() {
        assert_eq!(OobMessage::parse("NOISE:whatever"), None);
    }

    #[test]
    fn notify_reaches_a_draining_listener() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after epoch")
            .as_nanos();
        let path = env::temp_dir().join(format!("awesh-oob-{nanos}.sock"));
        let listener = UnixListener::bind(&path).expect("bind oob listener");
        listener.set_nonblocking(true).expect("nonblocking");

        assert!(drain_listener(&listener).is_empty());
        notify(&path, &OobMessage::VerboseUpdate(1));
        // Give the connect a moment to land in the accept queue.
        std::thread::sleep(Duration::from_millis(50));
        let drained = drain_listener(&listener);
        assert_eq!(drained, vec![OobMessage::VerboseUpdate(1)]);
        let _ = std::fs::remove_file(path);
    }
}
