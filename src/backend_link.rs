//! The frontend's connection to the backend (through the security proxy).
//!
//! Connection is lazy: a failed connect is not an error, it just leaves the
//! link down until the next attempt. While a query is in flight the link
//! wakes every five seconds to print a progress dot; after the configured
//! cap it declares a timeout and tears the connection down so the next
//! query reconnects fresh.

use crate::ipc::wire::{Reply, Request};
use crate::ipc::Endpoints;
use anyhow::{bail, Context, Result};
use std::env;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Progress dot cadence while awaiting a reply.
pub const DOT_INTERVAL: Duration = Duration::from_secs(5);
/// Default overall reply cap (~5 minutes = 64 dots).
pub const DEFAULT_MAX_DOTS: u32 = 64;

const MAX_REPLY_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiStatus {
    Loading,
    Ready,
    Failed,
}

impl AiStatus {
    pub fn label(self) -> &'static str {
        match self {
            AiStatus::Loading => "loading",
            AiStatus::Ready => "ready",
            AiStatus::Failed => "failed",
        }
    }
}

pub struct BackendLink {
    socket: PathBuf,
    stream: Option<UnixStream>,
    pub status: AiStatus,
    max_dots: u32,
}

impl BackendLink {
    pub fn new(endpoints: &Endpoints) -> Self {
        Self {
            socket: endpoints.backend_public.clone(),
            stream: None,
            status: AiStatus::Loading,
            max_dots: DEFAULT_MAX_DOTS,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.stream.is_some() && self.status == AiStatus::Ready
    }

    /// Lazy reconnect; cheap to call every prompt.
    pub fn try_connect(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        match UnixStream::connect(&self.socket) {
            Ok(stream) => {
                debug!(socket = %self.socket.display(), "connected to backend");
                self.stream = Some(stream);
                true
            }
            Err(err) => {
                debug!("backend connect failed: {err}");
                false
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    /// Ask the backend whether the AI is ready; quick, bounded wait.
    pub fn poll_status(&mut self) {
        if !self.try_connect() {
            return;
        }
        match self.exchange(&Request::Status.encode(), Duration::from_secs(1), 1) {
            Ok(reply) => match Reply::parse(reply.trim_end()) {
                Reply::Ready => self.status = AiStatus::Ready,
                Reply::Loading => self.status = AiStatus::Loading,
                _ => {}
            },
            Err(err) => {
                debug!("status poll failed: {err:#}");
                self.disconnect();
            }
        }
    }

    /// Send one request and wait for its reply, syncing the working
    /// directory first so the backend resolves relative paths correctly.
    pub fn send_query(&mut self, request: &Request) -> Result<Reply> {
        if !self.try_connect() {
            bail!("backend is not reachable");
        }
        self.sync_cwd();

        let raw = match self.exchange(&request.encode(), DOT_INTERVAL, self.max_dots) {
            Ok(raw) => raw,
            Err(err) => {
                // Tear down so the next query reconnects fresh.
                self.disconnect();
                return Err(err);
            }
        };
        Ok(Reply::parse(raw.trim_end_matches('\0').trim_end()))
    }

    /// Fire a control message (verbosity, provider, model) and quietly
    /// consume whatever acknowledgment comes back.
    pub fn send_control(&mut self, request: &Request) {
        if !self.try_connect() {
            return;
        }
        if self
            .exchange(&request.encode(), Duration::from_secs(1), 1)
            .is_err()
        {
            // Control messages are best-effort; a dead link just resets.
            self.disconnect();
        }
    }

    /// Best-effort CWD sync; the ack is consumed and ignored.
    fn sync_cwd(&mut self) {
        if let Ok(cwd) = env::current_dir() {
            let message = Request::Cwd(cwd.to_string_lossy().into_owned()).encode();
            let _ = self.exchange(&message, Duration::from_secs(1), 1);
        }
    }

    /// Write `payload`, then wait for a reply in `slice`-long waits, up to
    /// `max_slices` of them, printing a progress dot per expired slice
    /// (when more than one is allowed).
    fn exchange(&mut self, payload: &str, slice: Duration, max_slices: u32) -> Result<String> {
        let stream = self.stream.as_mut().context("backend link is down")?;
        stream
            .write_all(payload.as_bytes())
            .context("sending to backend")?;
        stream
            .set_read_timeout(Some(slice))
            .context("setting reply timeout")?;

        let show_dots = max_slices > 1;
        let mut dots = 0u32;
        let mut buf = vec![0u8; MAX_REPLY_LEN];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => bail!("backend disconnected"),
                Ok(n) => {
                    if show_dots && dots > 0 {
                        println!();
                    }
                    return Ok(String::from_utf8_lossy(&buf[..n]).into_owned());
                }
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    dots += 1;
                    if dots >= max_slices {
                        if show_dots {
                            println!();
                        }
                        bail!("backend reply timed out");
                    }
                    if show_dots {
                        print!(".");
                        let _ = std::io::stdout().flush();
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err).context("reading backend reply"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn test_endpoints(tag: &str) -> (Endpoints, PathBuf) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after epoch")
            .as_nanos();
        let root = env::temp_dir().join(format!("awesh-link-{tag}-{nanos}"));
        std::fs::create_dir_all(&root).expect("create test root");
        (Endpoints::rooted_at(&root), root)
    }

    #[test]
    fn connect_fails_quietly_without_a_listener() {
        let (endpoints, root) = test_endpoints("down");
        let mut link = BackendLink::new(&endpoints);
        assert!(!link.try_connect());
        assert!(!link.is_connected());
        assert!(!link.is_ready());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn status_poll_marks_the_link_ready() {
        let (endpoints, root) = test_endpoints("status");
        let listener = UnixListener::bind(&endpoints.backend_public).expect("bind");
        let stop = Arc::new(AtomicBool::new(false));
        let server_stop = Arc::clone(&stop);
        let server = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 256];
                while !server_stop.load(Ordering::SeqCst) {
                    match stream.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let text = String::from_utf8_lossy(&buf[..n]).to_string();
                            if text == "STATUS" {
                                let _ = stream.write_all(b"AI_READY");
                            } else {
                                let _ = stream.write_all(b"ack");
                            }
                        }
                        Err(_) => break,
                    }
                }
            }
        });

        let mut link = BackendLink::new(&endpoints);
        link.poll_status();
        assert_eq!(link.status, AiStatus::Ready);
        assert!(link.is_ready());

        stop.store(true, Ordering::SeqCst);
        link.disconnect();
        let _ = server.join();
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn query_gets_the_reply_after_the_cwd_sync() {
        let (endpoints, root) = test_endpoints("query");
        let listener = UnixListener::bind(&endpoints.backend_public).expect("bind");
        let server = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let text = String::from_utf8_lossy(&buf[..n]).to_string();
                            if text.starts_with("CWD:") {
                                let _ = stream.write_all(b"ack");
                            } else if text.starts_with("QUERY:") {
                                let _ = stream.write_all(b"use tar -czf");
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            }
        });

        let mut link = BackendLink::new(&endpoints);
        let reply = link
            .send_query(&Request::Query("how do I compress a directory?".into()))
            .expect("query reply");
        assert_eq!(reply, Reply::Text("use tar -czf".to_string()));

        let _ = server.join();
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn reply_timeout_tears_the_link_down() {
        let (endpoints, root) = test_endpoints("timeout");
        let listener = UnixListener::bind(&endpoints.backend_public).expect("bind");
        let server = thread::spawn(move || {
            // Accept, consume everything, never reply.
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                }
            }
        });

        let mut link = BackendLink::new(&endpoints);
        link.max_dots = 1;
        // Shrink the CWD sync wait too by letting it fail fast: the sync
        // uses a single one-second slice, acceptable for a test.
        let err = link
            .send_query(&Request::Query("slow question".into()))
            .expect_err("must time out");
        assert!(err.to_string().contains("timed out"), "got {err:#}");
        assert!(!link.is_connected());

        drop(link);
        let _ = server.join();
        let _ = std::fs::remove_dir_all(root);
    }
}
