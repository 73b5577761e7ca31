//! Transparent security proxy between the frontend and the backend.
//!
//! The proxy binds the endpoint the frontend believes is the backend and
//! dials the real backend lazily on each accepted connection. The relay
//! forwards bytes unchanged in both directions, except that screened
//! frontend→backend payloads are replaced by the fixed refusal notice sent
//! back to the frontend side only.

pub mod patterns;

use crate::ipc::{self, oob, oob::OobMessage, Endpoints};
use anyhow::{Context, Result};
use patterns::{PatternSet, Screening, Tier};
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const RELAY_TICK: Duration = Duration::from_secs(1);
const ACCEPT_IDLE: Duration = Duration::from_millis(100);
const CHUNK: usize = 4096;

/// Run the proxy until the shutdown flag trips.
pub fn run(endpoints: &Endpoints, patterns: &PatternSet, shutdown: &AtomicBool) -> Result<()> {
    ipc::unlink_stale(&endpoints.backend_public);
    let listener = UnixListener::bind(&endpoints.backend_public)
        .with_context(|| format!("binding {}", endpoints.backend_public.display()))?;
    listener
        .set_nonblocking(true)
        .context("making proxy listener non-blocking")?;
    debug!(socket = %endpoints.backend_public.display(), "proxy listening");

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((frontend, _addr)) => match UnixStream::connect(&endpoints.backend_real) {
                Ok(backend) => {
                    if let Err(err) = relay(frontend, backend, patterns, endpoints, shutdown) {
                        debug!("relay ended: {err:#}");
                    }
                }
                Err(err) => {
                    // Backend not up yet: drop this connection, keep
                    // accepting; the frontend retries lazily.
                    debug!("backend connect failed: {err}");
                    drop(frontend);
                }
            },
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_IDLE),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!("proxy accept failed: {err}");
                thread::sleep(ACCEPT_IDLE);
            }
        }
    }

    ipc::unlink_stale(&endpoints.backend_public);
    Ok(())
}

/// Bidirectional forwarding loop for one connection pair.
fn relay(
    frontend: UnixStream,
    backend: UnixStream,
    patterns: &PatternSet,
    endpoints: &Endpoints,
    shutdown: &AtomicBool,
) -> Result<()> {
    frontend
        .set_nonblocking(true)
        .context("frontend non-blocking")?;
    backend
        .set_nonblocking(true)
        .context("backend non-blocking")?;
    let mut frontend = frontend;
    let mut backend = backend;
    let mut buf = [0u8; CHUNK];

    while !shutdown.load(Ordering::SeqCst) {
        let (front_ready, back_ready) = poll_pair(&frontend, &backend, RELAY_TICK)?;

        if front_ready {
            match frontend.read(&mut buf) {
                Ok(0) => {
                    debug!("frontend disconnected");
                    break;
                }
                Ok(n) => screen_and_forward(
                    &buf[..n],
                    patterns,
                    &mut backend,
                    &mut frontend,
                    endpoints,
                )?,
                Err(err) if spurious(&err) => {}
                Err(err) => return Err(err).context("reading from frontend"),
            }
        }

        if back_ready {
            match backend.read(&mut buf) {
                Ok(0) => {
                    debug!("backend disconnected");
                    break;
                }
                // Responses are forwarded unchanged; only requests are
                // inspected.
                Ok(n) => write_all_retry(&mut frontend, &buf[..n])
                    .context("forwarding backend reply")?,
                Err(err) if spurious(&err) => {}
                Err(err) => return Err(err).context("reading from backend"),
            }
        }
    }
    Ok(())
}

fn screen_and_forward(
    payload: &[u8],
    patterns: &PatternSet,
    backend: &mut UnixStream,
    frontend: &mut UnixStream,
    endpoints: &Endpoints,
) -> Result<()> {
    let text = String::from_utf8_lossy(payload);
    match patterns.screen(&text) {
        Screening::Forward => {
            write_all_retry(backend, payload).context("forwarding to backend")
        }
        Screening::Blocked { tier, rule } => {
            warn!(rule = %rule, ?tier, "blocked frontend payload");
            let alert = match tier {
                Tier::Dangerous => OobMessage::ThreatDetected(rule),
                Tier::Sensitive => OobMessage::SecurityAlert(rule),
            };
            oob::notify(&endpoints.frontend, &alert);
            write_all_retry(frontend, patterns::SECURITY_BLOCKED_NOTICE.as_bytes())
                .context("writing refusal notice")
        }
    }
}

fn spurious(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Readiness wait over the connection pair with the relay tick as timeout.
fn poll_pair(a: &UnixStream, b: &UnixStream, timeout: Duration) -> io::Result<(bool, bool)> {
    let mut fds = [
        libc::pollfd {
            fd: a.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: b.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    // SAFETY: fds is a live array of two initialized pollfd records and the
    // descriptors outlive the call.
    let rc = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout.as_millis() as libc::c_int,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok((false, false));
        }
        return Err(err);
    }
    let ready =
        |revents: libc::c_short| revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0;
    Ok((ready(fds[0].revents), ready(fds[1].revents)))
}

/// Write the whole buffer, retrying briefly on a full socket buffer.
fn write_all_retry(stream: &mut UnixStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "socket write returned 0")),
            Ok(n) => data = &data[n..],
            Err(err) if spurious(&err) => thread::sleep(Duration::from_millis(1)),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
