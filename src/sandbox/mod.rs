//! Sandbox validator: server loop, request handling, and the frontend-side
//! client for submitting validation requests.

pub mod classify;
pub mod fs;
pub mod session;

use crate::ipc::{self, Endpoints};
use crate::shm::{VerdictReader, VerdictWriter};
use crate::verdict::{Verdict, VerdictRecord, OTHER_FAILURE_CODE};
use anyhow::{bail, Context, Result};
use session::{Probe, ShellSession};
use std::env;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_REQUEST_LEN: usize = 4096;
const ACCEPT_IDLE: Duration = Duration::from_millis(100);
/// How long the frontend waits for the ack word. Must exceed the probe
/// budget so an interactive verdict still beats the timeout.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(7);

/// Marker the record carries for interactive commands.
const INTERACTIVE_NOTE: &str = "INTERACTIVE_COMMAND";

/// Run the sandbox server until the shutdown flag trips.
pub fn run(endpoints: &Endpoints, shutdown: &AtomicBool) -> Result<()> {
    let root = fs::default_root();
    match fs::setup_root(&root) {
        Ok(fs::RootKind::ReadOnlyBind) => debug!("sandbox root bind-mounted read-only"),
        Ok(fs::RootKind::SymlinkFallback) => {
            warn!("read-only bind mount unavailable; using symlink fallback root (weaker isolation)");
        }
        Err(err) => warn!("sandbox root setup failed: {err:#}"),
    }

    let workdir = env::current_dir().unwrap_or_else(|_| "/".into());
    let mut session = ShellSession::spawn(Some(&root), &workdir)
        .context("spawning sandbox shell session")?;
    let mut writer =
        VerdictWriter::create(&endpoints.verdict_shm).context("creating verdict slot")?;

    ipc::unlink_stale(&endpoints.sandbox);
    let listener = UnixListener::bind(&endpoints.sandbox)
        .with_context(|| format!("binding {}", endpoints.sandbox.display()))?;
    listener
        .set_nonblocking(true)
        .context("making sandbox listener non-blocking")?;
    debug!(socket = %endpoints.sandbox.display(), "sandbox listening");

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => handle_request(&mut session, &mut writer, stream),
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_IDLE),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!("sandbox accept failed: {err}");
                thread::sleep(ACCEPT_IDLE);
            }
        }
    }

    drop(writer);
    drop(session);
    ipc::unlink_stale(&endpoints.sandbox);
    fs::cleanup_root(&root);
    Ok(())
}

/// Serve one validation request: probe, classify, publish, ack.
fn handle_request(session: &mut ShellSession, writer: &mut VerdictWriter, mut stream: UnixStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(1)));
    let mut buf = [0u8; MAX_REQUEST_LEN];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let command = String::from_utf8_lossy(&buf[..n]).trim_end().to_string();
    debug!(command = %command, "validating");

    let ack: &[u8] = match session.run_probe(&command) {
        Ok(probe) => {
            let record = record_for(&command, &probe);
            match writer.publish(&record) {
                Ok(()) => b"OK",
                Err(err) => {
                    warn!("publishing verdict failed: {err:#}");
                    b"ERROR"
                }
            }
        }
        Err(err) => {
            warn!("probe failed: {err:#}");
            let failure = VerdictRecord::new(
                OTHER_FAILURE_CODE,
                Vec::new(),
                b"sandbox execution failed".to_vec(),
            );
            let _ = writer.publish(&failure);
            b"ERROR"
        }
    };
    // The ack is written only after the record: it is the happens-before
    // edge the reader relies on.
    let _ = stream.write_all(ack);
}

/// Turn one probe into the record published through the shared slot.
fn record_for(command: &str, probe: &Probe) -> VerdictRecord {
    let scrubbed = classify::scrub(&probe.raw, command, &probe.sentinel);
    let verdict = classify::classify(command, &scrubbed, probe.sentinel_seen);
    let stdout = match verdict {
        Verdict::Interactive => INTERACTIVE_NOTE.as_bytes().to_vec(),
        _ => scrubbed.text.into_bytes(),
    };
    VerdictRecord::new(verdict.wire_code(), stdout, Vec::new())
}

/// Frontend-side client: submit `line` for validation and read the verdict
/// back through the shared slot once the ack arrives.
pub fn validate(endpoints: &Endpoints, line: &str) -> Result<(Verdict, VerdictRecord)> {
    let mut stream = UnixStream::connect(&endpoints.sandbox)
        .with_context(|| format!("connecting to {}", endpoints.sandbox.display()))?;
    stream
        .write_all(line.as_bytes())
        .context("sending validation request")?;
    stream
        .set_read_timeout(Some(ACK_TIMEOUT))
        .context("setting ack timeout")?;

    let mut ack = [0u8; 8];
    let n = stream.read(&mut ack).context("reading validation ack")?;
    if n == 0 {
        bail!("sandbox closed the connection without an ack");
    }
    let ack = String::from_utf8_lossy(&ack[..n]).to_string();
    if ack != "OK" && ack != "ERROR" {
        bail!("unexpected sandbox ack {ack:?}");
    }

    let record = VerdictReader::open(&endpoints.verdict_shm).read()?;
    Ok((Verdict::from_wire_code(record.exit_code), record))
}

/// Whether the sandbox endpoint currently accepts connections.
pub fn is_reachable(socket: &Path) -> bool {
    UnixStream::connect(socket).is_ok()
}
