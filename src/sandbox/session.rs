//! Long-lived bash session on a PTY master, used to probe candidate
//! commands without paying a fork/exec per request.
//!
//! The session shell runs with echo disabled and (when privileged) inside
//! the read-only sandbox root. A dedicated reader thread pumps PTY output
//! into a bounded channel; request handling drains, submits, and collects
//! against the prompt sentinel under a fixed attempt budget.

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::ffi::CString;
use std::io::{self, ErrorKind};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

/// Sentinel used when live prompt discovery fails; never empty.
pub const DEFAULT_SENTINEL: &str = "$ ";

/// Wall-clock budget for a single probe before the command is presumed
/// interactive.
pub const REQUEST_BUDGET: Duration = Duration::from_secs(5);

const READ_SLICE: Duration = Duration::from_millis(100);
const SENTINEL_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Raw bytes captured for one probe plus whether the prompt came back.
#[derive(Debug)]
pub struct Probe {
    pub raw: Vec<u8>,
    pub sentinel_seen: bool,
    pub sentinel: String,
}

pub struct ShellSession {
    master_fd: RawFd,
    child_pid: i32,
    output_rx: Receiver<Vec<u8>>,
    sentinel: Option<String>,
    _reader: thread::JoinHandle<()>,
}

impl ShellSession {
    /// Spawn the session shell under a fresh PTY, optionally chrooted into
    /// the sandbox root, starting in `workdir`.
    pub fn spawn(chroot_dir: Option<&Path>, workdir: &Path) -> Result<Self> {
        let shell = CString::new("/bin/bash").expect("static path");
        let argv: Vec<CString> = ["bash", "--norc", "--noprofile", "-c", "stty -echo; exec bash"]
            .iter()
            .map(|arg| CString::new(*arg).expect("static argv"))
            .collect();
        let cwd = CString::new(workdir.as_os_str().as_bytes())
            .with_context(|| format!("workdir contains NUL byte: {}", workdir.display()))?;
        let root = chroot_dir
            .map(|dir| {
                CString::new(dir.as_os_str().as_bytes())
                    .with_context(|| format!("root contains NUL byte: {}", dir.display()))
            })
            .transpose()?;

        // SAFETY: all strings passed to the child are prepared before fork;
        // the returned master fd is owned by the session and the reader
        // thread reads it until close.
        unsafe {
            let (master_fd, child_pid) = spawn_shell_child(&shell, &argv, root.as_ref(), &cwd)?;
            set_nonblocking(master_fd)?;
            let (tx, rx) = bounded(100);
            let reader = spawn_reader_thread(master_fd, tx);
            Ok(Self {
                master_fd,
                child_pid,
                output_rx: rx,
                sentinel: None,
                _reader: reader,
            })
        }
    }

    /// Peek whether the session shell is still running (without reaping it).
    pub fn is_alive(&self) -> bool {
        if self.child_pid <= 0 {
            return false;
        }
        // SAFETY: child_pid is owned by this session; WNOHANG only inspects.
        let mut status = 0;
        let ret = unsafe { libc::waitpid(self.child_pid, &mut status, libc::WNOHANG) };
        ret == 0
    }

    /// Discard any residue sitting in the PTY stream.
    pub fn drain(&self) {
        while self.output_rx.try_recv().is_ok() {}
    }

    /// Run one candidate command through the session and capture its output
    /// until the prompt sentinel returns or the attempt budget expires.
    pub fn run_probe(&mut self, command: &str) -> Result<Probe> {
        if !self.is_alive() {
            bail!("sandbox shell is not running");
        }
        let sentinel = self.ensure_sentinel();
        self.drain();

        let wrapped = format!("bash -c '{command}'; echo \"EXIT_CODE:$?\"");
        self.send_line(&wrapped)?;

        let (raw, sentinel_seen) = self.collect_until(&sentinel, REQUEST_BUDGET);
        if !sentinel_seen {
            self.interrupt();
        }
        Ok(Probe {
            raw,
            sentinel_seen,
            sentinel,
        })
    }

    /// The captured prompt sentinel, probed from the live session on first
    /// use and cached afterwards.
    fn ensure_sentinel(&mut self) -> String {
        if let Some(sentinel) = &self.sentinel {
            return sentinel.clone();
        }
        let sentinel = self
            .probe_sentinel()
            .unwrap_or_else(|| DEFAULT_SENTINEL.to_string());
        tracing::debug!(sentinel = %sentinel, "captured prompt sentinel");
        self.sentinel = Some(sentinel.clone());
        sentinel
    }

    fn probe_sentinel(&self) -> Option<String> {
        self.send_line("echo \"PS1_PROMPT:$PS1\"").ok()?;
        let start = Instant::now();
        let mut buf = Vec::new();
        while start.elapsed() < SENTINEL_PROBE_TIMEOUT {
            match self.output_rx.recv_timeout(READ_SLICE) {
                Ok(chunk) => {
                    buf.extend_from_slice(&chunk);
                    if let Some(sentinel) = extract_sentinel(&buf) {
                        // Let the trailing prompt land, then clear it out.
                        thread::sleep(Duration::from_millis(50));
                        self.drain();
                        return Some(sentinel);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.drain();
        None
    }

    fn collect_until(&self, sentinel: &str, budget: Duration) -> (Vec<u8>, bool) {
        let start = Instant::now();
        let mut buf = Vec::new();
        let mut seen = false;
        while start.elapsed() < budget {
            match self.output_rx.recv_timeout(READ_SLICE) {
                Ok(chunk) => {
                    buf.extend_from_slice(&chunk);
                    if !seen && find_subslice(&buf, sentinel.as_bytes()).is_some() {
                        seen = true;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Once the prompt is back, a quiet slice means the
                    // command is done spilling stderr.
                    if seen {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        (buf, seen)
    }

    /// Send Ctrl-C to the session and clear whatever it leaves behind.
    pub fn interrupt(&self) {
        let _ = write_all(self.master_fd, b"\x03");
        thread::sleep(Duration::from_millis(100));
        self.drain();
    }

    fn send_line(&self, text: &str) -> Result<()> {
        write_all(self.master_fd, text.as_bytes())?;
        write_all(self.master_fd, b"\n")
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        let _ = write_all(self.master_fd, b"exit\n");
        if !wait_for_exit(self.child_pid, Duration::from_millis(500)) {
            // SAFETY: child_pid belongs to this session; kill/waitpid only
            // touch that process (group first, direct pid as fallback).
            unsafe {
                signal_session(self.child_pid, libc::SIGTERM);
                if !wait_for_exit(self.child_pid, Duration::from_millis(500)) {
                    signal_session(self.child_pid, libc::SIGKILL);
                    let mut status = 0;
                    let _ = libc::waitpid(self.child_pid, &mut status, 0);
                }
            }
        }
        // SAFETY: master_fd was opened by openpty and is closed exactly once.
        unsafe {
            libc::close(self.master_fd);
        }
    }
}

/// Extract the `PS1_PROMPT:` marker value from probe output.
fn extract_sentinel(buf: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(buf);
    let start = text.find("PS1_PROMPT:")? + "PS1_PROMPT:".len();
    let rest = &text[start..];
    let end = rest.find('\n')?;
    let value = rest[..end].trim_end_matches('\r');
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Fork and exec the session shell under a new PTY.
///
/// # Safety
///
/// `shell`/`argv`/`root`/`cwd` must outlive the call; the child never
/// returns (it execs or `_exit(1)`s).
unsafe fn spawn_shell_child(
    shell: &CString,
    argv: &[CString],
    root: Option<&CString>,
    cwd: &CString,
) -> Result<(RawFd, i32)> {
    let mut master_fd: RawFd = -1;
    let mut slave_fd: RawFd = -1;

    // SAFETY: openpty fills the two fd out-params; winsize/name are optional.
    if libc::openpty(
        &mut master_fd,
        &mut slave_fd,
        ptr::null_mut(),
        ptr::null_mut(),
        ptr::null_mut(),
    ) != 0
    {
        return Err(errno_error("openpty failed"));
    }

    let pid = libc::fork();
    if pid < 0 {
        libc::close(master_fd);
        libc::close(slave_fd);
        return Err(errno_error("fork failed"));
    }
    if pid == 0 {
        shell_child_exec(master_fd, slave_fd, shell, argv, root, cwd);
    }

    libc::close(slave_fd);
    Ok((master_fd, pid))
}

/// Child-side setup after fork: session leader, controlling TTY, stdio on
/// the slave, environment, chroot, exec.
///
/// # Safety
///
/// Must only run in the forked child; diverges via exec or `_exit(1)`.
unsafe fn shell_child_exec(
    master_fd: RawFd,
    slave_fd: RawFd,
    shell: &CString,
    argv: &[CString],
    root: Option<&CString>,
    cwd: &CString,
) -> ! {
    let fail = |context: &str| -> ! {
        let err = io::Error::last_os_error();
        let msg = format!("sandbox shell setup {context} failed: {err}\n");
        // SAFETY: write is async-signal-safe and stderr is open in the child.
        let _ = libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::_exit(1);
    };

    libc::close(master_fd);
    if libc::setsid() == -1 {
        fail("setsid");
    }
    if libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
        fail("ioctl(TIOCSCTTY)");
    }
    if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
    {
        fail("dup2");
    }
    if slave_fd > libc::STDERR_FILENO {
        libc::close(slave_fd);
    }

    if libc::setenv(c"TERM".as_ptr(), c"xterm-256color".as_ptr(), 1) != 0 {
        fail("setenv(TERM)");
    }
    if libc::setenv(c"PS1".as_ptr(), c"$ ".as_ptr(), 1) != 0 {
        fail("setenv(PS1)");
    }

    // chroot needs privilege; the unprivileged fallback keeps validating
    // against the symlinked root without confinement.
    if let Some(root) = root {
        let _ = libc::chroot(root.as_ptr());
    }
    if libc::chdir(cwd.as_ptr()) != 0 {
        let _ = libc::chdir(c"/".as_ptr());
    }

    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
    argv_ptrs.push(ptr::null());
    libc::execv(shell.as_ptr(), argv_ptrs.as_ptr());
    fail("execv");
}

/// Continuously read from the PTY and forward chunks to the session.
fn spawn_reader_thread(master_fd: RawFd, tx: Sender<Vec<u8>>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            // SAFETY: master_fd stays valid while the session lives; buffer
            // is a writable stack array of the stated length.
            let n = unsafe { libc::read(master_fd, buffer.as_mut_ptr().cast(), buffer.len()) };
            if n > 0 {
                if tx.send(buffer[..n as usize].to_vec()).is_err() {
                    break;
                }
                continue;
            }
            if n == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock {
                thread::sleep(Duration::from_millis(10));
                continue;
            }
            break;
        }
    })
}

/// Write the whole buffer to the PTY master, retrying short writes.
fn write_all(fd: RawFd, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        // SAFETY: fd is the PTY master and data is a live slice.
        let written = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        if written < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            return Err(anyhow!("PTY write failed: {err}"));
        }
        if written == 0 {
            return Err(anyhow!("PTY write returned 0"));
        }
        data = &data[written as usize..];
    }
    Ok(())
}

/// Configure the PTY master for non-blocking reads.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor.
unsafe fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = libc::fcntl(fd, libc::F_GETFL, 0);
    if flags < 0 {
        return Err(errno_error("fcntl(F_GETFL) failed"));
    }
    if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
        return Err(errno_error("fcntl(F_SETFL) failed"));
    }
    Ok(())
}

/// Signal the session's process group, falling back to the direct pid.
///
/// # Safety
///
/// `pid` must be a child owned by the caller.
unsafe fn signal_session(pid: i32, signal: i32) {
    if pid <= 0 {
        return;
    }
    if libc::kill(-pid, signal) != 0 {
        let _ = libc::kill(pid, signal);
    }
}

/// Wait for the child to terminate, bailing out after `timeout`.
fn wait_for_exit(child_pid: i32, timeout: Duration) -> bool {
    if child_pid <= 0 {
        return true;
    }
    let start = Instant::now();
    let mut status = 0;
    while start.elapsed() < timeout {
        // SAFETY: child_pid is owned by this session; WNOHANG only inspects.
        let result = unsafe { libc::waitpid(child_pid, &mut status, libc::WNOHANG) };
        if result != 0 {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

fn errno_error(context: &str) -> anyhow::Error {
    anyhow!("{context}: {}", io::Error::last_os_error())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_subslice_locates_needles_across_positions() {
        assert_eq!(find_subslice(b"abc$ def", b"$ "), Some(3));
        assert_eq!(find_subslice(b"$ ", b"$ "), Some(0));
        assert_eq!(find_subslice(b"abc", b"$ "), None);
        assert_eq!(find_subslice(b"", b"$ "), None);
        assert_eq!(find_subslice(b"abc", b""), None);
    }

    #[test]
    fn extract_sentinel_reads_the_marker_line() {
        assert_eq!(
            extract_sentinel(b"PS1_PROMPT:$ \n$ "),
            Some("$ ".to_string())
        );
        assert_eq!(
            extract_sentinel(b"noise\r\nPS1_PROMPT:[sbx]> \r\n"),
            Some("[sbx]> ".to_string())
        );
    }

    #[test]
    fn extract_sentinel_rejects_blank_or_unterminated_markers() {
        assert_eq!(extract_sentinel(b"PS1_PROMPT:\n"), None);
        assert_eq!(extract_sentinel(b"PS1_PROMPT:  \n"), None);
        assert_eq!(extract_sentinel(b"PS1_PROMPT:$ "), None);
    }
}
