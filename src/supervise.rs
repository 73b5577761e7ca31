//! Child process supervision: exactly one backend, proxy, and sandbox.
//!
//! The frontend owns every child's lifetime. A liveness tick runs every
//! tenth prompt; dead children are marked restart-pending and respawned on
//! the next tick. Shutdown escalates SIGTERM → SIGKILL per child and is the
//! only path that reaps on purpose.

use anyhow::{bail, Result};
use std::env;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Prompt renders between liveness ticks.
pub const LIVENESS_EVERY_PROMPTS: u32 = 10;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Backend,
    Proxy,
    Sandbox,
}

impl ChildKind {
    pub const ALL: [ChildKind; 3] = [ChildKind::Sandbox, ChildKind::Proxy, ChildKind::Backend];

    fn binary_name(self) -> &'static str {
        match self {
            ChildKind::Backend => "awesh_backend",
            ChildKind::Proxy => "awesh_sec",
            ChildKind::Sandbox => "awesh_sandbox",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChildKind::Backend => "backend",
            ChildKind::Proxy => "security proxy",
            ChildKind::Sandbox => "sandbox",
        }
    }
}

#[derive(Debug)]
pub struct ChildSlot {
    pub kind: ChildKind,
    pid: i32,
    pub alive: bool,
    pub restart_pending: bool,
}

impl ChildSlot {
    fn empty(kind: ChildKind) -> Self {
        Self {
            kind,
            pid: -1,
            alive: false,
            restart_pending: false,
        }
    }
}

pub struct Supervisor {
    slots: [ChildSlot; 3],
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            slots: [
                ChildSlot::empty(ChildKind::Sandbox),
                ChildSlot::empty(ChildKind::Proxy),
                ChildSlot::empty(ChildKind::Backend),
            ],
        }
    }

    /// Spawn every child in startup order: sandbox, proxy, backend.
    /// Failures leave the slot empty; the dispatcher degrades accordingly.
    pub fn spawn_all(&mut self) {
        for slot in &mut self.slots {
            match spawn_child(slot.kind) {
                Ok(pid) => {
                    debug!(kind = slot.kind.label(), pid, "child started");
                    slot.pid = pid;
                    slot.alive = true;
                    slot.restart_pending = false;
                }
                Err(err) => {
                    warn!(kind = slot.kind.label(), "failed to start child: {err:#}");
                    slot.alive = false;
                    slot.restart_pending = true;
                }
            }
        }
    }

    /// Liveness tick: mark exited children dead, then respawn anything
    /// pending. Repeated spawn failure leaves the slot empty.
    pub fn tick(&mut self) {
        for slot in &mut self.slots {
            if slot.alive && !process_running(slot.pid) {
                warn!(kind = slot.kind.label(), pid = slot.pid, "child died");
                slot.alive = false;
                slot.restart_pending = true;
            }
        }
        for slot in &mut self.slots {
            if slot.restart_pending {
                match spawn_child(slot.kind) {
                    Ok(pid) => {
                        debug!(kind = slot.kind.label(), pid, "child restarted");
                        slot.pid = pid;
                        slot.alive = true;
                        slot.restart_pending = false;
                    }
                    Err(err) => {
                        debug!(kind = slot.kind.label(), "restart failed: {err:#}");
                    }
                }
            }
        }
    }

    pub fn is_alive(&self, kind: ChildKind) -> bool {
        self.slot(kind).alive
    }

    pub fn pid(&self, kind: ChildKind) -> Option<i32> {
        let slot = self.slot(kind);
        slot.alive.then_some(slot.pid)
    }

    fn slot(&self, kind: ChildKind) -> &ChildSlot {
        self.slots
            .iter()
            .find(|slot| slot.kind == kind)
            .expect("all kinds have slots")
    }

    /// Terminate every child: SIGTERM, bounded wait, then SIGKILL.
    pub fn shutdown(&mut self) {
        for slot in &mut self.slots {
            if slot.pid <= 0 {
                continue;
            }
            terminate_with_escalation(slot.pid, SHUTDOWN_GRACE);
            slot.pid = -1;
            slot.alive = false;
            slot.restart_pending = false;
        }
    }
}

fn spawn_child(kind: ChildKind) -> Result<i32> {
    for mut command in candidate_commands(kind) {
        command.stdin(Stdio::null());
        // Children keep the terminal's stdout/stderr so their own notices
        // stay visible, and ignore SIGINT so Ctrl-C stays with the prompt.
        unsafe {
            command.pre_exec(|| {
                libc::signal(libc::SIGINT, libc::SIG_IGN);
                Ok(())
            });
        }
        match command.spawn() {
            Ok(child) => return Ok(child.id() as i32),
            Err(err) => debug!(kind = kind.label(), "spawn candidate failed: {err}"),
        }
    }
    bail!("no runnable {} binary found", kind.label())
}

/// Candidate invocations in preference order: next to the current
/// executable, under `~/.local/bin`, then bare name on PATH. The backend
/// prefers its virtualenv interpreter.
fn candidate_commands(kind: ChildKind) -> Vec<Command> {
    let mut candidates = Vec::new();
    if kind == ChildKind::Backend {
        if let Some(home) = dirs::home_dir() {
            let venv_python = home.join("AI/awesh/venv/bin/python3");
            if venv_python.exists() {
                let mut cmd = Command::new(venv_python);
                cmd.args(["-m", "awesh_backend"]);
                candidates.push(cmd);
            }
        }
        let mut cmd = Command::new("python3");
        cmd.args(["-m", "awesh_backend"]);
        candidates.push(cmd);
        return candidates;
    }

    let name = kind.binary_name();
    if let Some(sibling) = sibling_binary(name) {
        candidates.push(Command::new(sibling));
    }
    if let Some(home) = dirs::home_dir() {
        let installed = home.join(".local/bin").join(name);
        if installed.exists() {
            candidates.push(Command::new(installed));
        }
    }
    candidates.push(Command::new(name));
    candidates
}

fn sibling_binary(name: &str) -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let sibling = exe.parent()?.join(name);
    sibling.exists().then_some(sibling)
}

/// Whether the kernel still knows this pid as a live (non-reaped) child.
pub fn process_running(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: WNOHANG waitpid only inspects state; a non-child pid simply
    // reports ECHILD and falls through to the signal-0 probe.
    let mut status = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if ret == pid {
        return false;
    }
    if ret == 0 {
        return true;
    }
    // Not our child: probe existence without sending a signal.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// SIGTERM the child, wait up to `grace`, then SIGKILL and reap.
pub fn terminate_with_escalation(pid: i32, grace: Duration) {
    if pid <= 0 {
        return;
    }
    // SAFETY: pid is a child owned by the supervisor; kill/waitpid only
    // touch that process.
    unsafe {
        let _ = libc::kill(pid, libc::SIGTERM);
    }
    if wait_for_exit(pid, grace) {
        return;
    }
    unsafe {
        let _ = libc::kill(pid, libc::SIGKILL);
        let mut status = 0;
        let _ = libc::waitpid(pid, &mut status, 0);
    }
}

fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let start = Instant::now();
    let mut status = 0;
    while start.elapsed() < timeout {
        // SAFETY: WNOHANG waitpid only inspects the child's state.
        let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if ret != 0 {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn mark_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Install a SIGTERM handler that trips the process-wide shutdown flag the
/// main loop selects on.
pub fn shutdown_flag() -> &'static AtomicBool {
    // SAFETY: mark_shutdown is async-signal-safe (a single atomic store).
    unsafe {
        libc::signal(libc::SIGTERM, mark_shutdown as libc::sighandler_t);
    }
    &SHUTDOWN
}
