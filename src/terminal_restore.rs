//! Terminal-state guards so an interactive child cannot leave the terminal
//! in raw mode, even on panic paths.

use crossterm::{cursor::Show, execute, terminal::disable_raw_mode};
use std::io::{self, Write};
use std::panic;
use std::sync::OnceLock;

static PANIC_HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

/// Scoped handoff of the terminal to an interactive child process.
///
/// On creation the terminal is forced out of raw mode so the child sees a
/// canonical TTY; on drop (normal or unwinding) the state is normalized
/// again for the line editor to re-arm.
pub struct TerminalHandoff;

impl TerminalHandoff {
    #[must_use]
    pub fn begin() -> Self {
        install_terminal_panic_hook();
        normalize_terminal();
        TerminalHandoff
    }
}

impl Drop for TerminalHandoff {
    fn drop(&mut self) {
        normalize_terminal();
    }
}

/// Leave raw mode and make the cursor visible; safe to call repeatedly.
pub fn normalize_terminal() {
    let _ = disable_raw_mode();
    let mut stdout = io::stdout();
    let _ = execute!(stdout, Show);
    let _ = stdout.flush();
}

/// Install a panic hook that normalizes the terminal before delegating.
pub fn install_terminal_panic_hook() {
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            normalize_terminal();
            previous(info);
        }));
    });
}
