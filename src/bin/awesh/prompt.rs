//! Prompt assembly: health glyphs plus `user@host:cwd` with `~` contraction.

use awesh::backend_link::AiStatus;
use std::env;
use std::path::Path;

/// One-character health glyphs: `+` up, `~` starting, `x` down.
pub fn health_glyph(alive: bool) -> char {
    if alive {
        '+'
    } else {
        'x'
    }
}

pub fn backend_glyph(alive: bool, status: AiStatus) -> char {
    if !alive {
        return 'x';
    }
    match status {
        AiStatus::Ready => '+',
        AiStatus::Loading => '~',
        AiStatus::Failed => 'x',
    }
}

/// Input marker handed to the line editor under the context line.
pub const INPUT_MARKER: &str = "> ";

/// Build the context line printed above each read.
pub fn render(
    backend: char,
    proxy: char,
    sandbox: char,
    username: &str,
    hostname: &str,
    cwd: &Path,
) -> String {
    let user_color = if is_root() { "\x1b[31m" } else { "\x1b[32m" };
    let cwd = contract_home(cwd);
    format!(
        "[{backend}{proxy}{sandbox}] {user_color}{username}\x1b[0m@\x1b[36m{hostname}\x1b[0m:\x1b[34m{cwd}\x1b[0m"
    )
}

fn is_root() -> bool {
    // SAFETY: getuid has no preconditions.
    unsafe { libc::getuid() == 0 }
}

/// Replace a leading `$HOME` with `~`.
pub fn contract_home(cwd: &Path) -> String {
    let cwd_text = cwd.to_string_lossy().into_owned();
    if let Some(home) = dirs::home_dir() {
        let home_text = home.to_string_lossy();
        if let Some(rest) = cwd_text.strip_prefix(home_text.as_ref()) {
            return format!("~{rest}");
        }
    }
    cwd_text
}

pub fn username() -> String {
    env::var("USER").unwrap_or_else(|_| "user".to_string())
}

pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a writable array and gethostname NUL-terminates within
    // the provided length on success.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len() - 1) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn glyphs_reflect_liveness_and_status() {
        assert_eq!(health_glyph(true), '+');
        assert_eq!(health_glyph(false), 'x');
        assert_eq!(backend_glyph(false, AiStatus::Ready), 'x');
        assert_eq!(backend_glyph(true, AiStatus::Ready), '+');
        assert_eq!(backend_glyph(true, AiStatus::Loading), '~');
    }

    #[test]
    fn home_contracts_to_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(contract_home(&home.join("work")), "~/work");
        }
        assert_eq!(contract_home(&PathBuf::from("/etc")), "/etc");
    }

    #[test]
    fn render_carries_the_health_block_and_identity() {
        let prompt = render('+', '~', 'x', "user", "host", Path::new("/tmp"));
        assert!(prompt.starts_with("[+~x] "));
        assert!(prompt.contains("user"));
        assert!(prompt.contains("host"));
        assert!(prompt.contains("/tmp"));
    }
}
