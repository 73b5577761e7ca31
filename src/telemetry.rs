//! Optional local telemetry logging; stdout stays reserved for shell UI.

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub(crate) fn trace_log_path() -> PathBuf {
    env::var("AWESH_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("awesh_trace.jsonl"))
}

#[inline]
fn tracing_enabled(verbose: u8) -> bool {
    verbose >= 1 || env::var_os("AWESH_TRACE_LOG").is_some()
}

fn init_tracing_once(verbose: u8, once: &OnceLock<()>) {
    if !tracing_enabled(verbose) {
        return;
    }
    let _ = once.get_or_init(|| {
        let path = trace_log_path();
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(_) => return,
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Initialize the JSON file subscriber once per process.
pub fn init_tracing(verbose: u8) {
    init_tracing_once(verbose, &TRACING_INIT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn trace_log_path_prefers_env_override() {
        let _guard = env_lock().lock().expect("env lock");
        let path = env::temp_dir().join("awesh-trace-override.jsonl");
        env::set_var("AWESH_TRACE_LOG", &path);
        assert_eq!(trace_log_path(), path);
        env::remove_var("AWESH_TRACE_LOG");
    }

    #[test]
    fn trace_log_path_defaults_to_temp_dir() {
        let _guard = env_lock().lock().expect("env lock");
        env::remove_var("AWESH_TRACE_LOG");
        assert_eq!(trace_log_path(), env::temp_dir().join("awesh_trace.jsonl"));
    }

    #[test]
    fn tracing_disabled_when_silent_and_no_override() {
        let _guard = env_lock().lock().expect("env lock");
        env::remove_var("AWESH_TRACE_LOG");
        assert!(!tracing_enabled(0));
        assert!(tracing_enabled(1));
        env::set_var("AWESH_TRACE_LOG", "/tmp/x.jsonl");
        assert!(tracing_enabled(0));
        env::remove_var("AWESH_TRACE_LOG");
    }
}
