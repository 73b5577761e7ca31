//! Shell configuration: `~/.aweshrc` parsing, verbosity, and env export.
//!
//! The config file is plain `KEY=VALUE` lines with `#` comments. Every key
//! except `MODEL` is exported into the process environment so child
//! processes inherit the same settings.

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const PRIMARY_CONFIG: &str = ".aweshrc";
pub const FALLBACK_CONFIG: &str = ".awesh_config.ini";

pub const DEFAULT_PROVIDER: &str = "openai";

/// Verbosity: 0 = silent, 1 = info, 2+ = debug.
#[derive(Debug, Clone)]
pub struct Config {
    pub verbose: u8,
    pub provider: String,
    pub model: String,
    path: PathBuf,
}

impl Config {
    /// Load configuration, preferring `~/.aweshrc` and falling back to
    /// `~/.awesh_config.ini`. Missing files yield defaults.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(primary_config_path);
        let mut verbose = env::var("VERBOSE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let contents = fs::read_to_string(&path).ok().or_else(|| {
            if explicit.is_none() {
                fs::read_to_string(fallback_config_path()).ok()
            } else {
                None
            }
        });

        if let Some(contents) = contents {
            for (key, value) in parse_entries(&contents) {
                if key == "VERBOSE" {
                    verbose = value.parse().unwrap_or(0);
                }
                // MODEL is intentionally not exported; it travels over the
                // wire via the MODEL: control message instead.
                if key != "MODEL" {
                    env::set_var(key, value);
                }
            }
        }

        let provider = env::var("AI_PROVIDER").unwrap_or_else(|_| DEFAULT_PROVIDER.to_string());
        if env::var("MODEL").is_err() {
            env::set_var("MODEL", default_model_for(&provider));
        }
        let model = env::var("MODEL").unwrap_or_else(|_| default_model_for(&provider).to_string());

        // Children read VERBOSE from the environment.
        env::set_var("VERBOSE", verbose.to_string());

        Self {
            verbose,
            provider,
            model,
            path,
        }
    }

    /// Rewrite a single key in the config file, appending it when absent.
    pub fn update_value(&self, key: &str, value: &str) -> Result<()> {
        update_file_value(&self.path, key, value)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse `KEY=VALUE` entries, skipping blanks and `#` comments.
fn parse_entries(contents: &str) -> impl Iterator<Item = (&str, &str)> {
    contents.lines().filter_map(|line| {
        let line = line.trim_end_matches('\n');
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        line.split_once('=')
    })
}

fn update_file_value(path: &Path, key: &str, value: &str) -> Result<()> {
    let existing = fs::read_to_string(path).unwrap_or_default();
    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;
    for line in existing.lines() {
        if line.strip_prefix(key).is_some_and(|rest| rest.starts_with('=')) {
            lines.push(format!("{key}={value}"));
            replaced = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(format!("{key}={value}"));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(path, out).with_context(|| format!("writing config {}", path.display()))
}

pub fn primary_config_path() -> PathBuf {
    home_dir().join(PRIMARY_CONFIG)
}

fn fallback_config_path() -> PathBuf {
    home_dir().join(FALLBACK_CONFIG)
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(env::temp_dir)
}

pub fn default_model_for(provider: &str) -> &'static str {
    if provider == "openrouter" {
        "claude-sonnet"
    } else {
        "gpt-5"
    }
}

/// True when running inside an SSH session (surfaced in the status dump).
pub fn is_ssh_session() -> bool {
    ["SSH_CLIENT", "SSH_TTY", "SSH_CONNECTION"]
        .iter()
        .any(|key| env::var_os(key).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn unique_config_path(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after epoch")
            .as_nanos();
        env::temp_dir().join(format!("awesh-config-{tag}-{nanos}.rc"))
    }

    #[test]
    fn parse_entries_skips_comments_and_blanks() {
        let parsed: Vec<_> =
            parse_entries("# comment\n\nVERBOSE=2\nAI_PROVIDER=openrouter\nBROKEN\n").collect();
        assert_eq!(
            parsed,
            vec![("VERBOSE", "2"), ("AI_PROVIDER", "openrouter")]
        );
    }

    #[test]
    fn load_reads_verbose_and_defaults_model_by_provider() {
        let _guard = env_lock().lock().expect("env lock");
        env::remove_var("MODEL");
        env::remove_var("VERBOSE");
        let path = unique_config_path("load");
        fs::write(&path, "VERBOSE=2\nAI_PROVIDER=openrouter\n").expect("write config");

        let config = Config::load(Some(&path));
        assert_eq!(config.verbose, 2);
        assert_eq!(config.provider, "openrouter");
        assert_eq!(config.model, "claude-sonnet");

        env::remove_var("MODEL");
        env::remove_var("AI_PROVIDER");
        env::remove_var("VERBOSE");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn model_key_is_not_exported_to_env() {
        let _guard = env_lock().lock().expect("env lock");
        env::remove_var("MODEL");
        env::remove_var("AI_PROVIDER");
        let path = unique_config_path("model");
        fs::write(&path, "MODEL=kimi-k2\n").expect("write config");

        let config = Config::load(Some(&path));
        // The file value never reaches the environment; the default applies.
        assert_eq!(config.model, default_model_for(DEFAULT_PROVIDER));

        env::remove_var("MODEL");
        env::remove_var("VERBOSE");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn update_value_replaces_existing_key_in_place() {
        let path = unique_config_path("update");
        fs::write(&path, "VERBOSE=0\nAI_PROVIDER=openai\n").expect("write config");
        update_file_value(&path, "VERBOSE", "2").expect("update");
        let contents = fs::read_to_string(&path).expect("read back");
        assert_eq!(contents, "VERBOSE=2\nAI_PROVIDER=openai\n");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn update_value_appends_missing_key() {
        let path = unique_config_path("append");
        fs::write(&path, "VERBOSE=1\n").expect("write config");
        update_file_value(&path, "AI_PROVIDER", "openrouter").expect("update");
        let contents = fs::read_to_string(&path).expect("read back");
        assert_eq!(contents, "VERBOSE=1\nAI_PROVIDER=openrouter\n");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn default_model_tracks_provider() {
        assert_eq!(default_model_for("openrouter"), "claude-sonnet");
        assert_eq!(default_model_for("openai"), "gpt-5");
        assert_eq!(default_model_for("anything-else"), "gpt-5");
    }
}
