//! awesh frontend: line editor, classification dispatcher, and supervisor
//! for the sandbox, security proxy, and backend children.

mod builtins;
mod prompt;

use anyhow::{Context, Result};
use awesh::backend_link::{AiStatus, BackendLink};
use awesh::config::Config;
use awesh::dispatch::{self, DispatchCtx};
use awesh::ipc::oob::{self, OobMessage};
use awesh::ipc::{self, Endpoints};
use awesh::supervise::{ChildKind, Supervisor, LIVENESS_EVERY_PROMPTS};
use awesh::{init_tracing, terminal_restore};
use builtins::BuiltinCtx;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "awesh", version, about = "AI-augmented interactive shell")]
struct CliArgs {
    /// Verbosity override: 0 silent, 1 info, 2 debug.
    #[arg(long, env = "VERBOSE")]
    verbose: Option<u8>,

    /// Alternate config file (default ~/.aweshrc).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = CliArgs::parse();
    if let Err(err) = run(args) {
        eprintln!("awesh: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    let mut config = Config::load(args.config.as_deref());
    if let Some(level) = args.verbose {
        config.verbose = level;
        std::env::set_var("VERBOSE", level.to_string());
    }
    init_tracing(config.verbose);
    terminal_restore::install_terminal_panic_hook();

    let endpoints = Endpoints::from_home()?;
    let shutdown = awesh::supervise::shutdown_flag();

    // The frontend owns only the out-of-band listener; each child binds its
    // own server socket.
    ipc::unlink_stale(&endpoints.frontend);
    let oob_listener = match UnixListener::bind(&endpoints.frontend) {
        Ok(listener) => {
            let _ = listener.set_nonblocking(true);
            Some(listener)
        }
        Err(err) => {
            // Degrade: the shell works without out-of-band updates.
            println!("warning: could not bind the out-of-band listener: {err}");
            None
        }
    };

    let mut supervisor = Supervisor::new();
    supervisor.spawn_all();
    let mut backend = BackendLink::new(&endpoints);

    println!("awesh v{} - Awe-Inspired Workspace Environment Shell", env!("CARGO_PKG_VERSION"));
    println!("Type 'aweh' to see available control commands");

    let mut editor = DefaultEditor::new().context("initializing line editor")?;
    let mut prompt_counter: u32 = 0;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        prompt_counter += 1;
        if prompt_counter % LIVENESS_EVERY_PROMPTS == 0 {
            supervisor.tick();
        }

        if let Some(listener) = &oob_listener {
            for message in oob::drain_listener(listener) {
                handle_oob(message, &mut config);
            }
        }

        // Lazy backend reconnect plus a status refresh while it loads.
        if backend.try_connect() && backend.status != AiStatus::Ready {
            backend.poll_status();
        }

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let context_line = prompt::render(
            prompt::backend_glyph(supervisor.is_alive(ChildKind::Backend), backend.status),
            prompt::health_glyph(supervisor.is_alive(ChildKind::Proxy)),
            prompt::health_glyph(supervisor.is_alive(ChildKind::Sandbox)),
            &prompt::username(),
            &prompt::hostname(),
            &cwd,
        );
        println!("{context_line}");

        let line = match editor.readline(prompt::INPUT_MARKER) {
            Ok(line) => line,
            // Ctrl-C aborts the current edit and never reaches children.
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                // Only failure to read input terminates the frontend.
                debug!("line editor failed: {err}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line.as_str());

        if let Some(builtin) = builtins::parse(line.trim()) {
            let mut ctx = BuiltinCtx {
                config: &mut config,
                backend: &mut backend,
                supervisor: &supervisor,
            };
            if builtins::handle(&builtin, &mut ctx) {
                break;
            }
            continue;
        }

        let mut ctx = DispatchCtx {
            endpoints: &endpoints,
            backend: &mut backend,
            sandbox_ready: supervisor.is_alive(ChildKind::Sandbox),
            verbose: config.verbose,
        };
        dispatch::dispatch_line(&mut ctx, &line);
    }

    supervisor.shutdown();
    endpoints.remove_all();
    println!("Goodbye!");
    Ok(())
}

fn handle_oob(message: OobMessage, config: &mut Config) {
    match message {
        OobMessage::StatusUpdate(text) => {
            if config.verbose >= 2 {
                println!("security agent status: {text}");
            }
        }
        OobMessage::SecurityAlert(text) => println!("SECURITY ALERT: {text}"),
        OobMessage::ThreatDetected(text) => println!("THREAT DETECTED: {text}"),
        OobMessage::VerboseUpdate(level) => {
            if level != config.verbose {
                config.verbose = level;
                std::env::set_var("VERBOSE", level.to_string());
                if config.verbose >= 1 {
                    println!("verbose level updated to {level}");
                }
            }
        }
    }
}
