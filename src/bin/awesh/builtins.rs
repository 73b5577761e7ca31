//! The `awe*` control vocabulary, handled entirely inside the frontend.

use awesh::backend_link::BackendLink;
use awesh::config::{self, Config};
use awesh::ipc::wire::Request;
use awesh::supervise::{ChildKind, Supervisor};

const SUPPORTED_MODELS: &[(&str, &str)] = &[
    ("gpt-4", "OpenAI"),
    ("gpt-5", "OpenAI"),
    ("kimi-k2", "OpenRouter"),
    ("claude-sonnet", "OpenRouter"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Builtin {
    Help,
    Status,
    Verbose(Option<String>),
    Provider(Option<String>),
    Model(Option<String>),
    Exit,
}

/// Match the control vocabulary; anything else goes to the dispatcher.
pub fn parse(line: &str) -> Option<Builtin> {
    if line == "exit" || line == "quit" {
        return Some(Builtin::Exit);
    }
    if line == "aweh" {
        return Some(Builtin::Help);
    }
    if line == "awes" {
        return Some(Builtin::Status);
    }
    for (prefix, build) in [
        ("awev", Builtin::Verbose as fn(Option<String>) -> Builtin),
        ("awea", Builtin::Provider as fn(Option<String>) -> Builtin),
        ("awem", Builtin::Model as fn(Option<String>) -> Builtin),
    ] {
        if line == prefix {
            return Some(build(None));
        }
        if let Some(rest) = line.strip_prefix(prefix) {
            if let Some(arg) = rest.strip_prefix(' ') {
                return Some(build(Some(arg.trim().to_string())));
            }
        }
    }
    None
}

pub struct BuiltinCtx<'a> {
    pub config: &'a mut Config,
    pub backend: &'a mut BackendLink,
    pub supervisor: &'a Supervisor,
}

/// Handle one builtin; returns true when the shell should exit.
pub fn handle(builtin: &Builtin, ctx: &mut BuiltinCtx<'_>) -> bool {
    match builtin {
        Builtin::Exit => return true,
        Builtin::Help => print_help(),
        Builtin::Status => print_status(ctx),
        Builtin::Verbose(arg) => handle_verbose(arg.as_deref(), ctx),
        Builtin::Provider(arg) => handle_provider(arg.as_deref(), ctx),
        Builtin::Model(arg) => handle_model(arg.as_deref(), ctx),
    }
    false
}

fn print_help() {
    println!("awesh control commands:");
    println!("  aweh               show this help");
    println!("  awes               show status (provider, model, children)");
    println!("  awev [0|1|2|on|off] show or set the verbosity level");
    println!("  awea [openai|openrouter] show or switch the AI provider");
    println!("  awem <model>       show or switch the model");
    println!("  exit / quit        leave the shell");
}

fn print_status(ctx: &BuiltinCtx<'_>) {
    println!("provider: {}", ctx.config.provider);
    println!("model: {}", ctx.config.model);
    println!(
        "verbose: {} (0=silent, 1=info, 2=debug)",
        ctx.config.verbose
    );
    println!("ai status: {}", ctx.backend.status.label());
    for kind in ChildKind::ALL {
        let state = if ctx.supervisor.is_alive(kind) {
            "running"
        } else {
            "down"
        };
        println!("{}: {state}", kind.label());
    }
    println!(
        "session: {}",
        if config::is_ssh_session() {
            "ssh"
        } else {
            "local"
        }
    );
    println!("config: {}", ctx.config.path().display());
}

fn handle_verbose(arg: Option<&str>, ctx: &mut BuiltinCtx<'_>) {
    let level = match arg {
        None => {
            println!(
                "verbose: {} (0=silent, 1=info, 2=debug)",
                ctx.config.verbose
            );
            return;
        }
        Some("on") => 1,
        Some("off") => 0,
        Some(raw) => match raw.parse::<u8>() {
            Ok(level @ 0..=2) => level,
            _ => {
                println!("usage: awev [0|1|2|on|off]");
                return;
            }
        },
    };
    if ctx.config.update_value("VERBOSE", &level.to_string()).is_err() {
        println!("warning: could not persist VERBOSE to the config file");
    }
    std::env::set_var("VERBOSE", level.to_string());
    ctx.backend.send_control(&Request::Verbose(level));
    ctx.config.verbose = level;
    println!("verbose level set to {level}");
}

fn handle_provider(arg: Option<&str>, ctx: &mut BuiltinCtx<'_>) {
    match arg {
        None => {
            println!("provider: {}", ctx.config.provider);
            println!("model: {}", ctx.config.model);
        }
        Some(name @ ("openai" | "openrouter")) => {
            if ctx.config.update_value("AI_PROVIDER", name).is_err() {
                println!("warning: could not persist AI_PROVIDER to the config file");
            }
            std::env::set_var("AI_PROVIDER", name);
            ctx.backend.send_control(&Request::Provider(name.to_string()));
            ctx.config.provider = name.to_string();
            println!("provider switched to {name} (restart awesh to take full effect)");
        }
        Some(_) => println!("usage: awea [openai|openrouter]"),
    }
}

fn handle_model(arg: Option<&str>, ctx: &mut BuiltinCtx<'_>) {
    match arg {
        None => {
            println!("model: {}", ctx.config.model);
            println!("supported models:");
            for (model, provider) in SUPPORTED_MODELS {
                println!("  {model} ({provider})");
            }
        }
        Some(name) if SUPPORTED_MODELS.iter().any(|(model, _)| model == &name) => {
            std::env::set_var("MODEL", name);
            ctx.backend.send_control(&Request::Model(name.to_string()));
            ctx.config.model = name.to_string();
            println!("model switched to {name}");
        }
        Some(name) => {
            println!("unsupported model: {name}");
            let names: Vec<&str> = SUPPORTED_MODELS.iter().map(|(model, _)| *model).collect();
            println!("supported models: {}", names.join(", "));
        }
    }
}
