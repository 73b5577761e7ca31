//! Sandbox validator process: answers "would this line succeed as shell?"
//! against a read-only copy of the filesystem.

use awesh::config::Config;
use awesh::ipc::Endpoints;
use awesh::{init_tracing, sandbox, supervise};

fn main() {
    if let Err(err) = run() {
        eprintln!("awesh_sandbox: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = Config::load(None);
    init_tracing(config.verbose);
    let endpoints = Endpoints::from_home()?;
    let shutdown = supervise::shutdown_flag();
    sandbox::run(&endpoints, shutdown)
}
