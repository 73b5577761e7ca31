//! Security proxy process: transparent middleware between the frontend and
//! the backend with pattern-based blocking.

use awesh::config::Config;
use awesh::ipc::Endpoints;
use awesh::proxy::{self, patterns::PatternSet};
use awesh::{init_tracing, supervise};

fn main() {
    if let Err(err) = run() {
        eprintln!("awesh_sec: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = Config::load(None);
    init_tracing(config.verbose);
    let endpoints = Endpoints::from_home()?;
    let patterns = PatternSet::compile()?;
    let shutdown = supervise::shutdown_flag();
    proxy::run(&endpoints, &patterns, shutdown)
}
