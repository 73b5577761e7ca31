//! Shared awesh library exports that keep the three process binaries aligned.

pub mod backend_link;
pub mod config;
pub mod dispatch;
pub mod ipc;
pub mod proxy;
pub mod sandbox;
pub mod shm;
pub mod supervise;
mod telemetry;
pub mod terminal_restore;
pub mod verdict;

pub use telemetry::init_tracing;
