//! The orchestration gateway: HTTP/WS control plane, the
//! turn-round orchestrator, and the CLI surface, wired together in
//! `main.rs`'s bootstrap sequence.

pub mod api;
pub mod cli;
pub mod orchestrator;
pub mod state;
