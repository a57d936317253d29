//! Domain model for the vidflow orchestration engine.
//!
//! Pure types and functions only: no I/O, no async runtime. The engine,
//! the ComfyUI transport and the HTTP API all build on these.

pub mod error;
pub mod extraction;
pub mod job;
pub mod remote;
pub mod server;
pub mod types;
