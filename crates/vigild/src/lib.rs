//! vigild — single-task host for the Vigil health checker.
//!
//! The binary in `main.rs` wires the pieces together; [`host::TaskHost`]
//! owns the task process and is the supervisor its health checker reports to.

pub mod host;

pub use host::TaskHost;
