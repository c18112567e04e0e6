//! Worker process ownership

pub mod diagnostics;
pub mod handle;

pub use diagnostics::{drain_diagnostics, DiagnosticTail, DIAGNOSTIC_TAIL_LINES, MAX_DIAGNOSTIC_LINE};
pub use handle::{WorkerExit, WorkerHandle, WorkerSpec};
