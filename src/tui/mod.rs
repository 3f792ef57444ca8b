//! TUI debugger.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and flags view
//! - Memory hexdump, one segment per row
//! - Step/run/breakpoint controls
//! - Disassembly view around cs:ip

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
