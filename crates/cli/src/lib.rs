//! Command line surface for shelver: argument parsing, exit codes and
//! summary rendering. `main.rs` wires these to the core pipeline.
pub mod args;
pub mod exit;
pub mod report;
