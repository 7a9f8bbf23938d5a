//! Command-line interface for agent-sandbox.
//!
//! Provides single-turn, looping and interactive chat commands over one
//! sandboxed agent.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
