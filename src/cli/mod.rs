//! CLI module for ocrgate - command-line interface and subcommands.
//!
//! Every service runs from the same binary; the subcommand picks which one.

pub mod commands;

pub use commands::Cli;
