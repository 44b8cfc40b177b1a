//! CLI module for tabulator - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
