//! # stratum-cli
//!
//! Command-line interface for inspecting a Stratum merged view.
//!
//! ## Commands
//!
//! - `stratum dump` prints the merged view
//! - `stratum get` prints one key
//! - `stratum sources` lists registered sources
//! - `stratum watch` streams change events until Ctrl-C

pub mod commands;

pub use commands::Cli;
