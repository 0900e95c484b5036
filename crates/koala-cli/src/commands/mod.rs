//! CLI subcommand implementations

pub mod build;
pub mod dis;
pub mod run;
