//! CLI subcommand implementations.

pub mod limits;
pub mod serve;
pub mod status;
