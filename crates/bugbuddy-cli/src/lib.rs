//! The `bugbuddy` command line.

pub mod cli;
pub mod commands;
pub mod logging;
