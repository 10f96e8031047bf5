//! fast-ci CLI
//!
//! Provides the `fast-ci` binary that runs one CI node of an orchestrated
//! test build.

pub mod commands;
pub mod output;
