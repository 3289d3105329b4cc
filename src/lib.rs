//! Cloud Harness - a control plane for running and supervising autonomous
//! coding agents against real git repositories.

pub mod adapters;
pub mod cli;
pub mod core;
