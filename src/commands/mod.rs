//! CLI subcommands

pub mod k8s;
pub mod remote;
