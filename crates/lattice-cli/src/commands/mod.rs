//! CLI commands

pub mod kubeconfig;
