//! Lattice CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// Lattice - client credential issuance for the cluster API server
#[derive(Parser, Debug)]
#[command(name = "lattice")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Issue client certificates and render kubeconfigs
    Kubeconfig(commands::kubeconfig::KubeconfigArgs),
}

impl Cli {
    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Kubeconfig(args) => commands::kubeconfig::run(args),
        }
    }
}
