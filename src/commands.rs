//! CLI command definitions
//!
//! Defines the clap commands for the scenario CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one scenario session
    Run {
        /// Provider category (script folder), e.g. IaasVm
        #[arg(long, short)]
        category: String,

        /// Fully qualified calling class, e.g. Backup.Test.ItemTests
        #[arg(long)]
        class: String,

        /// Session name; also the fixture name
        #[arg(long)]
        name: String,

        /// Override the HTTP mode (auto, record, playback)
        #[arg(long)]
        mode: Option<String>,

        /// Resource namespace exported to scripts
        #[arg(long)]
        resource_namespace: Option<String>,

        /// Script identifiers to run after loading the manifest
        scripts: Vec<String>,
    },

    /// Run every session of a YAML test plan
    Plan {
        /// Path to the YAML plan file
        path: PathBuf,

        /// Override the HTTP mode (auto, record, playback)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Print the script manifest for a test class
    Manifest {
        /// Provider category (script folder)
        #[arg(long, short)]
        category: String,

        /// Fully qualified calling class
        #[arg(long)]
        class: String,
    },

    /// List recorded fixtures
    Fixtures {
        /// Only list fixtures of this class (short or fully qualified)
        #[arg(long)]
        class: Option<String>,
    },
}
