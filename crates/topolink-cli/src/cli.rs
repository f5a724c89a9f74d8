use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "topolink", author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    /// Configuration file (YAML, JSON accepted)
    #[arg(long, default_value = "app.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest CIM exports: sync, repair, stitch and notify each current feeder
    Ingest {
        /// Export file, or a directory walked for *.xml
        path: PathBuf,
        /// Worker threads (0 = one per CPU); overrides the config file
        #[arg(long)]
        workers: Option<usize>,
        /// Write the run manifest JSON here
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Remove exports that were processed without a file-level error
        #[arg(long)]
        delete_processed: bool,
    },
    /// Run the connectivity repair passes on one stored feeder
    Repair {
        /// Internal feeder id
        feeder: String,
        /// Override the configured iteration bound
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Print the repair report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Attach one stored feeder to its main-network junction
    Stitch {
        /// Internal feeder id
        feeder: String,
        /// Main-network junction device, when the join descriptor names none
        #[arg(long)]
        main_device: Option<String>,
        /// Feeder-side junction device, when the join descriptor names none
        #[arg(long)]
        sub_device: Option<String>,
    },
    /// Graph utilities over a stored feeder
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum GraphCommands {
    /// Graph stats summary
    Stats {
        /// Internal feeder id
        feeder: String,
    },
    /// List the connected components of a feeder
    Islands {
        /// Internal feeder id
        feeder: String,
        /// Emit the devices of every island
        #[arg(long)]
        emit: bool,
    },
    /// Export the feeder graph
    Export {
        /// Internal feeder id
        feeder: String,
        /// Output format (dot)
        #[arg(long, default_value = "dot")]
        format: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}
