use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP API until Ctrl+C or SIGTERM
    Daemon {
        /// Address to listen on (overrides server.listen)
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Run startup recovery and print what was repaired
    Check {
        /// Snapshot the store and compact the journals afterwards
        #[clap(long, default_value = "false")]
        checkpoint: bool,
    },

    /// List reports, newest first
    List {
        /// active, resolved, archived or all
        #[clap(short, long, default_value = "active")]
        status: String,

        #[clap(short, long, default_value = "0")]
        offset: usize,

        #[clap(short, long, default_value = "10")]
        limit: usize,
    },

    /// Print a single report
    Get {
        /// Report id
        id: String,
    },

    /// Move a report to another status
    SetStatus {
        /// Report id
        id: String,

        /// resolved or archived
        status: String,
    },
}
