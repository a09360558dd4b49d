//! Command line interface for the routing daemon.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "monarch-route")]
#[command(about = "Contraction-hierarchy routing engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Long-running query server over a prepared artifact set.
    ///
    /// Exactly one of `<base>` or `--shared-memory` must be given:
    /// `<base>` loads the artifacts into process memory, `--shared-memory`
    /// memory-maps the set published by the swap daemon (location taken
    /// from the MONARCH_DATASET environment variable).
    Routed {
        /// Artifact base path, e.g. /data/germany for /data/germany.hsgr
        base: Option<PathBuf>,

        /// Map the swap daemon's published artifact set instead of
        /// loading a base path
        #[arg(short = 's', long)]
        shared_memory: bool,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        ip: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = 5000)]
        port: u16,

        /// Worker threads (0 = one per core)
        #[arg(short, long, default_value_t = 0)]
        threads: usize,

        /// Maximum coordinates per route request
        #[arg(long, default_value_t = 500)]
        max_viaroute_size: usize,

        /// Maximum coordinates per table request
        #[arg(long, default_value_t = 100)]
        max_table_size: usize,

        /// Maximum trace points per match request
        #[arg(long, default_value_t = 100)]
        max_matching_size: usize,

        /// Maximum coordinates per trip request
        #[arg(long, default_value_t = 100)]
        max_trip_size: usize,

        /// Maximum results per nearest request
        #[arg(long, default_value_t = 100)]
        max_nearest_size: usize,

        /// Settled-node budget per search; exceeding it aborts the request
        #[arg(long)]
        max_settled: Option<usize>,

        /// Log format: text or json
        #[arg(long, default_value = "text")]
        log_format: String,
    },
}
