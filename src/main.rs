use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use monarch_route::cli::{Cli, Commands};
use monarch_route::engine::{Engine, EngineLimits};
use monarch_route::facade::ArtifactPaths;
use monarch_route::hotswap::{LoadMode, SnapshotRegistry};
use monarch_route::server;

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 1;
const EXIT_NOT_FOUND: u8 = 2;
const EXIT_INTERNAL: u8 = 3;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Routed {
            base,
            shared_memory,
            ip,
            port,
            threads,
            max_viaroute_size,
            max_table_size,
            max_matching_size,
            max_trip_size,
            max_nearest_size,
            max_settled,
            log_format,
        } => {
            server::init_tracing(&log_format);

            // exactly one data source
            let (paths, mode) = match (base, shared_memory) {
                (Some(base), false) => (ArtifactPaths::new(base), LoadMode::InProcess),
                (None, true) => match std::env::var("MONARCH_DATASET") {
                    Ok(published) => (ArtifactPaths::new(published), LoadMode::Mapped),
                    Err(_) => {
                        eprintln!("--shared-memory requires MONARCH_DATASET to be set");
                        return ExitCode::from(EXIT_USAGE);
                    }
                },
                (Some(_), true) => {
                    eprintln!("give either a base path or --shared-memory, not both");
                    return ExitCode::from(EXIT_USAGE);
                }
                (None, false) => {
                    eprintln!("either a base path or --shared-memory is required");
                    return ExitCode::from(EXIT_USAGE);
                }
            };

            if !paths.exists() {
                eprintln!("no artifact set at {}", paths.base().display());
                return ExitCode::from(EXIT_NOT_FOUND);
            }

            let registry = match SnapshotRegistry::open(paths, mode) {
                Ok(registry) => Arc::new(registry),
                Err(error) => {
                    eprintln!("failed to load snapshot: {error:#}");
                    return ExitCode::from(EXIT_INTERNAL);
                }
            };

            let limits = EngineLimits {
                max_viaroute_size,
                max_table_size,
                max_matching_size,
                max_trip_size,
                max_nearest_size,
                max_settled,
            };
            let engine = Arc::new(Engine::new(registry, limits));

            let mut builder = tokio::runtime::Builder::new_multi_thread();
            if threads > 0 {
                builder.worker_threads(threads);
            }
            let runtime = match builder.enable_all().build() {
                Ok(runtime) => runtime,
                Err(error) => {
                    eprintln!("failed to start runtime: {error}");
                    return ExitCode::from(EXIT_INTERNAL);
                }
            };

            match runtime.block_on(server::serve(engine, &ip, port)) {
                Ok(()) => ExitCode::from(EXIT_OK),
                Err(error) => {
                    eprintln!("server failed: {error:#}");
                    ExitCode::from(EXIT_INTERNAL)
                }
            }
        }
    }
}
