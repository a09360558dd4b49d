//! monarch-route: a query-time road routing engine.
//!
//! The offline toolchain (extractor, contractor) produces an immutable
//! artifact set: a contracted search graph, coordinate, geometry, name,
//! class and lane tables. This crate answers queries over one such
//! snapshot:
//!
//! - snap: coordinates to routable phantom endpoints via an R-tree
//! - route: bidirectional contraction-hierarchy search with stalling,
//!   unpacked into turn-by-turn guidance
//! - table: N x M weight matrices via bucketed backward sweeps
//! - match: HMM map matching of noisy traces
//! - trip: near-optimal visiting order over the matrix
//!
//! Snapshots hot-swap under a generation-checked registry; queries pin
//! their snapshot for the duration of the request and never observe a
//! partial swap.

pub mod cli;
pub mod engine;
pub mod error;
pub mod facade;
pub mod formats;
pub mod geo;
pub mod graph;
pub mod guidance;
pub mod heap;
pub mod hints;
pub mod hotswap;
pub mod matching;
pub mod routing;
pub mod server;
pub mod spatial;
pub mod trip;

pub use engine::{Engine, EngineLimits};
pub use error::{EngineError, EngineResult};
pub use facade::{ArtifactPaths, DataFacade, MappedFacade, OwnedFacade};
pub use hotswap::{LoadMode, SnapshotRegistry};
