//! Coordinate snapping: the R-tree index and phantom endpoints it yields.

pub mod index;
pub mod phantom;

pub use index::{EdgeIndex, EdgeSegment, SnapOptions};
pub use phantom::{PhantomCandidate, PhantomEndpoint, PhantomPair, SegmentId};
