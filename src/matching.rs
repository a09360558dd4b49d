//! Map matching: snap noisy traces to the road graph.
//!
//! Hidden Markov model decoded with Viterbi (Newson & Krumm 2009).
//! Emissions are Gaussian in the snap distance, transitions Laplace in the
//! difference between great-circle and through-network distance, with the
//! network distance taken from the CH search of §routing. A timestep where
//! every transition is broken splits the trace into sub-matchings.

use crate::error::{EngineError, EngineResult};
use crate::facade::DataFacade;
use crate::geo::{self, Coordinate};
use crate::heap::with_search_heaps;
use crate::routing::search::{shortest_path, SearchLimits};
use crate::spatial::{EdgeIndex, PhantomCandidate, PhantomEndpoint, PhantomPair, SnapOptions};

/// Default GPS noise standard deviation in meters.
const DEFAULT_GPS_SIGMA: f64 = 10.0;

/// Laplace scale for the transition model, meters. Newson & Krumm suggest
/// the median |route - great-circle| mismatch; 30 m suits urban grids.
const DEFAULT_BETA: f64 = 30.0;

/// Candidates considered per trace point.
const MAX_CANDIDATES: usize = 8;

/// A transition whose distance mismatch exceeds this is broken.
const BROKEN_DISTANCE_M: f64 = 500.0;

/// Search radius floor; accuracy-derived radii never shrink below it.
const MIN_SNAP_RADIUS_M: f64 = 25.0;

#[derive(Debug, Clone, Copy)]
pub struct TracePoint {
    pub coordinate: Coordinate,
    pub timestamp: Option<u64>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    pub gps_sigma: f64,
    pub beta: f64,
    pub limits: SearchLimits,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            gps_sigma: DEFAULT_GPS_SIGMA,
            beta: DEFAULT_BETA,
            limits: SearchLimits::default(),
        }
    }
}

/// One continuous matched stretch of the trace.
#[derive(Debug, Clone)]
pub struct SubMatching {
    /// Chosen snap per matched trace point, in trace order.
    pub phantoms: Vec<PhantomEndpoint>,
    /// Indices into the input trace, parallel to `phantoms`.
    pub point_indices: Vec<usize>,
    /// Mean emission likelihood of the chosen snaps, in (0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matchings: Vec<SubMatching>,
    /// Per input point: (matching index, position within it), or None for
    /// points that could not be matched.
    pub tracepoints: Vec<Option<(usize, usize)>>,
}

pub fn map_match(
    facade: &dyn DataFacade,
    index: &EdgeIndex,
    trace: &[TracePoint],
    options: MatchOptions,
) -> EngineResult<MatchResult> {
    if trace.len() < 2 {
        return Err(EngineError::InvalidInput(
            "a trace needs at least two points".to_string(),
        ));
    }

    let candidates: Vec<Vec<PhantomCandidate>> = trace
        .iter()
        .map(|point| generate_candidates(facade, index, point))
        .collect();

    // contiguous runs of points that produced candidates
    let mut segments: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for (i, candidate_list) in candidates.iter().enumerate() {
        if candidate_list.is_empty() {
            if current.len() >= 2 {
                segments.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        } else {
            current.push(i);
        }
    }
    if current.len() >= 2 {
        segments.push(current);
    }
    if segments.is_empty() {
        return Err(EngineError::NoSegment { index: 0 });
    }

    let mut matchings = Vec::new();
    let mut tracepoints = vec![None; trace.len()];

    for segment in segments {
        for piece in viterbi(facade, trace, &candidates, &segment, options) {
            let matching_index = matchings.len();
            for (position, &point_index) in piece.point_indices.iter().enumerate() {
                tracepoints[point_index] = Some((matching_index, position));
            }
            matchings.push(piece);
        }
    }

    if matchings.is_empty() {
        return Err(EngineError::NoRoute);
    }

    Ok(MatchResult {
        matchings,
        tracepoints,
    })
}

fn generate_candidates(
    facade: &dyn DataFacade,
    index: &EdgeIndex,
    point: &TracePoint,
) -> Vec<PhantomCandidate> {
    let sigma = point.accuracy.unwrap_or(DEFAULT_GPS_SIGMA).max(1.0);
    let radius = (3.0 * sigma).max(MIN_SNAP_RADIUS_M);
    let snap = |r: f64| {
        index.nearest_phantoms(
            facade,
            point.coordinate,
            MAX_CANDIDATES,
            SnapOptions {
                max_distance: Some(r),
                bearing: None,
            },
        )
    };
    let first = snap(radius);
    if first.is_empty() {
        snap(radius * 2.0)
    } else {
        first
    }
}

/// Log-likelihood of observing the point `distance` meters off the road.
fn emission_log(distance: f64, sigma: f64) -> f64 {
    -0.5 * (distance / sigma) * (distance / sigma)
}

/// Decode one segment; splits further wherever every transition into a
/// timestep is broken.
fn viterbi(
    facade: &dyn DataFacade,
    trace: &[TracePoint],
    candidates: &[Vec<PhantomCandidate>],
    segment: &[usize],
    options: MatchOptions,
) -> Vec<SubMatching> {
    let sigma = options.gps_sigma.max(1.0);

    // per timestep: best log-prob and backpointer per candidate
    let mut scores: Vec<Vec<f64>> = Vec::with_capacity(segment.len());
    let mut parents: Vec<Vec<usize>> = Vec::with_capacity(segment.len());
    // positions where the chain broke, each starts a new sub-matching
    let mut cut_points: Vec<usize> = vec![0];

    scores.push(
        candidates[segment[0]]
            .iter()
            .map(|c| emission_log(c.distance, sigma))
            .collect(),
    );
    parents.push(vec![0; candidates[segment[0]].len()]);

    for t in 1..segment.len() {
        let previous_point = trace[segment[t - 1]].coordinate;
        let current_point = trace[segment[t]].coordinate;
        let great_circle = geo::haversine_m(previous_point, current_point);

        let previous_candidates = &candidates[segment[t - 1]];
        let current_candidates = &candidates[segment[t]];
        let mut step_scores = vec![f64::NEG_INFINITY; current_candidates.len()];
        let mut step_parents = vec![0usize; current_candidates.len()];

        for (j, candidate) in current_candidates.iter().enumerate() {
            let emit = emission_log(candidate.distance, sigma);
            for (i, previous) in previous_candidates.iter().enumerate() {
                if scores[t - 1][i] == f64::NEG_INFINITY {
                    continue;
                }
                let Some(route_m) =
                    route_distance_m(facade, &previous.phantom, &candidate.phantom, options.limits)
                else {
                    continue;
                };
                let mismatch = (great_circle - route_m).abs();
                if mismatch > BROKEN_DISTANCE_M {
                    continue;
                }
                let score = scores[t - 1][i] + emit - mismatch / options.beta;
                if score > step_scores[j] {
                    step_scores[j] = score;
                    step_parents[j] = i;
                }
            }
        }

        if step_scores.iter().all(|&s| s == f64::NEG_INFINITY) {
            // broken: restart the chain at t
            cut_points.push(t);
            for (j, candidate) in current_candidates.iter().enumerate() {
                step_scores[j] = emission_log(candidate.distance, sigma);
                step_parents[j] = j;
            }
        }

        scores.push(step_scores);
        parents.push(step_parents);
    }

    cut_points.push(segment.len());

    let mut out = Vec::new();
    for window in cut_points.windows(2) {
        let (begin, end) = (window[0], window[1]);
        if end - begin < 2 {
            continue;
        }

        // backtrack from the best final candidate of this piece
        let last = end - 1;
        let Some((mut best_candidate, _)) = scores[last]
            .iter()
            .enumerate()
            .filter(|(_, s)| **s > f64::NEG_INFINITY)
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        else {
            continue;
        };

        let mut chosen = vec![0usize; end - begin];
        for t in (begin..end).rev() {
            chosen[t - begin] = best_candidate;
            if t > begin {
                best_candidate = parents[t][best_candidate];
            }
        }

        let mut phantoms = Vec::with_capacity(end - begin);
        let mut point_indices = Vec::with_capacity(end - begin);
        let mut emission_sum = 0.0;
        for (offset, &candidate_index) in chosen.iter().enumerate() {
            let t = begin + offset;
            let candidate = &candidates[segment[t]][candidate_index];
            emission_sum += emission_log(candidate.distance, sigma);
            phantoms.push(candidate.phantom);
            point_indices.push(segment[t]);
        }

        out.push(SubMatching {
            confidence: (emission_sum / (end - begin) as f64).exp(),
            phantoms,
            point_indices,
        });
    }

    out
}

/// Through-network distance between two snaps in meters: the unpacked path
/// of the fastest route, measured along its geometry.
fn route_distance_m(
    facade: &dyn DataFacade,
    source: &PhantomEndpoint,
    target: &PhantomEndpoint,
    limits: SearchLimits,
) -> Option<f64> {
    let pair = PhantomPair {
        source: *source,
        target: *target,
    };
    let route = with_search_heaps(facade.num_nodes(), |heaps| {
        shortest_path(facade, heaps, &pair, limits)
    })
    .ok()?;

    if route.path.len() <= 1 {
        // both snaps on one segment
        return Some(geo::haversine_m(source.location, target.location));
    }
    let mut distance = 0.0;
    let mut previous = source.location;
    for &node in &route.path[1..] {
        let next = facade.coordinate(node);
        distance += geo::haversine_m(previous, next);
        previous = next;
    }
    distance += geo::haversine_m(previous, target.location);
    Some(distance)
}
