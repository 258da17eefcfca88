//! HNSW search: single-layer beam search and multi-layer k-NN.
//!
//! Results are restricted by an `accept` predicate evaluated during traversal.
//! Rejected nodes (deleted or filtered out) still route the search but never
//! appear in the output.

use crate::distance::simd;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::visited::VisitedSet;
use crate::hnsw::VectorSource;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

thread_local! {
    /// Per-thread visited set, reused across searches and construction.
    pub(crate) static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Result heap entry ordered by `(distance, slot)`, so ties break deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Beam search on one layer.
///
/// Returns up to `ef` accepted nodes sorted by ascending distance. `visited` is
/// cleared on entry.
#[allow(clippy::too_many_arguments)]
pub fn search_layer<S: VectorSource + ?Sized, F: Fn(u32) -> bool>(
    graph: &HnswGraph,
    source: &S,
    query: &[f32],
    query_norm_sq: f32,
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    accept: &F,
) -> Vec<(f32, u32)> {
    visited.clear();
    let metric = graph.metric;
    // Min-heap of nodes to expand.
    let mut candidates: BinaryHeap<Reverse<ResultEntry>> = BinaryHeap::with_capacity(ef * 2);
    // Max-heap of the best `ef` accepted nodes.
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    let mut worst = f32::MAX;

    for &ep in entry_points {
        if !visited.insert(ep) {
            continue;
        }
        let d = source.distance(metric, query, query_norm_sq, ep);
        let entry = ResultEntry {
            distance: OrderedFloat(d),
            id: ep,
        };
        candidates.push(Reverse(entry));
        if accept(ep) {
            results.push(entry);
            if results.len() > ef {
                results.pop();
            }
            if results.len() >= ef {
                worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
            }
        }
    }

    while let Some(Reverse(current)) = candidates.pop() {
        if results.len() >= ef && current.distance.0 > worst {
            break;
        }

        for &neighbor in graph.neighbors(current.id, layer) {
            if !visited.insert(neighbor) {
                continue;
            }
            let d = source.distance(metric, query, query_norm_sq, neighbor);
            if results.len() < ef || d < worst {
                let entry = ResultEntry {
                    distance: OrderedFloat(d),
                    id: neighbor,
                };
                candidates.push(Reverse(entry));
                if accept(neighbor) {
                    results.push(entry);
                    if results.len() > ef {
                        results.pop();
                    }
                    if results.len() >= ef {
                        worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
                    }
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Greedy descent with `ef = 1` from `ep` on `from_layer` down to (but excluding) `to_layer`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn descend<S: VectorSource + ?Sized>(
    graph: &HnswGraph,
    source: &S,
    query: &[f32],
    query_norm_sq: f32,
    mut ep: u32,
    from_layer: usize,
    to_layer: usize,
    visited: &mut VisitedSet,
) -> u32 {
    let any = |_: u32| true;
    for layer in (to_layer + 1..=from_layer).rev() {
        let nearest = search_layer(
            graph,
            source,
            query,
            query_norm_sq,
            std::slice::from_ref(&ep),
            1,
            layer,
            visited,
            &any,
        );
        if let Some(&(_, id)) = nearest.first() {
            ep = id;
        }
    }
    ep
}

/// Multi-layer k-NN search.
///
/// Upper layers are traversed greedily; layer 0 is searched with beam width
/// `max(ef, k)`. When fewer than `k` accepted nodes are found (selective filters,
/// many tombstones) the beam is doubled, up to four times its starting width.
/// Returns the nearest `k` `(distance, slot)` pairs in ascending order, plus any
/// further result tied with the `k`-th, so callers can break ties on their own key.
pub fn knn_search<S: VectorSource + ?Sized, F: Fn(u32) -> bool>(
    graph: &HnswGraph,
    source: &S,
    query: &[f32],
    k: usize,
    ef: usize,
    accept: &F,
) -> Vec<(f32, u32)> {
    let Some(entry_point) = graph.entry_point() else {
        return Vec::new();
    };
    if k == 0 {
        return Vec::new();
    }

    SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(graph.layers.len());
        let query_norm_sq = simd::norm_sq_f32(query);

        let ep = descend(
            graph,
            source,
            query,
            query_norm_sq,
            entry_point,
            graph.max_layer(),
            0,
            &mut visited,
        );

        let base_ef = ef.max(k);
        let max_ef = (base_ef * 4).min(graph.len()).max(base_ef);
        let mut ef = base_ef;
        let mut results;
        loop {
            results = search_layer(
                graph,
                source,
                query,
                query_norm_sq,
                std::slice::from_ref(&ep),
                ef,
                0,
                &mut visited,
                accept,
            );
            if results.len() >= k || ef >= max_ef {
                break;
            }
            ef = (ef * 2).min(max_ef);
        }

        if let Some(&(cut, _)) = results.get(k - 1) {
            let end = results.partition_point(|&(d, _)| d <= cut);
            results.truncate(end);
        }
        results
    })
}
