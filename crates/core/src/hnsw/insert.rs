//! HNSW insertion.
//!
//! Insertion is split into a read-only planning phase, which searches the graph for
//! candidate neighbors on every layer the new node will occupy, and a linking phase,
//! which connects the node bidirectionally and prunes neighbor lists that overflow.
//! Bulk insertion runs the planning phase of many nodes in parallel.

use crate::distance::{simd, DistanceMetric};
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::search::{descend, search_layer, SEARCH_VISITED};
use crate::hnsw::VectorSource;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Candidate neighbors per layer, index = layer, each sorted by ascending distance.
pub(crate) type LayerCandidates = Vec<Vec<(f32, u32)>>;

#[inline]
pub(crate) fn by_distance_then_id(a: &(f32, u32), b: &(f32, u32)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

impl HnswGraph {
    /// Inserts `slot` into the graph. No-op if it is already present.
    pub fn insert<S: VectorSource + ?Sized>(&mut self, source: &S, slot: u32) {
        if self.contains(slot) {
            return;
        }
        let level = self.random_level();
        let mut vector = vec![0.0; source.dimension()];
        source.decode_into(slot, &mut vector);
        let plan = self.plan_insert(source, &vector, level);
        self.link(source, slot, level, plan);
    }

    /// Searches for the neighbors a node at `level` would get, without mutating the graph.
    ///
    /// Returns one candidate list per layer `0..=min(level, max_layer)`.
    pub(crate) fn plan_insert<S: VectorSource + ?Sized>(
        &self,
        source: &S,
        vector: &[f32],
        level: usize,
    ) -> LayerCandidates {
        let Some(entry_point) = self.entry_point else {
            return Vec::new();
        };

        SEARCH_VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.ensure_capacity(self.layers.len());
            let norm = simd::norm_sq_f32(vector);

            let ep = descend(
                self,
                source,
                vector,
                norm,
                entry_point,
                self.max_layer,
                level,
                &mut visited,
            );

            let top = level.min(self.max_layer);
            let mut per_layer: LayerCandidates = vec![Vec::new(); top + 1];
            let mut eps = vec![ep];
            let any = |_: u32| true;
            for layer in (0..=top).rev() {
                let candidates = search_layer(
                    self,
                    source,
                    vector,
                    norm,
                    &eps,
                    self.config.ef_construction,
                    layer,
                    &mut visited,
                    &any,
                );
                eps.clear();
                eps.extend(candidates.iter().map(|&(_, id)| id));
                if eps.is_empty() {
                    eps.push(ep);
                }
                per_layer[layer] = candidates;
            }
            per_layer
        })
    }

    /// Adds `slot` at `level` and connects it to the planned candidates.
    pub(crate) fn link<S: VectorSource + ?Sized>(
        &mut self,
        source: &S,
        slot: u32,
        level: usize,
        per_layer: LayerCandidates,
    ) {
        self.add_node(slot, level);
        let metric = self.metric;

        for (layer, candidates) in per_layer.into_iter().enumerate().take(level + 1) {
            let m_max = self.config.max_links(layer);
            let selected = select_neighbors_heuristic(source, metric, candidates, m_max);
            self.neighbors[slot as usize][layer] = selected.iter().map(|&(_, id)| id).collect();

            for &(_, neighbor) in &selected {
                let list = &mut self.neighbors[neighbor as usize][layer];
                list.push(slot);
                if list.len() > m_max {
                    self.prune(source, neighbor, layer, m_max);
                }
            }
        }
    }

    /// Shrinks `node`'s neighbor list on `layer` back to `m_max` with the heuristic.
    fn prune<S: VectorSource + ?Sized>(
        &mut self,
        source: &S,
        node: u32,
        layer: usize,
        m_max: usize,
    ) {
        let mut base = vec![0.0; source.dimension()];
        source.decode_into(node, &mut base);
        let norm = simd::norm_sq_f32(&base);
        let metric = self.metric;
        let candidates: Vec<(f32, u32)> = self.neighbors[node as usize][layer]
            .iter()
            .map(|&c| (source.distance(metric, &base, norm, c), c))
            .collect();
        let kept = select_neighbors_heuristic(source, metric, candidates, m_max);
        self.neighbors[node as usize][layer] = kept.into_iter().map(|(_, id)| id).collect();
    }
}

/// Heuristic neighbor selection (Algorithm 4 of the HNSW paper).
///
/// A candidate is taken only if it is closer to the base node than to every
/// neighbor already taken, which keeps links spread across directions. Remaining
/// capacity is then filled with the closest skipped candidates.
pub(crate) fn select_neighbors_heuristic<S: VectorSource + ?Sized>(
    source: &S,
    metric: DistanceMetric,
    mut candidates: Vec<(f32, u32)>,
    m: usize,
) -> Vec<(f32, u32)> {
    candidates.sort_unstable_by(by_distance_then_id);
    candidates.dedup_by_key(|c| c.1);
    if candidates.len() <= m {
        return candidates;
    }

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    let mut buf = vec![0.0; source.dimension()];

    for &(dist_to_base, cid) in &candidates {
        if selected.len() >= m {
            break;
        }
        source.decode_into(cid, &mut buf);
        let norm = simd::norm_sq_f32(&buf);
        let diverse = selected
            .iter()
            .all(|&(_, sid)| dist_to_base <= source.distance(metric, &buf, norm, sid));
        if diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        let taken: HashSet<u32> = selected.iter().map(|&(_, id)| id).collect();
        for &c in &candidates {
            if selected.len() >= m {
                break;
            }
            if !taken.contains(&c.1) {
                selected.push(c);
            }
        }
        selected.sort_unstable_by(by_distance_then_id);
    }
    selected
}
