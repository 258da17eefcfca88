//! Bulk insertion.
//!
//! Nodes are inserted in sub-batches. Within a sub-batch the candidate search for
//! every node runs in parallel (rayon) against the graph as it stood before the
//! sub-batch; nodes are then linked one at a time, each one's candidate lists
//! extended with the exact distances to the sub-batch nodes linked before it. Every
//! node therefore still goes through full per-node neighbor selection, so the graph
//! matches one built by individual inserts in quality.
//!
//! Sub-batches are capped at `1 / BULK_GRAPH_FRACTION` of the current graph size,
//! so a small graph grows almost sequentially and a large one in wide parallel steps.

use crate::config::{BULK_GRAPH_FRACTION, BULK_MAX_SUBBATCH};
use crate::distance::simd;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::insert::{by_distance_then_id, LayerCandidates};
use crate::hnsw::VectorSource;
use rayon::prelude::*;
use std::collections::HashSet;

impl HnswGraph {
    /// Inserts every slot of `slots` that is not already in the graph.
    /// Returns the number of nodes added.
    pub fn insert_bulk<S: VectorSource + ?Sized>(&mut self, source: &S, slots: &[u32]) -> usize {
        let mut seen = HashSet::with_capacity(slots.len());
        let pending: Vec<u32> = slots
            .iter()
            .copied()
            .filter(|&s| !self.contains(s) && seen.insert(s))
            .collect();
        let dim = source.dimension();
        let mut done = 0;

        while done < pending.len() {
            if self.is_empty() {
                self.insert(source, pending[done]);
                done += 1;
                continue;
            }

            let size = (self.len() / BULK_GRAPH_FRACTION)
                .clamp(1, BULK_MAX_SUBBATCH)
                .min(pending.len() - done);
            let batch = &pending[done..done + size];

            let levels: Vec<usize> = batch.iter().map(|_| self.random_level()).collect();
            let vectors: Vec<Vec<f32>> = batch
                .iter()
                .map(|&s| {
                    let mut v = vec![0.0; dim];
                    source.decode_into(s, &mut v);
                    v
                })
                .collect();

            let graph = &*self;
            let plans: Vec<LayerCandidates> = vectors
                .par_iter()
                .zip(levels.par_iter())
                .map(|(v, &level)| graph.plan_insert(source, v, level))
                .collect();

            for (j, mut plan) in plans.into_iter().enumerate() {
                let level = levels[j];
                plan.resize(level + 1, Vec::new());
                let norm = simd::norm_sq_f32(&vectors[j]);
                for e in 0..j {
                    let shared = levels[e].min(level);
                    let d = source.distance(self.metric, &vectors[j], norm, batch[e]);
                    for layer_candidates in plan.iter_mut().take(shared + 1) {
                        layer_candidates.push((d, batch[e]));
                    }
                }
                for layer_candidates in plan.iter_mut() {
                    layer_candidates.sort_unstable_by(by_distance_then_id);
                    layer_candidates.truncate(self.config.ef_construction);
                }
                self.link(source, batch[j], level, plan);
            }

            done += size;
            tracing::trace!(done, total = pending.len(), "bulk graph sub-batch linked");
        }

        pending.len()
    }
}
