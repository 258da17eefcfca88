//! Query engine.
//!
//! A search runs against two disjoint populations: the write buffer, always
//! scanned exactly, and the indexed vectors, scanned exactly or searched through
//! the graph depending on the [`SearchPath`]. Both candidate lists are already
//! restricted to live records that pass the filter; they are merged, ranked by
//! `(distance, id)` and cut to `k`.

use crate::config::{AUTO_BEAMWIDTH_CAP, MAX_BEAMWIDTH, MAX_K};
use crate::distance::DistanceMetric;
use crate::error::{DatabaseError, Result, ValidationError};
use crate::hnsw::{knn_search, HnswGraph};
use crate::search::filter::MetadataFilter;
use crate::search::types::{SearchParams, SearchResult};
use crate::selector::SearchPath;
use crate::storage::vector_store::{query_norm_sq, validate_vector, SlotState, VectorStore};
use crate::storage::write_buffer::WriteBuffer;
use ordered_float::OrderedFloat;
use std::collections::{BinaryHeap, HashSet};

/// Exact top-`k` over `slots`, ascending by `(distance, id)`.
pub fn flat_scan<I, F>(
    store: &VectorStore,
    metric: DistanceMetric,
    query: &[f32],
    slots: I,
    k: usize,
    accept: &F,
) -> Vec<(f32, u32)>
where
    I: IntoIterator<Item = u32>,
    F: Fn(u32) -> bool,
{
    if k == 0 {
        return Vec::new();
    }
    let norm = query_norm_sq(query);
    let mut heap: BinaryHeap<(OrderedFloat<f32>, &str, u32)> = BinaryHeap::with_capacity(k + 1);
    for slot in slots {
        if !accept(slot) {
            continue;
        }
        let Some(id) = store.id_of(slot) else {
            continue;
        };
        let entry = (OrderedFloat(store.distance_to(metric, query, norm, slot)), id, slot);
        if heap.len() < k {
            heap.push(entry);
        } else if heap.peek().is_some_and(|top| entry < *top) {
            heap.pop();
            heap.push(entry);
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|(d, _, s)| (d.0, s))
        .collect()
}

/// Default graph beam width: `ef_search`, widened for large graphs.
pub fn auto_beamwidth(ef_search: usize, indexed: usize, k: usize) -> usize {
    let scaled = ((indexed as f64).sqrt() / 4.0) as usize;
    ef_search.max(scaled).min(AUTO_BEAMWIDTH_CAP.max(ef_search)).max(k)
}

/// Rejects a malformed query before any state is read.
pub fn validate_query(
    query: &[f32],
    dimension: Option<usize>,
    params: &SearchParams,
) -> std::result::Result<Option<MetadataFilter>, ValidationError> {
    validate_vector(query, dimension)?;
    if params.k == 0 || params.k > MAX_K {
        return Err(ValidationError::InvalidK {
            k: params.k,
            max: MAX_K,
        });
    }
    if let Some(bw) = params.beamwidth {
        if bw == 0 || bw > MAX_BEAMWIDTH {
            return Err(ValidationError::InvalidBeamwidth {
                beamwidth: bw,
                max: MAX_BEAMWIDTH,
            });
        }
    }
    match &params.filter {
        Some(f) => {
            let filter = MetadataFilter::new(f)?;
            Ok((!filter.is_empty()).then_some(filter))
        }
        None => Ok(None),
    }
}

/// Read-only view over one collection's state for the duration of a search.
pub struct QueryEngine<'a> {
    store: &'a VectorStore,
    buffer: &'a WriteBuffer,
    graph: Option<&'a HnswGraph>,
    metric: DistanceMetric,
    ef_search: usize,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        store: &'a VectorStore,
        buffer: &'a WriteBuffer,
        graph: Option<&'a HnswGraph>,
        metric: DistanceMetric,
        ef_search: usize,
    ) -> Self {
        Self {
            store,
            buffer,
            graph,
            metric,
            ef_search,
        }
    }

    /// Runs a validated search along `path`.
    pub fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
        path: SearchPath,
    ) -> Result<Vec<SearchResult>> {
        let filter = validate_query(query, self.store.dimension(), params)?;
        if self.store.count() == 0 {
            return Ok(Vec::new());
        }

        let store = self.store;
        let accept = |slot: u32| {
            store.is_live(slot)
                && match &filter {
                    Some(f) => store.metadata_of(slot).is_some_and(|m| f.matches(m)),
                    None => true,
                }
        };
        let k = params.k;

        let mut candidates = self
            .buffer
            .search_linear(store, self.metric, query, k, &accept);

        let indexed = match (path, self.graph) {
            (SearchPath::Graph, Some(graph)) => {
                let ef = params
                    .beamwidth
                    .unwrap_or_else(|| auto_beamwidth(self.ef_search, graph.len(), k))
                    .max(k);
                knn_search(graph, store, query, k, ef, &accept)
            }
            _ => flat_scan(
                store,
                self.metric,
                query,
                store.slots_in(SlotState::Indexed),
                k,
                &accept,
            ),
        };
        candidates.extend(indexed);

        self.rank(candidates, params)
    }

    /// Deduplicates, orders by `(distance, id)` and materializes the top `k`.
    fn rank(&self, candidates: Vec<(f32, u32)>, params: &SearchParams) -> Result<Vec<SearchResult>> {
        let mut seen = HashSet::with_capacity(candidates.len());
        let mut ranked: Vec<(f32, &str, u32)> = Vec::with_capacity(candidates.len());
        for (distance, slot) in candidates {
            if !seen.insert(slot) {
                continue;
            }
            let id = self.store.id_of(slot).ok_or_else(|| {
                DatabaseError::Invariant(format!("search reached unmapped slot {slot}"))
            })?;
            ranked.push((distance, id, slot));
        }
        ranked.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        ranked.truncate(params.k);

        Ok(ranked
            .into_iter()
            .map(|(distance, id, slot)| SearchResult {
                id: id.to_string(),
                score: self.metric.score(distance),
                vector: params
                    .include_vectors
                    .then(|| self.store.vector(slot).into_owned()),
                metadata: if params.include_metadata {
                    self.store.metadata_of(slot).cloned()
                } else {
                    None
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswConfig;
    use crate::quantization::QuantizationMode;
    use crate::storage::vector_store::Metadata;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// 0..n on a line; even slots flushed into the graph, odd slots buffered.
    fn fixture(n: usize) -> (VectorStore, WriteBuffer, HnswGraph) {
        let mut store = VectorStore::new(QuantizationMode::None);
        let mut buffer = WriteBuffer::new(n);
        let mut graph = HnswGraph::new(DistanceMetric::L2, HnswConfig::default());
        for i in 0..n {
            let parity = if i % 2 == 0 { "even" } else { "odd" };
            let slot = store
                .insert(&format!("v{i:03}"), &[i as f32, 0.0], meta(&[("parity", parity)]))
                .unwrap();
            if i % 2 == 0 {
                graph.insert(&store, slot);
                store.mark_indexed(slot);
            } else {
                buffer.push(slot);
            }
        }
        (store, buffer, graph)
    }

    #[test]
    fn test_flat_scan_orders_and_bounds() {
        let (store, _, _) = fixture(20);
        let hits = flat_scan(&store, DistanceMetric::L2, &[10.2, 0.0], 0..20u32, 3, &|_| true);
        assert_eq!(hits.iter().map(|h| h.1).collect::<Vec<_>>(), vec![10, 11, 9]);
        assert!(flat_scan(&store, DistanceMetric::L2, &[0.0, 0.0], 0..20u32, 0, &|_| true).is_empty());
    }

    #[test]
    fn test_merges_buffer_and_index() {
        let (store, buffer, graph) = fixture(40);
        let engine = QueryEngine::new(&store, &buffer, Some(&graph), DistanceMetric::L2, 16);
        for path in [SearchPath::Flat, SearchPath::Graph] {
            let hits = engine.search(&[7.1, 0.0], &SearchParams::new(4), path).unwrap();
            let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
            assert_eq!(ids, vec!["v007", "v008", "v006", "v009"], "{path:?}");
            assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }

    #[test]
    fn test_filter_excludes_closer_records() {
        let (store, buffer, graph) = fixture(40);
        let engine = QueryEngine::new(&store, &buffer, Some(&graph), DistanceMetric::L2, 16);
        let params = SearchParams::new(3).with_filter(meta(&[("parity", "odd")]));
        let hits = engine.search(&[10.0, 0.0], &params, SearchPath::Graph).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["v009", "v011", "v007"]);
    }

    #[test]
    fn test_ties_break_by_id() {
        let mut store = VectorStore::new(QuantizationMode::None);
        let mut buffer = WriteBuffer::new(8);
        for id in ["c", "a", "b"] {
            let slot = store.insert(id, &[1.0, 1.0], Metadata::new()).unwrap();
            buffer.push(slot);
        }
        let engine = QueryEngine::new(&store, &buffer, None, DistanceMetric::Cosine, 16);
        let hits = engine
            .search(&[1.0, 1.0], &SearchParams::new(3), SearchPath::Flat)
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tied_prefix_is_stable_across_k() {
        let mut store = VectorStore::new(QuantizationMode::None);
        let mut buffer = WriteBuffer::new(16);
        let mut graph = HnswGraph::new(DistanceMetric::L2, HnswConfig::default());
        for id in ["c", "a", "b"] {
            let slot = store.insert(id, &[1.0, 0.0], Metadata::new()).unwrap();
            buffer.push(slot);
        }
        for id in ["f", "d", "e"] {
            let slot = store.insert(id, &[1.0, 0.0], Metadata::new()).unwrap();
            graph.insert(&store, slot);
            store.mark_indexed(slot);
        }
        let engine = QueryEngine::new(&store, &buffer, Some(&graph), DistanceMetric::L2, 16);
        for path in [SearchPath::Flat, SearchPath::Graph] {
            let full: Vec<String> = engine
                .search(&[1.0, 0.0], &SearchParams::new(6), path)
                .unwrap()
                .into_iter()
                .map(|h| h.id)
                .collect();
            assert_eq!(full, vec!["a", "b", "c", "d", "e", "f"], "{path:?}");
            for k in 1..6 {
                let ids: Vec<String> = engine
                    .search(&[1.0, 0.0], &SearchParams::new(k), path)
                    .unwrap()
                    .into_iter()
                    .map(|h| h.id)
                    .collect();
                assert_eq!(ids, full[..k], "{path:?} k={k}");
            }
        }
    }

    #[test]
    fn test_validation_errors() {
        let (store, buffer, graph) = fixture(4);
        let engine = QueryEngine::new(&store, &buffer, Some(&graph), DistanceMetric::L2, 16);
        let run = |q: &[f32], p: SearchParams| engine.search(q, &p, SearchPath::Flat);
        assert!(run(&[1.0], SearchParams::new(1)).unwrap_err().is_validation());
        assert!(run(&[1.0, 0.0], SearchParams::new(0)).unwrap_err().is_validation());
        assert!(run(&[1.0, 0.0], SearchParams::new(MAX_K + 1))
            .unwrap_err()
            .is_validation());
        assert!(run(&[1.0, 0.0], SearchParams::new(1).with_beamwidth(0))
            .unwrap_err()
            .is_validation());
        assert!(run(&[1.0, 0.0], SearchParams::new(1).with_filter(meta(&[("", "x")])))
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_deleted_records_never_returned() {
        let (mut store, buffer, graph) = fixture(10);
        store.delete("v004");
        let engine = QueryEngine::new(&store, &buffer, Some(&graph), DistanceMetric::L2, 16);
        let hits = engine
            .search(&[4.0, 0.0], &SearchParams::new(10), SearchPath::Graph)
            .unwrap();
        assert_eq!(hits.len(), 9);
        assert!(hits.iter().all(|h| h.id != "v004"));
    }

    #[test]
    fn test_auto_beamwidth() {
        assert_eq!(auto_beamwidth(50, 1_000, 10), 50);
        assert_eq!(auto_beamwidth(50, 1_000_000, 10), 250);
        assert_eq!(auto_beamwidth(50, usize::MAX / 2, 10), AUTO_BEAMWIDTH_CAP);
        assert_eq!(auto_beamwidth(50, 100, 80), 80);
    }
}
