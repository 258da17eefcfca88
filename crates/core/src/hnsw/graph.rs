//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] holds the tuning parameters. [`HnswGraph`] keeps one neighbor list
//! per layer for every slot that has been inserted, in slot-indexed parallel arrays.

use crate::config;
use crate::distance::DistanceMetric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Layer marker for slots that are not part of the graph.
pub const ABSENT: u8 = u8::MAX;

/// Configuration parameters for an HNSW graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Links per node on layers above 0.
    pub m: usize,
    /// Links per node on layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Base candidate list size during search.
    pub ef_search: usize,
    /// Maximum number of layers.
    pub max_layers: usize,
    /// Seed for layer assignment.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            m_max0: config::HNSW_DEFAULT_M * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
            seed: config::HNSW_DEFAULT_SEED,
        }
    }
}

impl HnswConfig {
    #[inline]
    pub fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }
}

fn unseeded_rng() -> StdRng {
    StdRng::seed_from_u64(config::HNSW_DEFAULT_SEED)
}

/// Multi-layer proximity graph over vector slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswGraph {
    pub config: HnswConfig,
    pub metric: DistanceMetric,
    /// `[slot][layer] -> neighbor slots`. Empty for absent slots.
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    /// Top layer per slot, or [`ABSENT`].
    pub(crate) layers: Vec<u8>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
    pub(crate) node_count: usize,
    /// Layer draws so far; reseeds the generator after a reload.
    pub(crate) draws: u64,
    #[serde(skip, default = "unseeded_rng")]
    rng: StdRng,
}

impl HnswGraph {
    pub fn new(metric: DistanceMetric, config: HnswConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            metric,
            neighbors: Vec::new(),
            layers: Vec::new(),
            entry_point: None,
            max_layer: 0,
            node_count: 0,
            draws: 0,
            rng,
        }
    }

    /// Restores the layer generator after deserialization.
    pub fn reseed(&mut self) {
        self.rng = StdRng::seed_from_u64(self.config.seed ^ self.draws.rotate_left(32));
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.node_count
    }

    pub fn is_empty(&self) -> bool {
        self.node_count == 0
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    pub fn max_layer(&self) -> usize {
        self.max_layer
    }

    #[inline]
    pub fn contains(&self, slot: u32) -> bool {
        self.layers
            .get(slot as usize)
            .is_some_and(|&l| l != ABSENT)
    }

    /// Top layer of `slot`, if it is in the graph.
    #[inline]
    pub fn layer_of(&self, slot: u32) -> Option<usize> {
        match self.layers.get(slot as usize) {
            Some(&l) if l != ABSENT => Some(l as usize),
            _ => None,
        }
    }

    /// Neighbors of `slot` on `layer`. Empty when the node does not reach that layer.
    #[inline]
    pub fn neighbors(&self, slot: u32, layer: usize) -> &[u32] {
        self.neighbors
            .get(slot as usize)
            .and_then(|n| n.get(layer))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Slots present in the graph, ascending.
    pub fn nodes(&self) -> impl Iterator<Item = u32> + '_ {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| **l != ABSENT)
            .map(|(i, _)| i as u32)
    }

    /// Draws a layer from the geometric distribution with parameter `1 / ln(M)`.
    pub fn random_level(&mut self) -> usize {
        self.draws += 1;
        let ml = 1.0 / (self.config.m as f64).ln();
        let r: f64 = self.rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    pub(crate) fn ensure_slot(&mut self, slot: u32) {
        let need = slot as usize + 1;
        if self.layers.len() < need {
            self.layers.resize(need, ABSENT);
            self.neighbors.resize_with(need, Vec::new);
        }
    }

    /// Registers `slot` at `level` with empty neighbor lists.
    pub(crate) fn add_node(&mut self, slot: u32, level: usize) {
        self.ensure_slot(slot);
        let i = slot as usize;
        self.layers[i] = level as u8;
        self.neighbors[i] = vec![Vec::new(); level + 1];
        self.node_count += 1;
        if self.entry_point.is_none() || level > self.max_layer {
            self.entry_point = Some(slot);
            self.max_layer = level;
        }
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_bytes(&self) -> usize {
        let vec_overhead = std::mem::size_of::<Vec<u32>>();
        self.neighbors
            .iter()
            .map(|node| {
                vec_overhead
                    + node
                        .iter()
                        .map(|l| vec_overhead + l.len() * std::mem::size_of::<u32>())
                        .sum::<usize>()
            })
            .sum::<usize>()
            + self.layers.len()
    }

    /// Checks structural invariants after deserialization.
    pub fn validate(&self, slot_count: usize) -> Result<(), String> {
        if self.neighbors.len() != self.layers.len() {
            return Err(format!(
                "neighbors length {} != layers length {}",
                self.neighbors.len(),
                self.layers.len()
            ));
        }
        if self.layers.len() > slot_count {
            return Err(format!(
                "graph covers {} slots but the store has {}",
                self.layers.len(),
                slot_count
            ));
        }
        if self.config.m < 2 || self.config.max_layers == 0 {
            return Err("invalid graph configuration".into());
        }

        let mut present = 0usize;
        for (slot, (&layer, lists)) in self.layers.iter().zip(&self.neighbors).enumerate() {
            if layer == ABSENT {
                if !lists.is_empty() {
                    return Err(format!("absent slot {slot} has neighbor lists"));
                }
                continue;
            }
            present += 1;
            if lists.len() != layer as usize + 1 {
                return Err(format!(
                    "slot {slot} at layer {layer} has {} neighbor lists",
                    lists.len()
                ));
            }
            for (l, list) in lists.iter().enumerate() {
                for &n in list {
                    match self.layer_of(n) {
                        Some(nl) if nl >= l => {}
                        _ => {
                            return Err(format!(
                                "slot {slot} layer {l} links to {n}, which is not on that layer"
                            ))
                        }
                    }
                }
            }
        }

        if present != self.node_count {
            return Err(format!(
                "node_count {} != {} present nodes",
                self.node_count, present
            ));
        }
        match self.entry_point {
            None if present == 0 => Ok(()),
            None => Err("graph has nodes but no entry point".into()),
            Some(ep) => match self.layer_of(ep) {
                Some(l) if l == self.max_layer => Ok(()),
                _ => Err(format!("entry point {ep} is not on the top layer")),
            },
        }
    }
}
