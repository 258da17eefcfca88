use embervec_core::storage::{GraphRestore, HealthState, LoadPath, SnapshotOptions};
use embervec_core::{
    Algorithm, AutoBatchConfig, Collection, CollectionConfig, DistanceMetric, ErrorKind, Metadata,
    QuantizationMode, Record, SearchParams, SearchPath,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::path::Path;
use tempfile::TempDir;

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn records(vectors: &[Vec<f32>]) -> Vec<Record> {
    vectors
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let mut meta = Metadata::new();
            meta.insert("n".to_string(), i.to_string());
            Record::new(format!("v{i}"), v.clone(), meta)
        })
        .collect()
}

/// Routes library logs to the test harness; `RUST_LOG=embervec_core=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open(config: CollectionConfig) -> Collection {
    Collection::open(None::<&Path>, config).unwrap()
}

fn exact_top_k(vectors: &[Vec<f32>], metric: DistanceMetric, query: &[f32], k: usize) -> Vec<String> {
    let mut scored: Vec<(f32, usize)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (metric.distance(query, v), i))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.iter().take(k).map(|&(_, i)| format!("v{i}")).collect()
}

fn recall_at_10(c: &Collection, vectors: &[Vec<f32>], metric: DistanceMetric, queries: &[Vec<f32>]) -> f64 {
    let mut hits = 0;
    for q in queries {
        let truth: HashSet<String> = exact_top_k(vectors, metric, q, 10).into_iter().collect();
        let got = c.search(q, 10, None).unwrap();
        hits += got.iter().filter(|r| truth.contains(&r.id)).count();
    }
    hits as f64 / (queries.len() * 10) as f64
}

// ── Self nearest neighbor ─────────────────────────────────────────────

#[test]
fn every_vector_is_its_own_nearest_neighbor() {
    let vectors = random_vectors(500, 8, 1);
    for algorithm in [Algorithm::Flat, Algorithm::Graph] {
        let c = open(CollectionConfig::default().with_algorithm(algorithm));
        c.insert_records(records(&vectors)).unwrap();

        for flushed in [false, true] {
            if flushed {
                assert_eq!(c.flush(), 500);
            }
            for (i, v) in vectors.iter().enumerate() {
                let hits = c.search(v, 1, None).unwrap();
                assert_eq!(hits[0].id, format!("v{i}"), "{algorithm:?} flushed={flushed}");
                assert!(hits[0].score > 0.999);
            }
        }
        let expected = if algorithm == Algorithm::Flat {
            SearchPath::Flat
        } else {
            SearchPath::Graph
        };
        assert_eq!(c.info().search_path, expected);
    }
}

// ── Memory ────────────────────────────────────────────────────────────

#[test]
fn scalar_quantization_bounds_reported_memory() {
    let (n, dim) = (10_000, 128);
    let vectors = random_vectors(n, dim, 2);
    let full_precision = n * dim * std::mem::size_of::<f32>();
    let bound = full_precision as f64 / 4.0 * 1.25;
    for algorithm in [Algorithm::Flat, Algorithm::Graph] {
        let usage = |quantization| {
            let c = open(
                CollectionConfig::default()
                    .with_quantization(quantization)
                    .with_algorithm(algorithm),
            );
            c.insert_records(records(&vectors)).unwrap();
            c.flush();
            let memory = c.memory_usage();
            assert_eq!(c.info().memory.total_bytes, memory.total_bytes);
            assert_eq!(
                memory.total_bytes,
                memory.vector_bytes
                    + memory.graph_bytes
                    + memory.id_map_bytes
                    + memory.metadata_bytes
                    + memory.buffer_bytes
            );
            assert_eq!(memory.graph_bytes > 0, algorithm == Algorithm::Graph);
            memory
        };
        let full = usage(QuantizationMode::None);
        let scalar = usage(QuantizationMode::Scalar);
        assert_eq!(full.vector_bytes, full_precision);
        assert!(
            (scalar.vector_bytes as f64) <= bound,
            "{algorithm:?}: vector bytes {} above the 4x bound",
            scalar.vector_bytes
        );
        // The id map and metadata do not depend on quantization; the graph only
        // differs through neighbor choice, so allow it a tenth either way.
        let overhead_slack = full.graph_bytes as f64 * 0.1;
        assert!(
            scalar.total_bytes as f64 <= full.total_bytes as f64 - full_precision as f64 + bound + overhead_slack,
            "{algorithm:?}: total {} against unquantized total {}",
            scalar.total_bytes,
            full.total_bytes
        );
    }
}

#[test]
fn binary_quantization_is_32x_smaller() {
    let (n, dim) = (1_000, 256);
    let c = open(
        CollectionConfig::default()
            .with_quantization(QuantizationMode::Binary)
            .with_algorithm(Algorithm::Flat),
    );
    c.insert_records(records(&random_vectors(n, dim, 3))).unwrap();
    let code_bytes = n * dim / 8;
    let params = n * QuantizationMode::Binary.param_bytes();
    assert_eq!(c.memory_usage().vector_bytes, code_bytes + params);
}

// ── Buffer and index merge ────────────────────────────────────────────

#[test]
fn duplicates_are_found_across_buffer_and_index() {
    for algorithm in [Algorithm::Auto, Algorithm::Graph] {
        let c = open(
            CollectionConfig::default()
                .with_buffer_size(100)
                .with_metric(DistanceMetric::L2)
                .with_algorithm(algorithm),
        );
        let vectors = random_vectors(250, 8, 4);
        for r in records(&vectors) {
            c.insert(&r.id, &r.vector, r.metadata).unwrap();
        }
        let info = c.info();
        assert_eq!(info.indexed_count, 200);
        assert_eq!(info.buffered_count, 50);

        // One copy of an indexed vector and one of a buffered one, both buffered.
        c.insert("dup-indexed", &vectors[10], Metadata::new()).unwrap();
        c.insert("dup-buffered", &vectors[249], Metadata::new()).unwrap();

        let hits = c.search(&vectors[10], 2, None).unwrap();
        let ids: HashSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["v10", "dup-indexed"]), "{algorithm:?}");

        let hits = c.search(&vectors[249], 2, None).unwrap();
        let ids: HashSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["v249", "dup-buffered"]), "{algorithm:?}");
        assert!(hits.iter().all(|h| (h.score - 1.0).abs() < 1e-6));
    }
}

#[test]
fn results_are_ranked_and_deduplicated() {
    let vectors = random_vectors(300, 12, 5);
    for metric in [DistanceMetric::L2, DistanceMetric::Cosine, DistanceMetric::InnerProduct] {
        let c = open(
            CollectionConfig::default()
                .with_buffer_size(64)
                .with_metric(metric)
                .with_algorithm(Algorithm::Graph),
        );
        c.insert_records(records(&vectors)).unwrap();
        let hits = c.search(&vectors[0], 25, None).unwrap();
        assert_eq!(hits.len(), 25);
        let unique: HashSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(unique.len(), 25);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score), "{metric:?}");
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }
}

#[test]
fn beamwidth_override_and_limits() {
    let vectors = random_vectors(400, 8, 6);
    let c = open(CollectionConfig::default().with_algorithm(Algorithm::Graph));
    c.insert_records(records(&vectors)).unwrap();
    c.flush();

    let narrow = SearchParams::new(10).with_beamwidth(1);
    assert_eq!(c.search_with(&vectors[3], &narrow).unwrap().len(), 10);

    let wide = SearchParams::new(10).with_beamwidth(400);
    let hits = c.search_with(&vectors[3], &wide).unwrap();
    assert_eq!(hits[0].id, "v3");

    let err = c
        .search_with(&vectors[3], &SearchParams::new(10).with_beamwidth(0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = c.search(&vectors[3], 10_001, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = c.search(&[1.0, 2.0], 1, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// ── Recall ────────────────────────────────────────────────────────────

#[test]
fn scalar_quantization_keeps_recall() {
    let vectors = random_vectors(1_000, 32, 7);
    let queries = random_vectors(50, 32, 8);
    let metric = DistanceMetric::L2;
    let c = open(
        CollectionConfig::default()
            .with_metric(metric)
            .with_quantization(QuantizationMode::Scalar)
            .with_algorithm(Algorithm::Flat),
    );
    c.insert_records(records(&vectors)).unwrap();
    let recall = recall_at_10(&c, &vectors, metric, &queries);
    assert!(recall >= 0.9, "scalar recall@10 {recall}");
}

#[test]
fn binary_quantization_recall_floor() {
    // 100 well-separated clusters of 10 points each.
    let dim = 64;
    let centers = random_vectors(100, dim, 9);
    let mut rng = StdRng::seed_from_u64(10);
    let vectors: Vec<Vec<f32>> = centers
        .iter()
        .flat_map(|c| {
            (0..10)
                .map(|_| c.iter().map(|x| x + rng.gen_range(-0.05..0.05)).collect())
                .collect::<Vec<Vec<f32>>>()
        })
        .collect();
    let queries: Vec<Vec<f32>> = vectors.iter().step_by(20).cloned().collect();

    let metric = DistanceMetric::L2;
    let c = open(
        CollectionConfig::default()
            .with_metric(metric)
            .with_quantization(QuantizationMode::Binary)
            .with_algorithm(Algorithm::Flat),
    );
    c.insert_records(records(&vectors)).unwrap();
    let recall = recall_at_10(&c, &vectors, metric, &queries);
    assert!(recall >= 0.5, "binary recall@10 {recall}");
}

#[test]
fn bulk_build_matches_incremental_build() {
    let vectors = random_vectors(2_000, 16, 11);
    let queries = random_vectors(100, 16, 12);
    let metric = DistanceMetric::L2;
    let config = CollectionConfig::default()
        .with_metric(metric)
        .with_algorithm(Algorithm::Graph);

    let bulk = open(config.clone().with_buffer_size(5_000));
    bulk.insert_records(records(&vectors)).unwrap();
    assert_eq!(bulk.flush(), 2_000);

    let incremental = open(config.with_buffer_size(1));
    for r in records(&vectors) {
        incremental.insert(&r.id, &r.vector, r.metadata).unwrap();
    }
    assert_eq!(incremental.info().buffered_count, 0);

    let r_bulk = recall_at_10(&bulk, &vectors, metric, &queries);
    let r_inc = recall_at_10(&incremental, &vectors, metric, &queries);
    assert!(r_inc >= 0.9, "incremental recall {r_inc}");
    assert!(r_bulk >= r_inc - 0.03, "bulk {r_bulk} vs incremental {r_inc}");
}

// ── Persistence ───────────────────────────────────────────────────────

#[test]
fn snapshot_round_trip_on_both_load_paths() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let vectors = random_vectors(300, 16, 13);
    let queries = random_vectors(30, 16, 14);
    let metric = DistanceMetric::Cosine;
    let config = CollectionConfig::default()
        .with_buffer_size(128)
        .with_algorithm(Algorithm::Graph);

    let source = open(config.clone());
    source.insert_records(records(&vectors)).unwrap();
    let before = recall_at_10(&source, &vectors, metric, &queries);

    let cases = [
        (SnapshotOptions::default(), LoadPath::BulkHashmap, GraphRestore::Loaded),
        (
            SnapshotOptions {
                include_hashmap: false,
                include_graph: false,
            },
            LoadPath::PerVector,
            GraphRestore::Rebuilt,
        ),
    ];
    for (i, (options, path, graph)) in cases.into_iter().enumerate() {
        let file = dir.path().join(format!("snap{i}.evdb"));
        source.save_with(&file, options).unwrap();

        let target = open(config.clone());
        let stats = target.load(&file).unwrap();
        assert_eq!(stats.path, path);
        assert_eq!(stats.graph, graph);
        assert_eq!(target.count(), source.count());
        for j in 0..vectors.len() {
            let id = format!("v{j}");
            assert_eq!(target.get(&id), source.get(&id), "{id} after {path:?}");
        }
        let after = recall_at_10(&target, &vectors, metric, &queries);
        assert!((after - before).abs() <= 0.05, "recall {before} -> {after}");
    }
}

#[test]
fn quantized_snapshot_keeps_codes() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("q.evdb");
    let vectors = random_vectors(100, 8, 15);
    let config = CollectionConfig::default().with_quantization(QuantizationMode::Scalar);
    let source = open(config.clone());
    source.insert_records(records(&vectors)).unwrap();
    source.save(&file).unwrap();

    // Loading adopts the snapshot's quantization even over a different config.
    let target = open(CollectionConfig::default());
    target.load(&file).unwrap();
    assert_eq!(target.info().quantization, QuantizationMode::Scalar);
    for j in 0..vectors.len() {
        let id = format!("v{j}");
        assert_eq!(target.get(&id), source.get(&id));
    }
}

#[test]
fn truncated_snapshot_is_rejected_without_side_effects() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("full.evdb");
    let source = open(CollectionConfig::default());
    source.insert_records(records(&random_vectors(200, 8, 16))).unwrap();
    source.save(&file).unwrap();
    let bytes = std::fs::read(&file).unwrap();
    std::fs::write(&file, &bytes[..bytes.len() / 2]).unwrap();

    for prior in [0usize, 25] {
        let target = open(CollectionConfig::default());
        target.insert_records(records(&random_vectors(prior, 4, 17))).unwrap();
        let err = target.load(&file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Database);
        assert_eq!(target.count(), prior);
        assert_eq!(target.dimension(), (prior > 0).then_some(4));
    }
}

#[test]
fn wal_recovers_uncheckpointed_writes() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("durable.evdb");
    let vectors = random_vectors(60, 8, 18);
    let config = CollectionConfig::default().with_buffer_size(16);
    {
        let c = Collection::open(Some(&file), config.clone()).unwrap();
        c.insert_records(records(&vectors[..40])).unwrap();
        c.checkpoint().unwrap();
        for r in records(&vectors).into_iter().skip(40) {
            c.insert(&r.id, &r.vector, r.metadata).unwrap();
        }
        c.delete_batch(&["v0".to_string(), "v45".to_string()]).unwrap();
        c.upsert("v1", &vectors[59], Metadata::new()).unwrap();
    }

    let c = Collection::open(Some(&file), config).unwrap();
    assert_eq!(c.count(), 58);
    assert!(!c.exists("v0"));
    assert!(!c.exists("v45"));
    assert_eq!(c.get("v1").unwrap().0, vectors[59]);
    assert_eq!(c.get("v50").unwrap().0, vectors[50]);
    let hits = c.search(&vectors[30], 1, None).unwrap();
    assert_eq!(hits[0].id, "v30");
}

#[test]
fn torn_wal_tail_is_dropped() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("torn.evdb");
    {
        let c = Collection::open(Some(&file), CollectionConfig::default()).unwrap();
        c.insert("a", &[1.0, 0.0], Metadata::new()).unwrap();
        c.insert("b", &[0.0, 1.0], Metadata::new()).unwrap();
        c.insert("last", &[1.0, 1.0], Metadata::new()).unwrap();
    }
    let wal = dir.path().join("torn.wal");
    let len = std::fs::metadata(&wal).unwrap().len();
    let f = std::fs::OpenOptions::new().write(true).open(&wal).unwrap();
    f.set_len(len - 3).unwrap();
    drop(f);

    let c = Collection::open(Some(&file), CollectionConfig::default()).unwrap();
    assert_eq!(c.count(), 2);
    assert!(c.exists("a") && c.exists("b"));
    assert!(!c.exists("last"));
}

// ── Auto-batching ─────────────────────────────────────────────────────

#[test]
fn acknowledged_batched_inserts_are_never_dropped() {
    let c = open(
        CollectionConfig {
            max_memory_bytes: Some(1_000),
            ..CollectionConfig::default().with_algorithm(Algorithm::Flat)
        }
        .with_auto_batch(AutoBatchConfig { max_pending: 10 }),
    );
    let vectors = random_vectors(50, 4, 12);
    let mut acknowledged = Vec::new();
    let mut exhausted = 0;
    for (i, v) in vectors.iter().enumerate() {
        match c.insert(&format!("v{i}"), v, Metadata::new()) {
            Ok(()) => acknowledged.push(format!("v{i}")),
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::ResourceExhausted);
                exhausted += 1;
            }
        }
    }
    assert!(!acknowledged.is_empty());
    assert!(exhausted > 0);

    c.flush();
    assert_eq!(c.count(), acknowledged.len());
    assert!(acknowledged.iter().all(|id| c.exists(id)));
    assert_eq!(c.health().status, HealthState::Healthy);
}

#[test]
fn batched_insert_then_upsert_keeps_the_upsert() {
    let c = open(
        CollectionConfig::default()
            .with_algorithm(Algorithm::Flat)
            .with_auto_batch(AutoBatchConfig { max_pending: 100 }),
    );
    c.insert("x", &[1.0, 0.0], Metadata::new()).unwrap();
    assert!(c.upsert("x", &[0.0, 1.0], Metadata::new()).unwrap());
    assert_eq!(c.get("x").unwrap().0, vec![0.0, 1.0]);
    assert_eq!(c.count(), 1);
    assert_eq!(c.health().status, HealthState::Healthy);
}

// ── Concurrency ───────────────────────────────────────────────────────

#[test]
fn concurrent_writers_and_readers() {
    let c = open(
        CollectionConfig::default()
            .with_buffer_size(64)
            .with_algorithm(Algorithm::Graph),
    );
    let vectors = random_vectors(800, 8, 19);
    c.insert("seed", &vectors[0], Metadata::new()).unwrap();

    std::thread::scope(|s| {
        for t in 0..4 {
            let c = c.clone();
            let vectors = &vectors;
            s.spawn(move || {
                for i in (t * 200)..((t + 1) * 200) {
                    c.insert(&format!("w{i}"), &vectors[i], Metadata::new())
                        .unwrap();
                }
            });
        }
        for t in 0..4 {
            let c = c.clone();
            let vectors = &vectors;
            s.spawn(move || {
                for i in 0..100 {
                    let hits = c.search(&vectors[(t * 100 + i) % 800], 5, None).unwrap();
                    assert!(!hits.is_empty());
                }
            });
        }
    });

    assert_eq!(c.count(), 801);
    for i in 0..800 {
        assert!(c.exists(&format!("w{i}")));
    }
    let info = c.info();
    assert_eq!(info.indexed_count + info.buffered_count, 801);
}

#[test]
fn compaction_runs_alongside_writes() {
    init_tracing();
    let c = open(
        CollectionConfig::default()
            .with_buffer_size(32)
            .with_algorithm(Algorithm::Graph),
    );
    let vectors = random_vectors(600, 8, 20);
    c.insert_records(records(&vectors[..400])).unwrap();
    c.flush();
    let doomed: Vec<String> = (0..100).map(|i| format!("v{i}")).collect();
    c.delete_batch(&doomed).unwrap();

    std::thread::scope(|s| {
        let writer = c.clone();
        let tail = &vectors[400..];
        s.spawn(move || {
            for (i, v) in tail.iter().enumerate() {
                writer.insert(&format!("late{i}"), v, Metadata::new()).unwrap();
            }
        });
        c.compact().unwrap();
    });
    c.compact().unwrap();

    let info = c.info();
    assert_eq!(info.vector_count, 500);
    assert_eq!(info.deleted_count, 0);
    for i in (100..400).step_by(25) {
        let hits = c.search(&vectors[i], 1, None).unwrap();
        assert_eq!(hits[0].id, format!("v{i}"));
    }
    for i in (0..200).step_by(25) {
        let hits = c.search(&vectors[400 + i], 1, None).unwrap();
        assert_eq!(hits[0].id, format!("late{i}"));
    }
}
