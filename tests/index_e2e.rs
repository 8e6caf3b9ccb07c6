//! End-to-end scenarios: build, persist, load, and query whole forests
//! across both metrics, the in-memory handoff path, cloning, and the
//! boundary populations.

use annforest::metric::{DotProduct, Euclidean, Metric};
use annforest::rng::SplitRng;
use annforest::storage::Header;
use annforest::{Indexer, Searcher};
use std::path::PathBuf;

/// Deterministic unit-normalized gaussian vectors.
fn gaussian_unit_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = SplitRng::new(seed);
    (0..n)
        .map(|_| {
            let mut v: Vec<f32> = (0..dim).map(|_| rng.standard_normal()).collect();
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            for x in v.iter_mut() {
                *x /= norm;
            }
            v
        })
        .collect()
}

fn build_index<M: Metric>(
    vectors: &[Vec<f32>],
    k: usize,
    trees: usize,
    seed: u64,
) -> Indexer<M> {
    let dim = vectors[0].len();
    let mut idx = Indexer::<M>::new(dim, k).unwrap();
    idx.set_seed(seed);
    for (i, v) in vectors.iter().enumerate() {
        idx.add_item(i as u32, v).unwrap();
    }
    idx.build(Some(trees)).unwrap();
    idx
}

fn tmp_path(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    (dir, path)
}

/// Fraction of sampled items whose self-query returns the item itself with
/// a distance within `tol` of the metric's identity value.
fn self_recall<M: Metric>(
    searcher: &Searcher<M>,
    identity: f32,
    tol: f32,
    n: usize,
    step: u32,
) -> f64 {
    let total = searcher.n_items();
    let mut sampled = 0u32;
    let mut hits = 0u32;
    let mut item = 0u32;
    while item < total {
        sampled += 1;
        let result = searcher.get_nns_by_item(item, n, None);
        if result
            .iter()
            .any(|&(d, id)| id == item && (d - identity).abs() <= tol)
        {
            hits += 1;
        }
        item += step;
    }
    hits as f64 / sampled as f64
}

#[test]
fn euclidean_self_recall() {
    let vectors = gaussian_unit_vectors(1200, 64, 101);
    let idx = build_index::<Euclidean>(&vectors, 64, 30, 1);
    let (_dir, path) = tmp_path("euclidean.forest");
    idx.save(&path).unwrap();

    let searcher = Searcher::<Euclidean>::load(&path, false).unwrap();
    assert_eq!(searcher.n_items(), 1200);
    assert_eq!(searcher.dim(), 64);

    let recall = self_recall(&searcher, 0.0, 1e-4, 30, 7);
    assert!(recall >= 0.9, "euclidean self-recall too low: {recall}");
}

#[test]
fn dot_product_self_recall() {
    let vectors = gaussian_unit_vectors(800, 256, 202);
    let idx = build_index::<DotProduct>(&vectors, 256, 30, 2);
    let (_dir, path) = tmp_path("dot.forest");
    idx.save(&path).unwrap();

    let searcher = Searcher::<DotProduct>::load(&path, false).unwrap();
    let recall = self_recall(&searcher, 1.0, 1e-4, 30, 11);
    assert!(recall >= 0.9, "dot self-recall too low: {recall}");
}

#[test]
fn dot_product_simd_tail_dim_40() {
    // dim = 40 exercises the non-multiple-of-16 tail inside the wide kernels
    let vectors = gaussian_unit_vectors(800, 40, 303);
    let idx = build_index::<DotProduct>(&vectors, 40, 30, 3);
    let searcher = idx.into_searcher().unwrap();

    let recall = self_recall(&searcher, 1.0, 1e-4, 30, 5);
    assert!(recall >= 0.9, "dim-40 dot self-recall too low: {recall}");
}

#[test]
fn in_memory_matches_file_backed() {
    let vectors = gaussian_unit_vectors(800, 64, 404);
    let queries = gaussian_unit_vectors(20, 64, 405);

    let file_idx = build_index::<Euclidean>(&vectors, 64, 10, 4);
    let (_dir, path) = tmp_path("file.forest");
    file_idx.save(&path).unwrap();
    let file_searcher = Searcher::<Euclidean>::load(&path, false).unwrap();

    let mem_searcher = build_index::<Euclidean>(&vectors, 64, 10, 4)
        .into_searcher()
        .unwrap();

    assert_eq!(file_searcher.n_items(), mem_searcher.n_items());
    for q in &queries {
        let a = file_searcher.get_nns_by_vector(q, 10, Some(500));
        let b = mem_searcher.get_nns_by_vector(q, 10, Some(500));
        assert_eq!(a, b, "file-backed and in-memory disagree");
    }
}

#[test]
fn clone_and_clone_of_clone_are_identical() {
    let vectors = gaussian_unit_vectors(600, 64, 505);
    let queries = gaussian_unit_vectors(10, 64, 506);

    let searcher = build_index::<DotProduct>(&vectors, 64, 10, 5)
        .into_searcher()
        .unwrap();
    let clone = searcher.try_clone().unwrap();
    let clone2 = clone.try_clone().unwrap();

    for q in &queries {
        let a = searcher.get_nns_by_vector(q, 10, Some(400));
        let b = clone.get_nns_by_vector(q, 10, Some(400));
        let c = clone2.get_nns_by_vector(q, 10, Some(400));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }
}

#[test]
fn file_backed_clone_is_identical() {
    let vectors = gaussian_unit_vectors(400, 64, 606);
    let idx = build_index::<Euclidean>(&vectors, 64, 8, 6);
    let (_dir, path) = tmp_path("clone.forest");
    idx.save(&path).unwrap();

    let searcher = Searcher::<Euclidean>::load(&path, false).unwrap();
    let clone = searcher.try_clone().unwrap();
    for item in [0u32, 100, 399] {
        assert_eq!(
            searcher.get_nns_by_item(item, 5, None),
            clone.get_nns_by_item(item, 5, None)
        );
    }
}

#[test]
fn filter_keeps_high_magnitude_raw_distances() {
    let vectors = gaussian_unit_vectors(1000, 64, 707);
    let searcher = build_index::<DotProduct>(&vectors, 64, 20, 7)
        .into_searcher()
        .unwrap();

    let mut hits = 0u32;
    let mut sampled = 0u32;
    let mut item = 0u32;
    while item < searcher.n_items() {
        sampled += 1;
        let result =
            searcher.get_nns_by_item_filter(item, 30, None, |d: &mut f32| d.abs() > 0.8);
        // raw dot distances are negative; the self match sits near -1
        if result
            .iter()
            .any(|&(d, id)| id == item && (d.abs() - 1.0).abs() <= 1e-4)
        {
            hits += 1;
        }
        item += 13;
    }
    let recall = hits as f64 / sampled as f64;
    assert!(recall >= 0.9, "filtered self-recall too low: {recall}");
}

#[test]
fn same_seed_same_bytes() {
    let vectors = gaussian_unit_vectors(500, 64, 808);
    let (_dir, path_a) = tmp_path("a.forest");
    let (_dir2, path_b) = tmp_path("b.forest");

    build_index::<Euclidean>(&vectors, 64, 10, 99)
        .save(&path_a)
        .unwrap();
    build_index::<Euclidean>(&vectors, 64, 10, 99)
        .save(&path_b)
        .unwrap();

    let a = std::fs::read(&path_a).unwrap();
    let b = std::fs::read(&path_b).unwrap();
    assert_eq!(a, b, "identical seeds must yield identical artifacts");
}

#[test]
fn different_seed_different_forest() {
    let vectors = gaussian_unit_vectors(500, 64, 909);
    let (_dir, path_a) = tmp_path("a.forest");
    let (_dir2, path_b) = tmp_path("b.forest");

    build_index::<Euclidean>(&vectors, 64, 10, 1)
        .save(&path_a)
        .unwrap();
    build_index::<Euclidean>(&vectors, 64, 10, 2)
        .save(&path_b)
        .unwrap();

    assert_ne!(
        std::fs::read(&path_a).unwrap(),
        std::fs::read(&path_b).unwrap()
    );
}

#[test]
fn artifact_header_fields() {
    let vectors = gaussian_unit_vectors(300, 40, 111);
    let idx = build_index::<Euclidean>(&vectors, 40, 5, 8);
    let (_dir, path) = tmp_path("header.forest");
    idx.save(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let header = Header::read_tail(&bytes);
    assert_eq!(header.version, 0);
    assert_eq!(header.vlen, 40);
    assert_eq!(header.idx_block_len, 40);
    // body splits exactly into blocks and packed nodes
    let packed_node = 16 + 40 * 2;
    let blocks = header.nblocks as usize * 40 * 4;
    assert_eq!((bytes.len() - 16 - blocks) % packed_node, 0);
}

#[test]
fn empty_index_round_trip() {
    let mut idx = Indexer::<Euclidean>::with_dim(64).unwrap();
    idx.build(Some(10)).unwrap();
    let (_dir, path) = tmp_path("empty.forest");
    idx.save(&path).unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
    let searcher = Searcher::<Euclidean>::load(&path, false).unwrap();
    assert_eq!(searcher.n_items(), 0);
    assert!(searcher.get_nns_by_vector(&[0.0; 64], 10, None).is_empty());
}

#[test]
fn single_item_index() {
    let mut idx = Indexer::<Euclidean>::with_dim(8).unwrap();
    idx.add_item(0, &[0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
        .unwrap();
    idx.build(Some(1)).unwrap();
    let searcher = idx.into_searcher().unwrap();

    assert_eq!(searcher.n_items(), 1);
    let result = searcher.get_nns_by_item(0, 1, None);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].1, 0);
    assert!(result[0].0 < 1e-4);
}

#[test]
fn fewer_items_than_leaf_block() {
    // n_items <= K - 1: one root, one leaf block, no split nodes
    let mut idx = Indexer::<Euclidean>::with_dim(8).unwrap();
    for i in 0..5u32 {
        let mut v = [0.0f32; 8];
        v[i as usize] = 1.0;
        idx.add_item(i, &v).unwrap();
    }
    idx.build(Some(1)).unwrap();
    let searcher = idx.into_searcher().unwrap();

    assert_eq!(searcher.n_items(), 5);
    let result = searcher.get_nns_by_item(2, 5, None);
    assert_eq!(result.len(), 5);
    assert_eq!(result[0].1, 2);
}

#[test]
fn smallest_legal_dimension_and_block() {
    // K == dim == 8 is the alignment corner case
    let vectors = gaussian_unit_vectors(200, 8, 212);
    let searcher = build_index::<Euclidean>(&vectors, 8, 10, 9)
        .into_searcher()
        .unwrap();
    let recall = self_recall(&searcher, 0.0, 1e-4, 20, 3);
    assert!(recall >= 0.9, "dim-8 self-recall too low: {recall}");
}

#[test]
fn results_monotone_with_exhaustive_budget() {
    let vectors = gaussian_unit_vectors(500, 64, 313);
    let searcher = build_index::<Euclidean>(&vectors, 64, 10, 10)
        .into_searcher()
        .unwrap();

    for q in gaussian_unit_vectors(5, 64, 314) {
        let result = searcher.get_nns_by_vector(&q, 50, Some(1_000_000));
        assert_eq!(result.len(), 50);
        for pair in result.windows(2) {
            assert!(pair[0].0 <= pair[1].0, "distances must be non-decreasing");
        }
    }
}

#[test]
fn get_item_round_trips_within_quantization_error() {
    let vectors = gaussian_unit_vectors(100, 64, 414);
    let searcher = build_index::<Euclidean>(&vectors, 64, 5, 11)
        .into_searcher()
        .unwrap();

    let mut out = vec![0.0f32; 64];
    for (i, v) in vectors.iter().enumerate() {
        searcher.get_item(i as u32, &mut out);
        for (a, b) in v.iter().zip(out.iter()) {
            assert!((a - b).abs() <= 1.0 / 32767.0, "item {i}: {a} vs {b}");
        }
    }
}

#[test]
fn madvise_and_mlock_paths() {
    let vectors = gaussian_unit_vectors(200, 64, 515);
    let idx = build_index::<Euclidean>(&vectors, 64, 5, 12);
    let (_dir, path) = tmp_path("advise.forest");
    idx.save(&path).unwrap();

    // mlock may be refused by RLIMIT_MEMLOCK; only the success path is asserted
    let searcher = match Searcher::<Euclidean>::load(&path, true) {
        Ok(s) => s,
        Err(_) => Searcher::<Euclidean>::load(&path, false).unwrap(),
    };
    searcher.madvise(annforest::Advice::WillNeed);
    assert_eq!(searcher.get_nns_by_item(0, 1, None)[0].1, 0);
}

#[cfg(target_os = "linux")]
#[test]
fn huge_page_copy_load_when_available() {
    use annforest::storage::Mapping;

    let vectors = gaussian_unit_vectors(200, 64, 717);
    let idx = build_index::<Euclidean>(&vectors, 64, 5, 14);
    let (_dir, path) = tmp_path("huge.forest");
    idx.save(&path).unwrap();

    // needs a configured HugeTLB pool; without one the OS refuses and the
    // error path is all that can be asserted
    match Mapping::open_huge_pages(&path) {
        Ok(mapping) => {
            let searcher = Searcher::<Euclidean>::from_mapping(mapping).unwrap();
            assert_eq!(searcher.n_items(), 200);
            assert_eq!(searcher.get_nns_by_item(3, 1, None)[0].1, 3);
        }
        Err(_) => {
            // no HugeTLB pool on this machine
        }
    }
}

#[test]
fn truncated_artifact_is_rejected() {
    let vectors = gaussian_unit_vectors(100, 64, 616);
    let idx = build_index::<Euclidean>(&vectors, 64, 3, 13);
    let (_dir, path) = tmp_path("trunc.forest");
    idx.save(&path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() - 7);
    std::fs::write(&path, &bytes).unwrap();
    assert!(Searcher::<Euclidean>::load(&path, false).is_err());

    std::fs::write(&path, [0u8; 5]).unwrap();
    assert!(Searcher::<Euclidean>::load(&path, false).is_err());
}
