//! ANN benchmark: synthetic gaussian vectors, Euclidean metric.
//! Measures Recall@10 against brute force and QPS across search_k budgets.
//!
//! Usage: cargo bench --bench ann_recall

use annforest::rng::SplitRng;
use annforest::{Euclidean, Indexer};
use std::time::Instant;

const N_ITEMS: usize = 20_000;
const N_QUERIES: usize = 200;
const DIM: usize = 64;
const N_TREES: usize = 30;
const K_NEIGHBORS: usize = 10;

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

fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Exact top-k by brute force, used as ground truth.
fn ground_truth(items: &[Vec<f32>], query: &[f32], k: usize) -> Vec<u32> {
    let mut dists: Vec<(f32, u32)> = items
        .iter()
        .enumerate()
        .map(|(i, v)| (euclidean_sq(query, v), i as u32))
        .collect();
    dists.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
    dists.truncate(k);
    dists.into_iter().map(|(_, i)| i).collect()
}

fn main() {
    println!("generating {N_ITEMS} vectors (dim {DIM})...");
    let items = gaussian_unit_vectors(N_ITEMS, DIM, 1);
    let queries = gaussian_unit_vectors(N_QUERIES, DIM, 2);

    println!("building {N_TREES} trees...");
    let build_start = Instant::now();
    let mut indexer = Indexer::<Euclidean>::with_dim(DIM).unwrap();
    indexer.set_seed(42);
    for (i, v) in items.iter().enumerate() {
        indexer.add_item(i as u32, v).unwrap();
    }
    indexer.build(Some(N_TREES)).unwrap();
    let searcher = indexer.into_searcher().unwrap();
    println!("built in {:.2?}", build_start.elapsed());

    println!("computing ground truth...");
    let truth: Vec<Vec<u32>> = queries
        .iter()
        .map(|q| ground_truth(&items, q, K_NEIGHBORS))
        .collect();

    println!(
        "{:>10} {:>12} {:>12} {:>12}",
        "search_k", "recall@10", "qps", "avg_us"
    );
    for search_k in [100usize, 400, 1_600, 6_400, 25_600] {
        let start = Instant::now();
        let mut hit = 0usize;
        for (q, t) in queries.iter().zip(truth.iter()) {
            let result = searcher.get_nns_by_vector(q, K_NEIGHBORS, Some(search_k));
            hit += result.iter().filter(|&&(_, id)| t.contains(&id)).count();
        }
        let elapsed = start.elapsed();
        let recall = hit as f64 / (N_QUERIES * K_NEIGHBORS) as f64;
        let qps = N_QUERIES as f64 / elapsed.as_secs_f64();
        let avg_us = elapsed.as_micros() as f64 / N_QUERIES as f64;
        println!("{search_k:>10} {recall:>12.4} {qps:>12.0} {avg_us:>12.1}");
    }
}
