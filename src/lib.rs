//! # annforest
//!
//! Approximate nearest neighbor search over a forest of randomly-projected
//! binary space-partitioning trees, persisted as a single flat,
//! memory-mappable artifact. Vectors are stored packed to 16 bits with
//! SIMD-accelerated fused decode-and-distance kernels, roughly halving
//! storage and memory bandwidth versus f32 nodes.
//!
//! Construction and query are split into two types: [`Indexer`] owns the
//! mutable build-phase store, [`Searcher`] owns a read-only mapping —
//! either a file mapped from disk or the in-memory writer's handoff, with
//! no disk round trip. Any number of searchers may query one artifact
//! concurrently.
//!
//! ```no_run
//! use annforest::{Euclidean, Indexer, Searcher};
//! use std::path::Path;
//!
//! let vectors = vec![vec![0.0f32; 64]; 1000];
//! let query = vec![0.0f32; 64];
//!
//! let mut indexer = Indexer::<Euclidean>::with_dim(64)?;
//! for (i, v) in vectors.iter().enumerate() {
//!     indexer.add_item(i as u32, v)?;
//! }
//! indexer.build(Some(30))?;
//! indexer.save(Path::new("items.forest"))?;
//!
//! let searcher = Searcher::<Euclidean>::load(Path::new("items.forest"), false)?;
//! let neighbors = searcher.get_nns_by_vector(&query, 10, None);
//! # let _ = neighbors;
//! # Ok::<(), annforest::IndexError>(())
//! ```

/// 16-bit vector packing codec: pack/unpack and fused distance kernels.
pub mod codec;
/// Global tuning constants: growth factor, split attempts, imbalance thresholds.
pub mod config;
/// Error types for construction, persistence, and load.
pub mod error;
/// Forest construction ([`Indexer`]) and query ([`Searcher`]).
pub mod forest;
/// Distance metrics: squared Euclidean and dot product over packed nodes.
pub mod metric;
/// Node record layout, tagged child ids, and zero-copy views.
pub mod node;
/// Deterministic random source for hyperplane sampling.
pub mod rng;
/// Artifact layout, writers, and memory mapping.
pub mod storage;
/// Flat resizable node store used during construction.
pub mod store;

pub use error::{IndexError, Result};
pub use forest::{Indexer, Searcher};
pub use metric::{DotProduct, Euclidean, Metric, MetricKind};

// madvise flags are forwarded verbatim to the OS through memmap2
pub use memmap2::Advice;
