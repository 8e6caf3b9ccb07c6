//! Distance metrics over the packed forest.
//!
//! Two metrics are supported: squared Euclidean and dot product. Each is a
//! type implementing [`Metric`], which covers the whole metric surface:
//! leaf initialization, optional whole-store preprocessing, hyperplane
//! construction, side tests during build, fused margin/distance kernels
//! against packed nodes during search, and the presentation mapping from
//! raw to normalized distances.
//!
//! The artifact does not record the metric; an index must be loaded with
//! the same metric type it was built with.

/// Dot-product metric with max-norm preprocessing.
pub mod dot;
/// Squared-Euclidean metric with Metropolis-Hastings hyperplane sampling.
pub mod euclidean;

pub use dot::DotProduct;
pub use euclidean::Euclidean;

use crate::codec;
use crate::node::{FloatNode, FloatNodeMut, PackedNode};
use crate::rng::SplitRng;
use crate::store::NodeStore;
use serde::{Deserialize, Serialize};

/// Which metric an index was built with. Selects node-field interpretation
/// and distance kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Squared Euclidean distance. Lower is closer; self-distance is 0.
    Euclidean,
    /// Negated dot product (after max-norm preprocessing). Normalized
    /// self-distance of a unit vector is 1.
    DotProduct,
}

/// Scratch hyperplane produced by `create_split` and written into the
/// split node afterwards. Lives outside the node store so recursion and
/// store growth cannot invalidate it.
#[derive(Debug, Clone)]
pub struct SplitPlane {
    pub bias: f32,
    pub v: Vec<f32>,
}

impl SplitPlane {
    pub fn new(dim: usize) -> Self {
        Self {
            bias: 0.0,
            v: vec![0.0; dim],
        }
    }

    pub fn clear(&mut self) {
        self.bias = 0.0;
        self.v.fill(0.0);
    }
}

/// A query held in full precision, compared against packed nodes.
/// `bias` is the metric's extra scalar: squared norm for Euclidean
/// (unused by the kernels), `dot_factor` for dot product (zero for
/// external queries, so the extra term vanishes).
#[derive(Debug, Clone)]
pub struct QueryNode {
    pub bias: f32,
    pub v: Vec<f32>,
}

impl QueryNode {
    pub fn new<M: Metric>(v: &[f32]) -> Self {
        let mut q = Self {
            bias: 0.0,
            v: v.to_vec(),
        };
        M::init_query(&mut q);
        q
    }
}

/// The full metric surface used by the builder and the searcher.
pub trait Metric: Send + Sync + 'static {
    const KIND: MetricKind;

    /// Initialize a freshly copied leaf node's extra scalar.
    fn init_node(node: &mut FloatNodeMut<'_>);

    /// Whole-store preprocessing before tree construction. Runs once,
    /// over items only.
    fn preprocess(store: &mut NodeStore, n_items: u32);

    /// Sample a hyperplane separating `children` into `plane`.
    fn create_split(
        children: &[FloatNode<'_>],
        dim: usize,
        rng: &mut SplitRng,
        plane: &mut SplitPlane,
    );

    /// Signed distance of `y` from the hyperplane (build phase, f32).
    fn margin(plane: &SplitPlane, y: &[f32]) -> f32;

    /// Which side of the hyperplane `y` falls on; exact ties are broken
    /// by the fair coin.
    #[inline]
    fn side(plane: &SplitPlane, y: &[f32], rng: &mut SplitRng) -> bool {
        let m = Self::margin(plane, y);
        if m != 0.0 {
            m > 0.0
        } else {
            rng.flip()
        }
    }

    /// Fused margin of query vector `y` against a packed split node.
    fn packed_margin(node: &PackedNode<'_>, y: &[f32]) -> f32;

    /// Fused exact distance between a packed item node and a query node.
    fn packed_distance(node: &PackedNode<'_>, query: &QueryNode) -> f32;

    /// Map the raw algebraic distance to its presentation form.
    fn normalized_distance(raw: f32) -> f32;

    /// Initialize a query node's extra scalar.
    fn init_query(query: &mut QueryNode);

    /// Bounded priority for descending into a child: the path keeps the
    /// minimum of the parent priority and the (signed) margin.
    #[inline]
    fn pq_distance(parent: f32, margin: f32, side: usize) -> f32 {
        if side == 1 {
            parent.min(margin)
        } else {
            parent.min(-margin)
        }
    }

    /// Priority assigned to forest roots when seeding the search queue.
    #[inline]
    fn pq_initial() -> f32 {
        f32::INFINITY
    }
}

/// Squared 2-norm.
#[inline]
pub(crate) fn sq_norm(v: &[f32]) -> f32 {
    codec::dot_f32(v, v)
}

/// In-place L2 normalization. Zero vectors are left unchanged.
#[inline]
pub(crate) fn normalize(v: &mut [f32]) {
    let norm = sq_norm(v).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
