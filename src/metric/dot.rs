//! Dot-product metric.
//!
//! Dot-product search is turned into a Euclidean-style split search by the
//! preprocessing step: with `M = max ‖v‖` over all items, every item gets
//! an implicit extra coordinate `dot_factor = sqrt(M² - ‖v‖²)`, placing it
//! on a `(dim+1)`-sphere of radius `M`. The extra coordinate lives in the
//! node header's `bias` field; query nodes carry zero there, so the extra
//! term vanishes for external queries.

use crate::codec;
use crate::metric::{normalize, sq_norm, Metric, MetricKind, QueryNode, SplitPlane};
use crate::node::{FloatNode, FloatNodeMut, PackedNode};
use crate::rng::SplitRng;
use crate::store::NodeStore;

pub struct DotProduct;

impl Metric for DotProduct {
    const KIND: MetricKind = MetricKind::DotProduct;

    /// `dot_factor` is assigned by [`Metric::preprocess`]; a fresh leaf
    /// carries zero.
    fn init_node(node: &mut FloatNodeMut<'_>) {
        node.header.bias = 0.0;
    }

    /// Compute the maximum 2-norm over all items, then give each item the
    /// extra coordinate that lifts it onto the common sphere. Gap nodes
    /// from sparse item ids are skipped.
    fn preprocess(store: &mut NodeStore, n_items: u32) {
        let mut max_sq = 0.0f32;
        for i in 0..n_items {
            if store.header(i).n_descendants != 1 {
                continue;
            }
            max_sq = max_sq.max(sq_norm(store.vector(i)));
        }
        for i in 0..n_items {
            if store.header(i).n_descendants != 1 {
                continue;
            }
            let factor = (max_sq - sq_norm(store.vector(i))).max(0.0).sqrt();
            store.header_mut(i).bias = factor;
        }
    }

    /// Sample two distinct children and split along the difference of
    /// their directions. Split nodes carry `dot_factor = 0`, so margins
    /// reduce to the plain hyperplane dot during both build and query.
    fn create_split(
        children: &[FloatNode<'_>],
        dim: usize,
        rng: &mut SplitRng,
        plane: &mut SplitPlane,
    ) {
        plane.clear();
        if children.len() < 2 {
            return;
        }

        let (i, j) = rng.index_pair(children.len());
        let ni = sq_norm(children[i].v).sqrt().max(f32::MIN_POSITIVE);
        let nj = sq_norm(children[j].v).sqrt().max(f32::MIN_POSITIVE);
        for z in 0..dim {
            plane.v[z] = children[i].v[z] / ni - children[j].v[z] / nj;
        }
        normalize(&mut plane.v);
    }

    #[inline]
    fn margin(plane: &SplitPlane, y: &[f32]) -> f32 {
        codec::dot_f32(&plane.v, y) + plane.bias * plane.bias
    }

    #[inline]
    fn packed_margin(node: &PackedNode<'_>, y: &[f32]) -> f32 {
        codec::decode_and_dot(node.v, y) + node.header.bias * node.header.bias
    }

    #[inline]
    fn packed_distance(node: &PackedNode<'_>, query: &QueryNode) -> f32 {
        -(codec::decode_and_dot(node.v, &query.v) + node.header.bias * query.bias)
    }

    /// Magnitude of the raw (negated) dot product; 1 for a unit vector
    /// matched against itself.
    #[inline]
    fn normalized_distance(raw: f32) -> f32 {
        raw.abs()
    }

    fn init_query(query: &mut QueryNode) {
        query.bias = 0.0;
    }
}
