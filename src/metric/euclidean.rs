//! Squared-Euclidean metric.
//!
//! Split planes are sampled by a short Metropolis-Hastings walk: each step
//! draws a Gaussian direction, projects every child onto it, and keeps the
//! direction when the projected spread beats a uniform draw against the
//! best spread seen so far. The plane offset is a uniform draw inside the
//! projected range, negated so `margin = bias + v·y`.

use crate::codec;
use crate::config;
use crate::metric::{normalize, sq_norm, Metric, MetricKind, QueryNode, SplitPlane};
use crate::node::{FloatNode, FloatNodeMut, PackedNode};
use crate::rng::SplitRng;
use crate::store::NodeStore;

pub struct Euclidean;

impl Metric for Euclidean {
    const KIND: MetricKind = MetricKind::Euclidean;

    /// At a leaf, `bias` holds the squared norm of `v`. Split nodes
    /// overwrite it with the hyperplane offset.
    fn init_node(node: &mut FloatNodeMut<'_>) {
        node.header.bias = sq_norm(node.v);
    }

    fn preprocess(_store: &mut NodeStore, _n_items: u32) {}

    fn create_split(
        children: &[FloatNode<'_>],
        dim: usize,
        rng: &mut SplitRng,
        plane: &mut SplitPlane,
    ) {
        plane.clear();
        if children.is_empty() {
            return;
        }

        let mut candidate = vec![0.0f32; dim];
        let mut best_spread = 0.0f32;

        for _ in 0..config::SPLIT_STEPS {
            for x in candidate.iter_mut() {
                *x = rng.standard_normal();
            }
            normalize(&mut candidate);

            let mut lo = f32::INFINITY;
            let mut hi = f32::NEG_INFINITY;
            for child in children {
                let p = codec::dot_f32(&candidate, child.v);
                lo = lo.min(p);
                hi = hi.max(p);
            }

            let spread = hi - lo;
            if spread > rng.uniform(0.0, best_spread) {
                best_spread = spread;
                plane.v.copy_from_slice(&candidate);
                plane.bias = -rng.uniform(lo, hi);
            }
        }
    }

    #[inline]
    fn margin(plane: &SplitPlane, y: &[f32]) -> f32 {
        plane.bias + codec::dot_f32(&plane.v, y)
    }

    #[inline]
    fn packed_margin(node: &PackedNode<'_>, y: &[f32]) -> f32 {
        node.header.bias + codec::decode_and_dot(node.v, y)
    }

    #[inline]
    fn packed_distance(node: &PackedNode<'_>, query: &QueryNode) -> f32 {
        codec::decode_and_euclidean(node.v, &query.v)
    }

    /// Identity: callers see the squared distance and may take the root
    /// themselves.
    #[inline]
    fn normalized_distance(raw: f32) -> f32 {
        raw
    }

    fn init_query(query: &mut QueryNode) {
        query.bias = sq_norm(&query.v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeHeader;

    fn plane(bias: f32, v: Vec<f32>) -> SplitPlane {
        SplitPlane { bias, v }
    }

    #[test]
    fn test_margin_is_affine() {
        let p = plane(0.5, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let y = [2.0, 9.0, 9.0, 9.0, 9.0, 9.0, 9.0, 9.0];
        assert!((Euclidean::margin(&p, &y) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_side_ties_use_coin() {
        let p = plane(0.0, vec![0.0; 8]);
        let y = [1.0; 8];
        let mut rng = SplitRng::new(5);
        let mut seen = [false, false];
        for _ in 0..64 {
            seen[Euclidean::side(&p, &y, &mut rng) as usize] = true;
        }
        assert!(seen[0] && seen[1], "zero margin should flip both ways");
    }

    #[test]
    fn test_create_split_separates_clusters() {
        // two clusters far apart on the first axis
        let dim = 8;
        let mut vecs: Vec<Vec<f32>> = Vec::new();
        for i in 0..10 {
            let mut v = vec![0.0f32; dim];
            v[0] = if i < 5 { -10.0 } else { 10.0 };
            v[1] = (i as f32) * 0.01;
            vecs.push(v);
        }
        let headers: Vec<NodeHeader> = vecs
            .iter()
            .map(|_| NodeHeader {
                n_descendants: 1,
                bias: 0.0,
                children: [0, 0],
            })
            .collect();
        let children: Vec<FloatNode<'_>> = vecs
            .iter()
            .zip(headers.iter())
            .map(|(v, h)| FloatNode { header: h, v })
            .collect();

        let mut rng = SplitRng::new(11);
        let mut p = SplitPlane::new(dim);
        Euclidean::create_split(&children, dim, &mut rng, &mut p);

        let left = vecs
            .iter()
            .filter(|v| Euclidean::side(&p, v.as_slice(), &mut rng))
            .count();
        assert!(
            left > 0 && left < 10,
            "a spread-maximizing plane should separate the clusters, got {left}/10"
        );
        // the two cluster centers must land on opposite sides
        let a = Euclidean::margin(&p, &vecs[0]);
        let b = Euclidean::margin(&p, &vecs[9]);
        assert!(a * b < 0.0, "cluster centers on the same side: {a} vs {b}");
    }

    #[test]
    fn test_create_split_identical_points_gives_zero_plane() {
        let dim = 8;
        let v = vec![0.25f32; dim];
        let h = NodeHeader {
            n_descendants: 1,
            bias: 0.0,
            children: [0, 0],
        };
        let children = vec![FloatNode { header: &h, v: &v }; 6];
        let mut rng = SplitRng::new(2);
        let mut p = SplitPlane::new(dim);
        Euclidean::create_split(&children, dim, &mut rng, &mut p);
        // zero spread never beats the acceptance draw; plane stays zeroed
        assert!(p.v.iter().all(|&x| x == 0.0));
        assert_eq!(p.bias, 0.0);
    }
}
