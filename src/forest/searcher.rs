//! Query-side view of a packed forest artifact.
//!
//! The searcher maps the artifact read-only and never mutates it; any
//! number of searchers may query the same mapping concurrently, each with
//! its own query-local scratch. Traversal is best-first: a max-heap seeded
//! with every root at infinite priority, descending split nodes by margin
//! and draining leaf-index blocks straight out of the mapping until the
//! candidate budget is met, then one fused exact-distance pass over the
//! deduplicated candidates.

use crate::codec;
use crate::error::{IndexError, Result};
use crate::metric::{Metric, QueryNode};
use crate::node::{
    self, leaf_block_at, packed_node_at, LeafBlock, PackedNode, INDEX_MASK, LEAF_FLAG,
};
use crate::storage::{Header, Mapping, FORMAT_VERSION, HEADER_SIZE};
use memmap2::Advice;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;
use std::marker::PhantomData;
use std::path::Path;

/// Portable software prefetch hint (L1 cache, read).
/// No-op on unsupported platforms.
#[inline(always)]
fn prefetch_read(ptr: *const u8) {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!(
            "prfm pldl1keep, [{ptr}]",
            ptr = in(reg) ptr,
            options(nostack, preserves_flags)
        );
    }
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_mm_prefetch(ptr as *const i8, std::arch::x86_64::_MM_HINT_T0);
    }
    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    let _ = ptr;
}

/// Read-only searcher over a loaded artifact.
///
/// The artifact does not record which metric built it; loading with a
/// different metric type than the builder used yields garbage distances.
pub struct Searcher<M: Metric> {
    dim: usize,
    k: usize,
    node_size: usize,
    n_items: u32,
    n_nodes: u32,
    nodes_offset: usize,
    roots: Vec<u32>,
    mapping: Mapping,
    _metric: PhantomData<M>,
}

impl<M: Metric> Searcher<M> {
    /// Map an artifact file read-only. With `need_mlock`, its pages are
    /// locked resident after mapping.
    pub fn load(path: &Path, need_mlock: bool) -> Result<Self> {
        Self::from_mapping(Mapping::open(path, need_mlock)?)
    }

    /// Adopt an already-established mapping (file-backed or the in-memory
    /// writer's handoff).
    pub fn from_mapping(mapping: Mapping) -> Result<Self> {
        let bytes = mapping.bytes();
        if bytes.len() < HEADER_SIZE {
            return Err(IndexError::MalformedArtifact(format!(
                "{} bytes is smaller than the header",
                bytes.len()
            )));
        }

        let header = Header::read_tail(bytes);
        if header.version != FORMAT_VERSION {
            return Err(IndexError::MalformedArtifact(format!(
                "unsupported version {}",
                header.version
            )));
        }
        let dim = header.vlen as usize;
        let k = header.idx_block_len as usize;
        node::check_layout(dim, k).map_err(IndexError::MalformedArtifact)?;

        let node_size = node::node_size(dim, 2);
        let nodes_offset = header.nblocks as usize * k * std::mem::size_of::<u32>();
        let body = bytes
            .len()
            .checked_sub(HEADER_SIZE + nodes_offset)
            .ok_or_else(|| {
                IndexError::MalformedArtifact("index blocks overrun the file".into())
            })?;
        if body % node_size != 0 {
            return Err(IndexError::MalformedArtifact(format!(
                "node region of {body} bytes is not a multiple of the node size {node_size}"
            )));
        }
        let n_nodes = (body / node_size) as u32;

        let mut searcher = Self {
            dim,
            k,
            node_size,
            n_items: 0,
            n_nodes,
            nodes_offset,
            roots: Vec::new(),
            mapping,
            _metric: PhantomData,
        };

        // Find the roots by scanning the tail of the node array for the
        // run of equal n_descendants values.
        let mut degree: Option<i32> = None;
        for i in (0..n_nodes).rev() {
            let nd = searcher.node(i).header.n_descendants;
            match degree {
                None => {
                    if nd < 0 {
                        return Err(IndexError::MalformedArtifact(format!(
                            "negative descendant count {nd} at tail node {i}"
                        )));
                    }
                    degree = Some(nd);
                    searcher.roots.push(i);
                }
                Some(d) if nd == d => searcher.roots.push(i),
                Some(_) => break,
            }
        }
        // The original of the last root directly precedes its tail copy;
        // drop it when the scan picked up both.
        if searcher.roots.len() > 1 {
            let first = searcher.node(searcher.roots[0]).header.children[0];
            let last = searcher.node(*searcher.roots.last().unwrap()).header.children[0];
            if first == last {
                searcher.roots.pop();
            }
        }
        searcher.n_items = degree.unwrap_or(0) as u32;

        tracing::debug!(
            "loaded index: {} items, {} nodes, {} roots, dim {}",
            searcher.n_items,
            searcher.n_nodes,
            searcher.roots.len(),
            dim
        );
        Ok(searcher)
    }

    pub fn n_items(&self) -> u32 {
        self.n_items
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Decode item `item`'s stored vector into `out` (`out.len() == dim`).
    pub fn get_item(&self, item: u32, out: &mut [f32]) {
        assert!(item < self.n_items, "item {item} out of range");
        assert_eq!(out.len(), self.dim);
        codec::unpack(self.node(item).v, out);
    }

    /// Normalized distance between two stored items.
    pub fn get_distance(&self, i: u32, j: u32) -> f32 {
        assert!(i < self.n_items && j < self.n_items);
        let other = self.node(j);
        let mut v = vec![0.0f32; self.dim];
        codec::unpack(other.v, &mut v);
        // carry the stored extra scalar so the dot metric's factor term
        // participates in item-to-item distances
        let query = QueryNode {
            bias: other.header.bias,
            v,
        };
        M::normalized_distance(M::packed_distance(&self.node(i), &query))
    }

    /// The `n` nearest stored items to item `item`, as
    /// `(normalized_distance, id)` sorted closest-first. `search_k` bounds
    /// the candidate collection; `None` means `n * n_roots`.
    pub fn get_nns_by_item(
        &self,
        item: u32,
        n: usize,
        search_k: Option<usize>,
    ) -> Vec<(f32, u32)> {
        let mut v = vec![0.0f32; self.dim];
        self.get_item(item, &mut v);
        self.get_nns_by_vector(&v, n, search_k)
    }

    /// The `n` nearest stored items to a query vector.
    pub fn get_nns_by_vector(
        &self,
        v: &[f32],
        n: usize,
        search_k: Option<usize>,
    ) -> Vec<(f32, u32)> {
        assert_eq!(v.len(), self.dim);
        let query = QueryNode::new::<M>(v);
        let mut result = self.collect_nns(&query, n, search_k, |_| true);
        for entry in &mut result {
            entry.0 = M::normalized_distance(entry.0);
        }
        result
    }

    /// Filtered variant of [`Searcher::get_nns_by_item`]. The predicate
    /// sees each candidate's raw distance and may rewrite it for
    /// presentation; rejected candidates are dropped. Distances in the
    /// result stay raw.
    pub fn get_nns_by_item_filter<F>(
        &self,
        item: u32,
        n: usize,
        search_k: Option<usize>,
        filter: F,
    ) -> Vec<(f32, u32)>
    where
        F: FnMut(&mut f32) -> bool,
    {
        let mut v = vec![0.0f32; self.dim];
        self.get_item(item, &mut v);
        self.get_nns_by_vector_filter(&v, n, search_k, filter)
    }

    /// Filtered variant of [`Searcher::get_nns_by_vector`]; raw distances.
    pub fn get_nns_by_vector_filter<F>(
        &self,
        v: &[f32],
        n: usize,
        search_k: Option<usize>,
        filter: F,
    ) -> Vec<(f32, u32)>
    where
        F: FnMut(&mut f32) -> bool,
    {
        assert_eq!(v.len(), self.dim);
        let query = QueryNode::new::<M>(v);
        self.collect_nns(&query, n, search_k, filter)
    }

    /// Deep clone with physically separate storage (fresh anonymous
    /// mapping for in-memory sources, a re-map for file-backed ones).
    /// The clone answers every query identically to its parent.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            dim: self.dim,
            k: self.k,
            node_size: self.node_size,
            n_items: self.n_items,
            n_nodes: self.n_nodes,
            nodes_offset: self.nodes_offset,
            roots: self.roots.clone(),
            mapping: self.mapping.try_clone()?,
            _metric: PhantomData,
        })
    }

    /// Forward an advice flag for the whole mapping to the OS.
    pub fn madvise(&self, advice: Advice) -> bool {
        self.mapping.advise(advice)
    }

    #[inline]
    fn node(&self, i: u32) -> PackedNode<'_> {
        let region = &self.mapping.bytes()[self.nodes_offset..];
        let node = packed_node_at(region, self.node_size, self.dim, i);
        prefetch_read(node.header as *const _ as *const u8);
        node
    }

    #[inline]
    fn leaf_block(&self, i: u32) -> LeafBlock<'_> {
        let region = &self.mapping.bytes()[..self.nodes_offset];
        let block = leaf_block_at(region, self.k, i);
        prefetch_read(block.as_ptr() as *const u8);
        block
    }

    fn collect_nns<F>(
        &self,
        query: &QueryNode,
        n: usize,
        search_k: Option<usize>,
        mut filter: F,
    ) -> Vec<(f32, u32)>
    where
        F: FnMut(&mut f32) -> bool,
    {
        let search_k = search_k.unwrap_or(n * self.roots.len());

        let mut queue: BinaryHeap<(OrderedFloat<f32>, u32)> = self
            .roots
            .iter()
            .map(|&r| (OrderedFloat(M::pq_initial()), r))
            .collect();

        // candidate ids only; distances come later so duplicate candidates
        // cost no kernel invocations
        let mut nns: Vec<u32> = Vec::with_capacity(search_k + 2 * self.k);
        while let Some((OrderedFloat(d), tagged)) = queue.pop() {
            let i = tagged & INDEX_MASK;
            if tagged & LEAF_FLAG == 0 {
                let node = self.node(i);
                if node.header.n_descendants == 1 && i < self.n_items {
                    nns.push(i);
                } else {
                    let margin = M::packed_margin(&node, &query.v);
                    queue.push((
                        OrderedFloat(M::pq_distance(d, margin, 1)),
                        node.header.children[1],
                    ));
                    queue.push((
                        OrderedFloat(M::pq_distance(d, margin, 0)),
                        node.header.children[0],
                    ));
                }
            } else {
                // index-only block: bulk-copy its ids
                nns.extend_from_slice(self.leaf_block(i).ids());
            }
            if nns.len() >= search_k {
                break;
            }
        }

        // sort by id so duplicates collapse in one pass, then compute the
        // exact fused distance once per unique candidate
        nns.sort_unstable();
        let mut result: Vec<(f32, u32)> = Vec::with_capacity(nns.len());
        let mut last = u32::MAX;
        for &j in &nns {
            if j == last {
                continue;
            }
            last = j;
            let node = self.node(j);
            // guards gap nodes from sparse item ids
            if node.header.n_descendants == 1 {
                let mut dist = M::packed_distance(&node, query);
                if filter(&mut dist) {
                    result.push((dist, j));
                }
            }
        }

        let found = result.len();
        let keep = n.min(found);
        if keep < found && keep > 0 {
            result.select_nth_unstable_by(keep - 1, cmp_dist);
        }
        result.truncate(keep);
        result.sort_unstable_by(cmp_dist);
        result
    }
}

#[inline]
fn cmp_dist(a: &(f32, u32), b: &(f32, u32)) -> std::cmp::Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::Indexer;
    use crate::metric::Euclidean;

    fn build_line_index(n: u32) -> Searcher<Euclidean> {
        // items on a line: item i at (i / n, 0, ..)
        let mut idx = Indexer::<Euclidean>::with_dim(8).unwrap();
        idx.set_seed(42);
        for i in 0..n {
            let mut v = [0.0f32; 8];
            v[0] = i as f32 / n as f32;
            idx.add_item(i, &v).unwrap();
        }
        idx.build(Some(10)).unwrap();
        idx.into_searcher().unwrap()
    }

    #[test]
    fn test_self_query_returns_self_first() {
        let s = build_line_index(100);
        for item in [0u32, 13, 50, 99] {
            let result = s.get_nns_by_item(item, 3, None);
            assert_eq!(result[0].1, item, "nearest to item {item} must be itself");
            assert!(result[0].0 < 1e-4, "self distance should be ~0");
        }
    }

    #[test]
    fn test_results_are_sorted_and_neighbors_sane() {
        let s = build_line_index(100);
        let result = s.get_nns_by_item(50, 10, Some(10_000));
        for pair in result.windows(2) {
            assert!(pair[0].0 <= pair[1].0, "distances must be non-decreasing");
        }
        // with an exhaustive budget the true line-neighbors win
        let ids: Vec<u32> = result.iter().map(|r| r.1).collect();
        assert!(ids.contains(&49) && ids.contains(&51));
    }

    #[test]
    fn test_filter_drops_and_rewrites() {
        let s = build_line_index(64);
        let mut v = [0.0f32; 8];
        s.get_item(10, &mut v);
        // keep only near candidates, presenting distances doubled
        let result = s.get_nns_by_vector_filter(&v, 64, Some(10_000), |d| {
            if *d < 0.01 {
                *d *= 2.0;
                true
            } else {
                false
            }
        });
        assert!(!result.is_empty());
        assert!(result.iter().all(|r| r.0 < 0.02));
        assert!(result.iter().any(|r| r.1 == 10));
    }

    #[test]
    fn test_zero_result_request() {
        let s = build_line_index(16);
        assert!(s.get_nns_by_item(0, 0, None).is_empty());
    }

    #[test]
    fn test_get_distance_matches_search_distance() {
        let s = build_line_index(32);
        let from_search = s
            .get_nns_by_item(4, 5, Some(1_000))
            .into_iter()
            .find(|r| r.1 == 5)
            .unwrap();
        let direct = s.get_distance(4, 5);
        assert!(
            (from_search.0 - direct).abs() < 1e-6,
            "search and get_distance disagree: {} vs {direct}",
            from_search.0
        );
    }
}
