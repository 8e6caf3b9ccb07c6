//! Index construction.
//!
//! The indexer owns a growing flat node store. Items land in slots
//! `0..n_items` as leaf nodes; `build` then repeatedly partitions the item
//! set with random hyperplanes, appending split nodes post-order so every
//! tree's root is the highest-numbered node of its pass. Small branches
//! are externalized into fixed-width leaf-index blocks addressed through
//! tagged child ids. After the last tree, every root is byte-duplicated at
//! the tail of the array — the loader finds them with a backward scan
//! instead of a root table.
//!
//! Item ids may be sparse: unassigned slots stay zeroed
//! (`n_descendants == 0`) and are excluded from every tree.

use crate::codec;
use crate::config;
use crate::error::{IndexError, Result};
use crate::forest::Searcher;
use crate::metric::{Metric, SplitPlane};
use crate::node::{self, check_layout, FloatNode, LEAF_FLAG};
use crate::rng::SplitRng;
use crate::storage::{
    self, FileWriter, Header, IndexWriter, MemWriter, FORMAT_VERSION, HEADER_SIZE,
};
use crate::store::NodeStore;
use std::marker::PhantomData;
use std::path::Path;

/// Builds a packed forest index. Single-owner; queries go through
/// [`Searcher`] after [`Indexer::save`] or [`Indexer::into_searcher`].
pub struct Indexer<M: Metric> {
    dim: usize,
    k: usize,
    store: NodeStore,
    n_items: u32,
    n_nodes: u32,
    roots: Vec<u32>,
    index_blocks: Vec<Vec<u32>>,
    rng: SplitRng,
    verbose: bool,
    _metric: PhantomData<M>,
}

impl<M: Metric> Indexer<M> {
    /// `dim` must be a multiple of 8; `k` (the leaf block length in id
    /// slots) must keep blocks 16-byte aligned (`k % 4 == 0`) and cannot
    /// exceed `dim`.
    pub fn new(dim: usize, k: usize) -> Result<Self> {
        check_layout(dim, k).map_err(IndexError::InvalidConfig)?;
        Ok(Self {
            dim,
            k,
            store: NodeStore::new(dim, node::node_size(dim, 4)),
            n_items: 0,
            n_nodes: 0,
            roots: Vec::new(),
            index_blocks: Vec::new(),
            rng: SplitRng::default(),
            verbose: false,
            _metric: PhantomData,
        })
    }

    /// Convenience constructor with the common `k == dim` block length.
    pub fn with_dim(dim: usize) -> Result<Self> {
        Self::new(dim, dim)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_items(&self) -> u32 {
        self.n_items
    }

    /// Reset the random stream. Call before `build` for reproducible
    /// forests.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Pre-size the node store for `n` nodes.
    pub fn preallocate(&mut self, n: usize) {
        self.store.ensure(n);
    }

    /// Add an item's vector under id `item`. Ids may arrive in any order
    /// and may leave gaps. Must precede [`Indexer::build`].
    pub fn add_item(&mut self, item: u32, w: &[f32]) -> Result<()> {
        if w.len() != self.dim {
            return Err(IndexError::InvalidConfig(format!(
                "vector length {} does not match index dimension {}",
                w.len(),
                self.dim
            )));
        }
        self.store.ensure(item as usize + 1);
        let mut node = self.store.float_node_mut(item);
        node.header.n_descendants = 1;
        node.header.bias = 0.0;
        node.header.children = [0, 0];
        node.v.copy_from_slice(w);
        M::init_node(&mut node);

        if item >= self.n_items {
            self.n_items = item + 1;
        }
        Ok(())
    }

    /// Build the forest. `Some(q)` builds `q` trees; `None` keeps adding
    /// trees until the node count reaches twice the item count.
    pub fn build(&mut self, trees: Option<usize>) -> Result<()> {
        M::preprocess(&mut self.store, self.n_items);

        self.n_nodes = self.n_items;
        loop {
            match trees {
                Some(q) => {
                    if self.roots.len() >= q {
                        break;
                    }
                }
                None => {
                    if self.n_nodes as u64 >= self.n_items as u64 * 2 {
                        break;
                    }
                }
            }
            if self.verbose {
                tracing::info!("pass {}...", self.roots.len());
            }

            let mut indices = Vec::with_capacity(self.n_items as usize);
            for i in 0..self.n_items {
                if self.store.header(i).n_descendants >= 1 {
                    indices.push(i);
                }
            }
            // cannot make roots without items
            if indices.is_empty() {
                break;
            }

            let root = self.make_tree(&indices, true);
            self.roots.push(root);
        }

        // Byte-copy the roots into the last segment of the array so the
        // loader can find them without reading the whole file.
        let nroots = self.roots.len() as u32;
        self.store.ensure((self.n_nodes + nroots) as usize);
        for (i, &r) in self.roots.iter().enumerate() {
            self.store.copy_node(r, self.n_nodes + i as u32);
        }
        self.n_nodes += nroots;

        if self.verbose {
            tracing::info!("has {} nodes across {} roots", self.n_nodes, nroots);
        }
        Ok(())
    }

    /// Exact byte length of the serialized artifact.
    pub fn calculated_size(&self) -> usize {
        let packed_size = node::node_size(self.dim, 2);
        packed_size * self.n_nodes as usize
            + self.k * std::mem::size_of::<u32>() * self.index_blocks.len()
            + HEADER_SIZE
    }

    /// Serialize to a file. Consumes the indexer; query through
    /// [`Searcher::load`].
    pub fn save(self, path: &Path) -> Result<()> {
        let mut writer = FileWriter::create(path)?;
        self.write_artifact(&mut writer)?;
        writer.finish()?;
        Ok(())
    }

    /// Serialize into an anonymous mapping and hand it straight to a
    /// searcher — no disk round trip.
    pub fn into_searcher(self) -> Result<Searcher<M>> {
        let mut writer = MemWriter::with_len(self.calculated_size())?;
        self.write_artifact(&mut writer)?;
        Searcher::from_mapping(writer.into_mapping()?)
    }

    fn write_artifact<W: IndexWriter>(&self, w: &mut W) -> Result<()> {
        let iblocks = self.index_blocks.len();

        if self.verbose {
            tracing::info!(
                "packing {} items, {} nodes, {} leaf blocks ({} bytes)",
                self.n_items,
                self.n_nodes,
                iblocks,
                self.calculated_size()
            );
            if iblocks > 0 {
                let total: usize = self.index_blocks.iter().map(Vec::len).sum();
                let avg = total as f64 / iblocks as f64;
                let waste = (1.0 - avg / (self.k - 1) as f64) * 100.0;
                tracing::info!(
                    "leaf block sizes: avg={avg:.3} max={} waste={waste:.1}%",
                    self.k - 1
                );
            }
        }

        // leaf-index blocks first: [count][ids..][zero padding]
        let mut block = vec![0u32; self.k];
        for ids in &self.index_blocks {
            block.fill(0);
            block[0] = ids.len() as u32;
            block[1..1 + ids.len()].copy_from_slice(ids);
            w.write(storage::u32s_as_bytes(&block))?;
        }

        // then every node, header verbatim and payload packed to i16
        let mut packed = vec![0i16; self.dim];
        for i in 0..self.n_nodes {
            let n = self.store.float_node(i);
            codec::pack(n.v, &mut packed);
            w.write(n.header.as_bytes())?;
            w.write(storage::i16s_as_bytes(&packed))?;
        }

        // header goes to the tail to keep the file head naturally aligned
        let header = Header {
            version: FORMAT_VERSION,
            vlen: self.dim as u32,
            idx_block_len: self.k as u32,
            nblocks: iblocks as u32,
        };
        w.write(header.as_bytes())?;
        Ok(())
    }

    /// Externalize a branch into a leaf-index block; the returned child id
    /// carries the leaf flag.
    fn append_indices(&mut self, indices: &[u32]) -> u32 {
        let i = self.index_blocks.len() as u32;
        self.index_blocks.push(indices.to_vec());
        i | LEAF_FLAG
    }

    fn make_tree(&mut self, indices: &[u32], is_root: bool) -> u32 {
        let isz = indices.len();

        if isz == 1 && !is_root {
            return indices[0];
        }

        // slot 0 of a block holds the count, so a block fits k - 1 ids
        let max_leaf = self.k - 1;

        if isz <= max_leaf && (!is_root || self.n_items as usize <= max_leaf || isz == 1) {
            if !is_root {
                // only non-roots become index-only blocks
                return self.append_indices(indices);
            }

            // A trivially small root still has to be a node: the loader
            // scans node headers to find roots. Point both children at the
            // whole item set; duplicate candidates fall out in the dedup
            // pass.
            self.store.ensure(self.n_nodes as usize + 1);
            let item = self.n_nodes;
            self.n_nodes += 1;
            let child = if isz == 1 {
                indices[0]
            } else {
                self.append_indices(indices)
            };
            let header = self.store.header_mut(item);
            header.n_descendants = self.n_items as i32;
            header.children = [child, child];
            return item;
        }

        let mut sides: [Vec<u32>; 2] = [Vec::new(), Vec::new()];
        let mut plane = SplitPlane::new(self.dim);

        for _ in 0..config::SPLIT_ATTEMPTS {
            sides[0].clear();
            sides[1].clear();
            {
                let mut children: Vec<FloatNode<'_>> = Vec::with_capacity(isz);
                for &j in indices {
                    children.push(self.store.float_node(j));
                }
                M::create_split(&children, self.dim, &mut self.rng, &mut plane);
            }
            for &j in indices {
                let side = M::side(&plane, self.store.vector(j), &mut self.rng);
                sides[side as usize].push(j);
            }
            if split_imbalance(&sides[0], &sides[1]) < config::IMBALANCE_RETRY {
                break;
            }
        }

        // No usable hyperplane: zero it and assign sides by coin flip.
        while split_imbalance(&sides[0], &sides[1]) > config::IMBALANCE_GIVE_UP {
            if self.verbose {
                tracing::info!(
                    "no hyperplane found (left has {}, right has {}), randomizing sides",
                    sides[0].len(),
                    sides[1].len()
                );
            }
            sides[0].clear();
            sides[1].clear();
            plane.clear();
            for &j in indices {
                sides[self.rng.flip() as usize].push(j);
            }
        }

        // recurse into the smaller child first for cache locality
        let flip = usize::from(sides[0].len() > sides[1].len());
        let mut children_ids = [0u32; 2];
        for side in 0..2 {
            let s = side ^ flip;
            children_ids[s] = self.make_tree(&sides[s], false);
        }

        self.store.ensure(self.n_nodes as usize + 1);
        let item = self.n_nodes;
        self.n_nodes += 1;
        let node = self.store.float_node_mut(item);
        node.header.n_descendants = if is_root {
            self.n_items as i32
        } else {
            isz as i32
        };
        node.header.bias = plane.bias;
        node.header.children = children_ids;
        node.v.copy_from_slice(&plane.v);

        item
    }
}

fn split_imbalance(left: &[u32], right: &[u32]) -> f64 {
    let ls = left.len() as f64;
    let rs = right.len() as f64;
    let f = ls / (ls + rs + 1e-9); // avoid 0/0
    f.max(1.0 - f)
}
