//! Block storage trait and in-memory implementation.
//!
//! The Merkle-Clock never dereferences a CID itself; it resolves parent links
//! through a [`BlockStore`]. Stores use interior mutability so a single store
//! can be shared between the clock and the transaction layer.

use crate::event::{BlockError, RawBlock};
use crate::hash::Cid;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Trait for content-addressed event block storage.
pub trait BlockStore: Send + Sync {
    /// Get a block by its CID.
    fn get(&self, cid: &Cid) -> Option<RawBlock>;

    /// Store a block, returning its CID.
    ///
    /// The CID is verified against the block bytes. Parents need not be
    /// present yet; blocks may arrive out of order during sync.
    fn put(&self, block: RawBlock) -> Result<Cid, BlockError>;

    /// Check if a block exists in the store.
    fn contains(&self, cid: &Cid) -> bool;

    /// Resolve the parent links of a block, if the block is known.
    fn parents(&self, cid: &Cid) -> Option<Vec<Cid>>;

    /// CIDs that are referenced as parents but not present.
    fn missing(&self) -> HashSet<Cid>;

    /// Get the total number of blocks.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get all known ancestors of a block (transitive closure over parents).
    ///
    /// Ancestors whose own block is missing are included, but the walk
    /// cannot continue past them.
    fn ancestors(&self, cid: &Cid) -> HashSet<Cid> {
        let mut result = HashSet::new();
        let mut stack = self.parents(cid).unwrap_or_default();

        while let Some(current) = stack.pop() {
            if result.insert(current) {
                if let Some(parents) = self.parents(&current) {
                    stack.extend(parents);
                }
            }
        }

        result
    }

    /// Check whether `ancestor` is reachable from `descendant` through
    /// parent links.
    fn is_ancestor(&self, ancestor: &Cid, descendant: &Cid) -> bool {
        self.ancestors(descendant).contains(ancestor)
    }

    /// The known blocks reachable from `heads` (inclusive), parents before
    /// children. Concurrent blocks are ordered by CID so every replica
    /// produces the same sequence.
    fn topological_order(&self, heads: &[Cid]) -> Vec<Cid> {
        let mut reachable: HashSet<Cid> = HashSet::new();
        for head in heads {
            if self.contains(head) {
                reachable.insert(*head);
            }
            reachable.extend(self.ancestors(head).into_iter().filter(|c| self.contains(c)));
        }

        let mut in_degree: HashMap<Cid, usize> = HashMap::new();
        let mut children: HashMap<Cid, Vec<Cid>> = HashMap::new();
        for cid in &reachable {
            let parents: Vec<Cid> = self
                .parents(cid)
                .unwrap_or_default()
                .into_iter()
                .filter(|p| reachable.contains(p))
                .collect();
            in_degree.insert(*cid, parents.len());
            for parent in parents {
                children.entry(parent).or_default().push(*cid);
            }
        }

        // Kahn's algorithm with an ordered ready set
        let mut ready: BTreeSet<Cid> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(cid, _)| *cid)
            .collect();
        let mut result = Vec::with_capacity(reachable.len());

        while let Some(cid) = ready.pop_first() {
            result.push(cid);
            for child in children.get(&cid).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }

        result
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    blocks: HashMap<Cid, RawBlock>,
    missing: HashSet<Cid>,
}

/// In-memory implementation of [`BlockStore`].
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored CIDs, sorted.
    pub fn cids(&self) -> Vec<Cid> {
        let mut cids: Vec<Cid> = self.inner.read().blocks.keys().copied().collect();
        cids.sort();
        cids
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, cid: &Cid) -> Option<RawBlock> {
        self.inner.read().blocks.get(cid).cloned()
    }

    fn put(&self, block: RawBlock) -> Result<Cid, BlockError> {
        if !block.verify() {
            return Err(BlockError::VerificationFailed(block.cid()));
        }

        let cid = block.cid();
        let mut inner = self.inner.write();
        if inner.blocks.contains_key(&cid) {
            return Ok(cid);
        }

        for parent in block.parents() {
            if !inner.blocks.contains_key(parent) {
                inner.missing.insert(*parent);
            }
        }
        inner.missing.remove(&cid);
        inner.blocks.insert(cid, block);

        Ok(cid)
    }

    fn contains(&self, cid: &Cid) -> bool {
        self.inner.read().blocks.contains_key(cid)
    }

    fn parents(&self, cid: &Cid) -> Option<Vec<Cid>> {
        self.inner
            .read()
            .blocks
            .get(cid)
            .map(|block| block.parents().to_vec())
    }

    fn missing(&self) -> HashSet<Cid> {
        self.inner.read().missing.clone()
    }

    fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }
}
