//! Entity merge bookkeeping.
//!
//! Merges form chains (A into B, B into C). Every lookup goes through a
//! union-find with path compression, so a merge is always applied against the
//! final surviving entity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `source` is superseded by `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityMerge {
    pub source: Uuid,
    pub target: Uuid,
}

/// Union-find over entity uuids. Roots are the surviving entities.
#[derive(Debug, Clone, Default)]
pub struct MergeForest {
    parent: HashMap<Uuid, Uuid>,
}

impl MergeForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surviving entity for `id`.
    pub fn find(&mut self, id: Uuid) -> Uuid {
        let mut root = id;
        while let Some(&next) = self.parent.get(&root) {
            root = next;
        }
        // Compress.
        let mut node = id;
        while let Some(&next) = self.parent.get(&node) {
            if next == root {
                break;
            }
            self.parent.insert(node, root);
            node = next;
        }
        root
    }

    /// Record that `source` is superseded by `target`. Returns `false` when
    /// both already resolve to the same entity, which also rules out cycles.
    pub fn union(&mut self, source: Uuid, target: Uuid) -> bool {
        let source_root = self.find(source);
        let target_root = self.find(target);
        if source_root == target_root {
            return false;
        }
        self.parent.insert(source_root, target_root);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// One merge per superseded entity, each pointing at its final root.
    pub fn merges(&mut self) -> Vec<EntityMerge> {
        let mut sources: Vec<Uuid> = self.parent.keys().copied().collect();
        sources.sort();
        sources
            .into_iter()
            .map(|source| EntityMerge {
                source,
                target: self.find(source),
            })
            .collect()
    }
}
