//! In-memory index over the transformer graph
//!
//! Nodes are keyed by `(resource_group, attribute_definition)`. Two indexes
//! are maintained incrementally:
//! - `by_key`: node key -> transformer id, used for parent lookup
//! - `children`: parent key -> ids of transformers consuming from that key
//!
//! The children index is keyed by the parent *key*, not the parent node, so a
//! transformer may point at a pair that has no transformer yet and will be
//! counted as soon as one is created.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::error::{FlowError, Result};
use crate::models::{NodeKey, Transformer};

/// A parent walk revisited this resource group
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("circular loop on resource group {resource_group_id}")]
pub struct CycleDetected {
    pub resource_group_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct TransformerGraph {
    nodes: BTreeMap<i64, Transformer>,
    by_key: HashMap<NodeKey, i64>,
    children: HashMap<NodeKey, BTreeSet<i64>>,
}

impl TransformerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from persisted rows
    pub fn from_transformers(transformers: impl IntoIterator<Item = Transformer>) -> Result<Self> {
        let mut graph = Self::new();
        for t in transformers {
            graph.insert(t)?;
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Transformer> {
        self.nodes.get(&id)
    }

    /// Mutable access for totals, factor and thresholds. Re-parenting must go
    /// through [`TransformerGraph::set_parent`] to keep the indexes in sync.
    pub(crate) fn get_mut(&mut self, id: i64) -> Option<&mut Transformer> {
        self.nodes.get_mut(&id)
    }

    pub fn find(&self, key: NodeKey) -> Option<&Transformer> {
        self.by_key.get(&key).and_then(|id| self.nodes.get(id))
    }

    /// All transformers ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Transformer> {
        self.nodes.values()
    }

    /// Add a node. Fails if a transformer with the same key already exists.
    pub fn insert(&mut self, t: Transformer) -> Result<()> {
        if self.by_key.contains_key(&t.key) {
            return Err(FlowError::DuplicateEdge {
                resource_group_id: t.key.resource_group_id,
                attribute_definition_id: t.key.attribute_definition_id,
            });
        }

        self.by_key.insert(t.key, t.id);
        if let Some(parent_key) = t.consume_from {
            self.children.entry(parent_key).or_default().insert(t.id);
        }
        self.nodes.insert(t.id, t);
        Ok(())
    }

    /// Remove a node from every index. Children pointing at its key keep
    /// their `consume_from`; detach them with [`TransformerGraph::set_parent`].
    pub fn remove(&mut self, id: i64) -> Option<Transformer> {
        let t = self.nodes.remove(&id)?;
        self.by_key.remove(&t.key);
        if let Some(parent_key) = t.consume_from {
            self.unlink_child(parent_key, id);
        }
        Some(t)
    }

    /// Point a node at a new parent key, returning the previous one. A root
    /// carries no factor; a linked node without one gets 1.
    pub fn set_parent(&mut self, id: i64, parent: Option<NodeKey>) -> Result<Option<NodeKey>> {
        let t = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| FlowError::NotFound(format!("Transformer {}", id)))?;
        let old = std::mem::replace(&mut t.consume_from, parent);
        match parent {
            None => t.factor = None,
            Some(_) => {
                t.factor.get_or_insert(1.0);
            }
        }

        if let Some(old_key) = old {
            self.unlink_child(old_key, id);
        }
        if let Some(new_key) = parent {
            self.children.entry(new_key).or_default().insert(id);
        }
        Ok(old)
    }

    fn unlink_child(&mut self, parent_key: NodeKey, id: i64) {
        if let Some(ids) = self.children.get_mut(&parent_key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.children.remove(&parent_key);
            }
        }
    }

    /// The transformer this node consumes from, if both the link and the
    /// target node exist
    pub fn parent_of(&self, id: i64) -> Option<&Transformer> {
        let parent_key = self.nodes.get(&id)?.consume_from?;
        self.find(parent_key)
    }

    pub fn child_ids(&self, key: NodeKey) -> Vec<i64> {
        self.children
            .get(&key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn children_of(&self, key: NodeKey) -> impl Iterator<Item = &Transformer> {
        self.children
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Walk parents from `id`, recording each resource group. Revisiting a
    /// group is a cycle; reaching a root is not.
    pub fn check_acyclic(&self, id: i64) -> std::result::Result<(), CycleDetected> {
        let mut visited = HashSet::new();
        let mut current = self.nodes.get(&id);

        while let Some(t) = current {
            if !visited.insert(t.key.resource_group_id) {
                return Err(CycleDetected {
                    resource_group_id: t.key.resource_group_id,
                });
            }
            current = t.consume_from.and_then(|key| self.find(key));
        }
        Ok(())
    }

    /// Check the parent chain of `id` and of every node that transitively
    /// consumes from it. Any loop introduced by editing `id` shows up on one
    /// of these chains.
    pub fn check_descendants(&self, id: i64) -> std::result::Result<(), CycleDetected> {
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            let Some(t) = self.nodes.get(&current) else {
                continue;
            };
            self.check_acyclic(current)?;
            for child in self.child_ids(t.key) {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        Ok(())
    }

    /// Check every node, returning the first cycle found
    pub fn find_any_cycle(&self) -> Option<CycleDetected> {
        self.nodes
            .keys()
            .find_map(|&id| self.check_acyclic(id).err())
    }
}
