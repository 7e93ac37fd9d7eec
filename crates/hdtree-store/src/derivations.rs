//! Derivation nodes and path traversal.
//!
//! Nodes live in `key_derivation` keyed by id. Child edges live in
//! `key_derivation_child` keyed by `parent || index`, which makes sibling
//! indices unique and lets children be listed in ascending index order.

use hdtree_core::error::HdError;
use hdtree_core::path::{PathWithSpecific, QuerySegment};
use hdtree_core::types::{DerivationLevel, KeyDerivationId, KeyDerivationRow, LevelSpecific};

use crate::schema::{Dependency, Table};
use crate::tx::{StoreTx, child_key};

/// Point lookups of nodes.
pub struct GetKeyDerivation;

impl Dependency for GetKeyDerivation {
    const TABLES: &'static [Table] = &[Table::KeyDerivation];
}

impl GetKeyDerivation {
    pub fn get(tx: &StoreTx<'_>, id: KeyDerivationId) -> Result<Option<KeyDerivationRow>, HdError> {
        Ok(tx.get(Table::KeyDerivation, &id.to_key())?)
    }

    /// Like [`get`](Self::get), but a missing node is an error.
    pub fn require(tx: &StoreTx<'_>, id: KeyDerivationId) -> Result<KeyDerivationRow, HdError> {
        Self::get(tx, id)?.ok_or_else(|| HdError::not_found(format!("key derivation {id}")))
    }

    /// Every node, in id order.
    pub fn all(tx: &StoreTx<'_>) -> Result<Vec<KeyDerivationRow>, HdError> {
        Ok(tx
            .scan_prefix::<KeyDerivationRow>(Table::KeyDerivation, &[])?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }
}

/// Child edges of a node.
pub struct GetChildren;

impl Dependency for GetChildren {
    const TABLES: &'static [Table] = &[Table::KeyDerivation, Table::KeyDerivationChild];
}

impl GetChildren {
    pub fn child(
        tx: &StoreTx<'_>,
        parent: KeyDerivationId,
        index: u32,
    ) -> Result<Option<KeyDerivationRow>, HdError> {
        let edge: Option<KeyDerivationId> =
            tx.get(Table::KeyDerivationChild, &child_key(parent.0, index))?;
        match edge {
            Some(id) => GetKeyDerivation::require(tx, id).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`child`](Self::child), registering the edge for conflict
    /// detection so that concurrent inserts of the same child collide.
    pub fn child_for_update(
        tx: &StoreTx<'_>,
        parent: KeyDerivationId,
        index: u32,
    ) -> Result<Option<KeyDerivationRow>, HdError> {
        let edge: Option<KeyDerivationId> =
            tx.get_for_update(Table::KeyDerivationChild, &child_key(parent.0, index))?;
        match edge {
            Some(id) => GetKeyDerivation::require(tx, id).map(Some),
            None => Ok(None),
        }
    }

    /// All children of `parent`, ascending by index.
    pub fn children(
        tx: &StoreTx<'_>,
        parent: KeyDerivationId,
    ) -> Result<Vec<KeyDerivationRow>, HdError> {
        tx.scan_prefix::<KeyDerivationId>(Table::KeyDerivationChild, &parent.to_key())?
            .into_iter()
            .map(|(_, id)| GetKeyDerivation::require(tx, id))
            .collect()
    }

    /// Number of persisted children of `parent`.
    pub fn count(tx: &StoreTx<'_>, parent: KeyDerivationId) -> Result<u32, HdError> {
        let n = tx.count_prefix(Table::KeyDerivationChild, &parent.to_key())?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    pub(crate) fn link(
        tx: &StoreTx<'_>,
        parent: KeyDerivationId,
        index: u32,
        child: KeyDerivationId,
    ) -> Result<(), HdError> {
        Ok(tx.put(Table::KeyDerivationChild, &child_key(parent.0, index), &child)?)
    }
}

/// Walks up and down the tree along explicit paths.
pub struct GetDerivationsByPath;

impl Dependency for GetDerivationsByPath {
    const TABLES: &'static [Table] = &[Table::KeyDerivation, Table::KeyDerivationChild];
}

impl GetDerivationsByPath {
    /// The `num_levels` ancestors of `start` plus `start` itself, ordered
    /// from the topmost ancestor down to `start`.
    ///
    /// Asking for more levels than `start`'s level lies below the root is
    /// `StaleState`: the caller's notion of the node's level is out of date.
    /// `NotFound` is returned only when `start` or a stored parent link is
    /// missing.
    pub fn get_parent_path(
        tx: &StoreTx<'_>,
        start: KeyDerivationId,
        num_levels: u32,
    ) -> Result<Vec<KeyDerivationRow>, HdError> {
        let mut current = GetKeyDerivation::require(tx, start)?;
        if current.level.depth() < num_levels {
            return Err(HdError::stale(format!(
                "cannot ascend {num_levels} levels from a {} node",
                current.level
            )));
        }
        let mut path = Vec::with_capacity(num_levels as usize + 1);
        for _ in 0..num_levels {
            let parent_id = current
                .parent
                .ok_or_else(|| HdError::not_found(format!("parent of derivation {}", current.id)))?;
            let parent = GetKeyDerivation::require(tx, parent_id)?;
            path.push(current);
            current = parent;
        }
        path.push(current);
        path.reverse();
        Ok(path)
    }

    /// `start` followed by the nodes reached by following `indices` in order.
    pub fn get_single_path(
        tx: &StoreTx<'_>,
        start: KeyDerivationId,
        indices: &[u32],
    ) -> Result<Vec<KeyDerivationRow>, HdError> {
        let root = GetKeyDerivation::require(tx, start)?;
        if root.level.descend(indices.len()).is_none() {
            return Err(HdError::stale(format!(
                "cannot descend {} levels from a {} node",
                indices.len(),
                root.level
            )));
        }
        let mut path = Vec::with_capacity(indices.len() + 1);
        path.push(root);
        for index in indices {
            let parent = path[path.len() - 1].id;
            let child = GetChildren::child(tx, parent, *index)?.ok_or_else(|| {
                HdError::not_found(format!("child {index} of derivation {parent}"))
            })?;
            path.push(child);
        }
        Ok(path)
    }

    /// Every node matching `query` below `start`, with the concrete indices
    /// that reached it. Results are ordered by ascending index at each level.
    pub fn get_by_query(
        tx: &StoreTx<'_>,
        start: KeyDerivationId,
        query: &[QuerySegment],
    ) -> Result<Vec<(Vec<u32>, KeyDerivationRow)>, HdError> {
        let root = GetKeyDerivation::require(tx, start)?;
        if root.level.descend(query.len()).is_none() {
            return Err(HdError::stale(format!(
                "query of depth {} below a {} node",
                query.len(),
                root.level
            )));
        }
        let mut out = Vec::new();
        Self::walk(tx, root, query, &mut Vec::new(), &mut out)?;
        Ok(out)
    }

    fn walk(
        tx: &StoreTx<'_>,
        node: KeyDerivationRow,
        query: &[QuerySegment],
        indices: &mut Vec<u32>,
        out: &mut Vec<(Vec<u32>, KeyDerivationRow)>,
    ) -> Result<(), HdError> {
        let Some((segment, rest)) = query.split_first() else {
            out.push((indices.clone(), node));
            return Ok(());
        };
        let children = match segment {
            QuerySegment::Fixed(index) => GetChildren::child(tx, node.id, *index)?
                .into_iter()
                .collect(),
            QuerySegment::Wildcard => GetChildren::children(tx, node.id)?,
        };
        for child in children {
            let index = child
                .index
                .ok_or_else(|| HdError::not_found(format!("index of derivation {}", child.id)))?;
            indices.push(index);
            Self::walk(tx, child, rest, indices, out)?;
            indices.pop();
        }
        Ok(())
    }
}

/// Resolves a node at a fixed path below a start node together with its
/// level-specific record.
pub struct GetPathWithSpecific;

impl Dependency for GetPathWithSpecific {
    const TABLES: &'static [Table] = &[Table::KeyDerivation, Table::KeyDerivationChild];
}

impl GetPathWithSpecific {
    /// Follow `path_to_level` from `start`, which must land on `level`.
    ///
    /// Returns `None` when some node on the way does not exist. `load` is
    /// called with the target node and its failures propagate.
    pub fn get_path<F>(
        tx: &StoreTx<'_>,
        start: KeyDerivationId,
        path_to_level: &[u32],
        level: DerivationLevel,
        load: F,
    ) -> Result<Option<PathWithSpecific>, HdError>
    where
        F: FnOnce(&StoreTx<'_>, &KeyDerivationRow) -> Result<LevelSpecific, HdError>,
    {
        let root = GetKeyDerivation::require(tx, start)?;
        if root.level.descend(path_to_level.len()) != Some(level) {
            return Err(HdError::stale(format!(
                "{} steps below a {} node do not reach the {level} level",
                path_to_level.len(),
                root.level
            )));
        }
        let mut path = vec![root];
        for index in path_to_level {
            let parent = path[path.len() - 1].id;
            match GetChildren::child(tx, parent, *index)? {
                Some(child) => path.push(child),
                None => return Ok(None),
            }
        }
        let target = &path[path.len() - 1];
        let specific = load(tx, target)?;
        Ok(Some(PathWithSpecific { path, specific }))
    }
}
