//! Recomputation of cached transformer totals
//!
//! `total_produced` is aggregated from resource attribute values.
//! `total_consumed` is aggregated from the already cached `total_produced`
//! of the children, each divided by the child's factor.
//!
//! Changes are pushed through a work queue: a produced total that moved
//! schedules the parent's consumed total. Consumed totals feed no other
//! stored figure, so the queue drains once those are recomputed.

use std::collections::{BTreeSet, HashSet, VecDeque};

use rusqlite::Connection;
use tracing::debug;

use crate::db;
use crate::error::{FlowError, Result};
use crate::graph::TransformerGraph;
use crate::models::NodeKey;

/// A pending recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Work {
    Produced(i64),
    Consumed(i64),
}

fn not_found(id: i64) -> FlowError {
    FlowError::NotFound(format!("Transformer {}", id))
}

/// Sum the node's attribute across the resources of its group, then store
/// and return it
pub fn recompute_produced(conn: &Connection, graph: &mut TransformerGraph, id: i64) -> Result<u64> {
    let key = graph.get(id).ok_or_else(|| not_found(id))?.key;
    let total = db::sum_group_attribute(conn, key.resource_group_id, key.attribute_definition_id)?;

    let t = graph.get_mut(id).ok_or_else(|| not_found(id))?;
    t.total_produced = total;
    db::update_transformer(conn, t)?;

    debug!(transformer = id, total_produced = total, "Recomputed produced");
    Ok(total)
}

/// Sum `child.total_produced / child.factor` over every child, truncated
/// toward zero, then store and return it. Children are not recomputed.
pub fn recompute_consumed(conn: &Connection, graph: &mut TransformerGraph, id: i64) -> Result<u64> {
    let key = graph.get(id).ok_or_else(|| not_found(id))?.key;
    let share: f64 = graph.children_of(key).map(|child| child.consumed_share()).sum();
    // Totals are stored as SQLite INTEGER (i64)
    if share >= i64::MAX as f64 {
        return Err(FlowError::TotalOverflow { transformer: id });
    }
    let total = share as u64;

    let t = graph.get_mut(id).ok_or_else(|| not_found(id))?;
    t.total_consumed = total;
    db::update_transformer(conn, t)?;

    debug!(transformer = id, total_consumed = total, "Recomputed consumed");
    Ok(total)
}

/// Drain the queue seeded with `seeds`, returning the ids whose totals
/// changed. Work for nodes that no longer exist is skipped.
pub fn propagate(
    conn: &Connection,
    graph: &mut TransformerGraph,
    seeds: impl IntoIterator<Item = Work>,
) -> Result<BTreeSet<i64>> {
    let mut queue: VecDeque<Work> = VecDeque::new();
    let mut queued: HashSet<Work> = HashSet::new();
    for work in seeds {
        if queued.insert(work) {
            queue.push_back(work);
        }
    }

    let mut produced_done = HashSet::new();
    let mut changed = BTreeSet::new();

    while let Some(work) = queue.pop_front() {
        queued.remove(&work);
        match work {
            Work::Produced(id) => {
                let Some(before) = graph.get(id).map(|t| t.total_produced) else {
                    continue;
                };
                // Produced totals depend only on resource values
                if !produced_done.insert(id) {
                    continue;
                }
                if recompute_produced(conn, graph, id)? == before {
                    continue;
                }
                changed.insert(id);

                if let Some(parent_id) = graph.parent_of(id).map(|p| p.id) {
                    let next = Work::Consumed(parent_id);
                    if queued.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            Work::Consumed(id) => {
                let Some(before) = graph.get(id).map(|t| t.total_consumed) else {
                    continue;
                };
                if recompute_consumed(conn, graph, id)? != before {
                    changed.insert(id);
                }
            }
        }
    }

    Ok(changed)
}

/// Set a new factor and push the change to the parent
pub fn propagate_factor_change(
    conn: &Connection,
    graph: &mut TransformerGraph,
    id: i64,
    new_factor: f64,
) -> Result<BTreeSet<i64>> {
    validate_factor(new_factor)?;

    let t = graph.get_mut(id).ok_or_else(|| not_found(id))?;
    if t.consume_from.is_none() {
        return Err(FlowError::FactorWithoutParent);
    }
    t.factor = Some(new_factor);
    db::update_transformer(conn, t)?;

    let parent = graph.parent_of(id).map(|p| Work::Consumed(p.id));
    propagate(conn, graph, parent)
}

/// After a relink, the old parent lost a child and the new parent gained one
pub fn propagate_reparent(
    conn: &Connection,
    graph: &mut TransformerGraph,
    old_parent: Option<NodeKey>,
    new_parent: Option<NodeKey>,
) -> Result<BTreeSet<i64>> {
    let seeds: Vec<Work> = [old_parent, new_parent]
        .into_iter()
        .flatten()
        .filter_map(|key| graph.find(key))
        .map(|p| Work::Consumed(p.id))
        .collect();
    propagate(conn, graph, seeds)
}

/// Recompute every produced total, then every consumed total
pub fn refresh_all(conn: &Connection, graph: &mut TransformerGraph) -> Result<BTreeSet<i64>> {
    let ids: Vec<i64> = graph.iter().map(|t| t.id).collect();
    let seeds = ids
        .iter()
        .map(|&id| Work::Produced(id))
        .chain(ids.iter().map(|&id| Work::Consumed(id)))
        .collect::<Vec<_>>();
    propagate(conn, graph, seeds)
}

pub fn validate_factor(factor: f64) -> Result<()> {
    if factor.is_finite() && factor > 0.0 {
        Ok(())
    } else {
        Err(FlowError::InvalidFactor(factor))
    }
}
