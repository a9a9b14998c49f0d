//! Mutation API over the store and the transformer graph
//!
//! Every edit runs in a single SQLite transaction together with the
//! propagation it triggers. The graph index is staged on a copy and only
//! replaces the live one after commit, so a rejected or failed edit leaves
//! both untouched.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::db;
use crate::error::{FlowError, Result};
use crate::graph::TransformerGraph;
use crate::models::{
    AttributeDefinition, NodeKey, Resource, ResourceAttribute, ResourceGroup, Transformer,
};
use crate::propagation::{self, Work};

pub struct Tracker {
    conn: Connection,
    graph: TransformerGraph,
}

impl Tracker {
    /// Open (or create) a file-backed store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Initialize the schema and rebuild the graph index from stored rows
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_schema(&conn)?;
        let graph = TransformerGraph::from_transformers(db::list_transformers(&conn)?)?;
        if let Some(cycle) = graph.find_any_cycle() {
            warn!(
                resource_group = cycle.resource_group_id,
                "Stored transformers contain a circular loop"
            );
        }
        Ok(Self { conn, graph })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn graph(&self) -> &TransformerGraph {
        &self.graph
    }

    fn edit<T>(
        &mut self,
        f: impl FnOnce(&Connection, &mut TransformerGraph) -> Result<T>,
    ) -> Result<T> {
        let mut staged = self.graph.clone();
        let tx = self.conn.transaction()?;
        let out = f(&tx, &mut staged)?;
        tx.commit()?;
        self.graph = staged;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Resource groups
    // -----------------------------------------------------------------------

    pub fn create_group(&mut self, name: &str) -> Result<ResourceGroup> {
        let group = self.edit(|conn, _| db::insert_group(conn, name))?;
        info!(group = %group.name, id = group.id, "Resource group created");
        Ok(group)
    }

    /// Delete an empty group that no transformer refers to
    pub fn delete_group(&mut self, id: i64) -> Result<()> {
        let group = self.group(id)?;

        let resources = db::count_resources_in_group(&self.conn, id)?;
        if resources > 0 {
            return Err(FlowError::ReferentialIntegrity {
                entity: format!("resource group '{}'", group.name),
                referenced_by: format!("{} resource(s)", resources),
            });
        }
        let referenced = self.graph.iter().any(|t| {
            t.key.resource_group_id == id
                || t.consume_from.is_some_and(|k| k.resource_group_id == id)
        });
        if referenced {
            return Err(FlowError::ReferentialIntegrity {
                entity: format!("resource group '{}'", group.name),
                referenced_by: "transformers".to_string(),
            });
        }

        self.edit(|conn, _| db::delete_group(conn, id))?;
        info!(group = %group.name, "Resource group deleted");
        Ok(())
    }

    pub fn group(&self, id: i64) -> Result<ResourceGroup> {
        db::get_group(&self.conn, id)?
            .ok_or_else(|| FlowError::NotFound(format!("Resource group {}", id)))
    }

    pub fn group_by_name(&self, name: &str) -> Result<ResourceGroup> {
        db::find_group_by_name(&self.conn, name)?
            .ok_or_else(|| FlowError::NotFound(format!("Resource group '{}'", name)))
    }

    pub fn groups(&self) -> Result<Vec<ResourceGroup>> {
        db::list_groups(&self.conn)
    }

    // -----------------------------------------------------------------------
    // Attribute definitions
    // -----------------------------------------------------------------------

    /// Register an attribute name; defining an existing name returns it
    pub fn define_attribute(
        &mut self,
        name: &str,
        description: Option<&str>,
    ) -> Result<AttributeDefinition> {
        let attribute = self.edit(|conn, _| db::upsert_attribute(conn, name, description))?;
        info!(attribute = %attribute.name, id = attribute.id, "Attribute defined");
        Ok(attribute)
    }

    pub fn delete_attribute(&mut self, id: i64) -> Result<()> {
        let attribute = self.attribute(id)?;
        let referenced = self.graph.iter().any(|t| {
            t.key.attribute_definition_id == id
                || t.consume_from.is_some_and(|k| k.attribute_definition_id == id)
        });
        if referenced {
            return Err(FlowError::ReferentialIntegrity {
                entity: format!("attribute '{}'", attribute.name),
                referenced_by: "transformers".to_string(),
            });
        }

        self.edit(|conn, _| db::delete_attribute(conn, id))?;
        info!(attribute = %attribute.name, "Attribute deleted");
        Ok(())
    }

    pub fn attribute(&self, id: i64) -> Result<AttributeDefinition> {
        db::get_attribute(&self.conn, id)?
            .ok_or_else(|| FlowError::NotFound(format!("Attribute {}", id)))
    }

    pub fn attribute_by_name(&self, name: &str) -> Result<AttributeDefinition> {
        db::find_attribute_by_name(&self.conn, name)?
            .ok_or_else(|| FlowError::NotFound(format!("Attribute '{}'", name)))
    }

    pub fn attributes(&self) -> Result<Vec<AttributeDefinition>> {
        db::list_attributes(&self.conn)
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    /// Create a resource carrying a zero value for every attribute its group
    /// produces
    pub fn create_resource(&mut self, group_id: i64, name: &str) -> Result<Resource> {
        let group = self.group(group_id)?;
        let resource = self.edit(|conn, graph| {
            let resource = db::insert_resource(conn, group_id, name)?;
            for t in graph.iter().filter(|t| t.key.resource_group_id == group_id) {
                db::init_resource_attribute(conn, resource.id, t.key.attribute_definition_id)?;
            }
            Ok(resource)
        })?;
        info!(group = %group.name, resource = %resource.name, "Resource created");
        Ok(resource)
    }

    /// Delete a resource whose attribute values are all zero
    pub fn delete_resource(&mut self, id: i64) -> Result<()> {
        let resource = self.resource(id)?;
        if db::count_nonzero_values(&self.conn, id)? > 0 {
            return Err(FlowError::ReferentialIntegrity {
                entity: format!("resource '{}'", resource.name),
                referenced_by: "non-zero attribute values".to_string(),
            });
        }

        self.edit(|conn, _| db::delete_resource(conn, id))?;
        info!(resource = %resource.name, "Resource deleted");
        Ok(())
    }

    pub fn resource(&self, id: i64) -> Result<Resource> {
        db::get_resource(&self.conn, id)?
            .ok_or_else(|| FlowError::NotFound(format!("Resource {}", id)))
    }

    pub fn resource_by_name(&self, group_id: i64, name: &str) -> Result<Resource> {
        db::find_resource_by_name(&self.conn, group_id, name)?
            .ok_or_else(|| FlowError::NotFound(format!("Resource '{}'", name)))
    }

    pub fn resources(&self, group_id: i64) -> Result<Vec<Resource>> {
        db::list_resources(&self.conn, group_id)
    }

    pub fn resource_attributes(&self, resource_id: i64) -> Result<Vec<ResourceAttribute>> {
        db::get_resource_attributes(&self.conn, resource_id)
    }

    /// Set a raw attribute value and push the new produced total up the
    /// chain. Returns the transformers whose totals changed.
    pub fn set_attribute(
        &mut self,
        resource_id: i64,
        attribute_name: &str,
        value: u64,
    ) -> Result<BTreeSet<i64>> {
        let resource = self.resource(resource_id)?;
        let attribute = self.attribute_by_name(attribute_name)?;
        let key = NodeKey::new(resource.resource_group_id, attribute.id);
        let owner = self.graph.find(key).map(|t| t.id).ok_or_else(|| {
            FlowError::NotFound(format!(
                "Transformer for attribute '{}' on the group of resource '{}'",
                attribute.name, resource.name
            ))
        })?;

        let changed = self.edit(|conn, graph| {
            db::init_resource_attribute(conn, resource.id, attribute.id)?;
            db::set_attribute_value(conn, resource.id, attribute.id, value)?;
            propagation::propagate(conn, graph, [Work::Produced(owner)])
        })?;
        info!(
            resource = %resource.name,
            attribute = %attribute.name,
            value,
            changed = changed.len(),
            "Attribute value set"
        );
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Transformers
    // -----------------------------------------------------------------------

    fn check_key(&self, key: NodeKey) -> Result<()> {
        self.group(key.resource_group_id)?;
        self.attribute(key.attribute_definition_id)?;
        Ok(())
    }

    fn check_not_self(key: NodeKey, parent: Option<NodeKey>) -> Result<()> {
        if parent.is_some_and(|p| p.resource_group_id == key.resource_group_id) {
            warn!(resource_group = key.resource_group_id, "Rejected self consumption");
            return Err(FlowError::SelfConsumption(key.resource_group_id));
        }
        Ok(())
    }

    /// Link a group's attribute as a producer, optionally consuming from
    /// another `(group, attribute)` pair. The factor defaults to 1 when a
    /// parent is given.
    pub fn create_edge(
        &mut self,
        key: NodeKey,
        parent: Option<NodeKey>,
        factor: Option<f64>,
    ) -> Result<Transformer> {
        self.check_key(key)?;
        if let Some(parent_key) = parent {
            self.check_key(parent_key)?;
        }
        Self::check_not_self(key, parent)?;
        if let Some(f) = factor {
            propagation::validate_factor(f)?;
        }
        if self.graph.find(key).is_some() {
            warn!(%key, "Rejected duplicate transformer");
            return Err(FlowError::DuplicateEdge {
                resource_group_id: key.resource_group_id,
                attribute_definition_id: key.attribute_definition_id,
            });
        }

        let factor = match (parent, factor) {
            (Some(_), None) => Some(1.0),
            (None, Some(_)) => {
                warn!(%key, "Rejected factor on a root transformer");
                return Err(FlowError::FactorWithoutParent);
            }
            (_, factor) => factor,
        };

        let created = self.edit(|conn, graph| {
            let mut t = Transformer::new(key, parent, factor);
            t.id = db::insert_transformer(conn, &t)?;
            let id = t.id;
            graph.insert(t)?;
            check_cycle(conn, graph, id)?;

            db::init_group_attribute(conn, key.resource_group_id, key.attribute_definition_id)?;

            let mut seeds = vec![Work::Produced(id), Work::Consumed(id)];
            if let Some(p) = graph.parent_of(id) {
                seeds.push(Work::Consumed(p.id));
            }
            propagation::propagate(conn, graph, seeds)?;

            graph
                .get(id)
                .cloned()
                .ok_or_else(|| FlowError::NotFound(format!("Transformer {}", id)))
        })?;
        info!(id = created.id, %key, parent = ?parent, "Transformer created");
        Ok(created)
    }

    /// Change what a transformer consumes from. The old and new parents are
    /// both recomputed.
    pub fn relink(&mut self, id: i64, new_parent: Option<NodeKey>) -> Result<BTreeSet<i64>> {
        let key = self.transformer(id)?.key;
        if let Some(parent_key) = new_parent {
            self.check_key(parent_key)?;
        }
        Self::check_not_self(key, new_parent)?;

        let changed = self.edit(|conn, graph| {
            let old_parent = graph.set_parent(id, new_parent)?;
            check_cycle(conn, graph, id)?;

            if let Some(t) = graph.get(id) {
                db::update_transformer(conn, t)?;
            }
            propagation::propagate_reparent(conn, graph, old_parent, new_parent)
        })?;
        info!(id, parent = ?new_parent, changed = changed.len(), "Transformer relinked");
        Ok(changed)
    }

    pub fn set_factor(&mut self, id: i64, factor: f64) -> Result<BTreeSet<i64>> {
        self.transformer(id)?;
        let changed =
            self.edit(|conn, graph| propagation::propagate_factor_change(conn, graph, id, factor))?;
        info!(id, factor, "Transformer factor changed");
        Ok(changed)
    }

    pub fn set_thresholds(&mut self, id: i64, yellow: i64, red: i64) -> Result<()> {
        self.transformer(id)?;
        self.edit(|conn, graph| {
            let t = graph
                .get_mut(id)
                .ok_or_else(|| FlowError::NotFound(format!("Transformer {}", id)))?;
            t.yellow_threshold_percent_consumed = yellow;
            t.red_threshold_percent_consumed = red;
            db::update_transformer(conn, t)
        })?;
        info!(id, yellow, red, "Transformer thresholds changed");
        Ok(())
    }

    /// Remove a transformer and the attribute values it aggregated. Children
    /// are detached and become roots.
    pub fn delete_transformer(&mut self, id: i64) -> Result<()> {
        let key = self.transformer(id)?.key;

        let detached = self.edit(|conn, graph| {
            let parent = graph.parent_of(id).map(|p| p.id);

            db::delete_group_attribute_values(
                conn,
                key.resource_group_id,
                key.attribute_definition_id,
            )?;

            let children = graph.child_ids(key);
            for &child in &children {
                graph.set_parent(child, None)?;
                if let Some(t) = graph.get(child) {
                    db::update_transformer(conn, t)?;
                }
            }

            graph.remove(id);
            db::delete_transformer(conn, id)?;

            propagation::propagate(conn, graph, parent.map(Work::Consumed))?;
            Ok(children.len())
        })?;
        info!(id, %key, detached, "Transformer deleted");
        Ok(())
    }

    /// Rebuild every cached total from resource values
    pub fn refresh(&mut self) -> Result<BTreeSet<i64>> {
        let changed = self.edit(propagation::refresh_all)?;
        info!(changed = changed.len(), "Totals refreshed");
        Ok(changed)
    }

    pub fn transformer(&self, id: i64) -> Result<&Transformer> {
        self.graph
            .get(id)
            .ok_or_else(|| FlowError::NotFound(format!("Transformer {}", id)))
    }

    pub fn find(&self, key: NodeKey) -> Option<&Transformer> {
        self.graph.find(key)
    }

    pub fn transformers(&self) -> impl Iterator<Item = &Transformer> {
        self.graph.iter()
    }

    pub fn parent_of(&self, id: i64) -> Option<&Transformer> {
        self.graph.parent_of(id)
    }

    pub fn children_of(&self, key: NodeKey) -> impl Iterator<Item = &Transformer> {
        self.graph.children_of(key)
    }

    /// Resolve `(group name, attribute name)` to a node key
    pub fn key_for(&self, group: &str, attribute: &str) -> Result<NodeKey> {
        let group = self.group_by_name(group)?;
        let attribute = self.attribute_by_name(attribute)?;
        Ok(NodeKey::new(group.id, attribute.id))
    }

    /// Human readable `group/attribute` label
    pub fn label(&self, key: NodeKey) -> Result<String> {
        let group = self.group(key.resource_group_id)?;
        let attribute = self.attribute(key.attribute_definition_id)?;
        Ok(format!("{}/{}", group.name, attribute.name))
    }
}

fn check_cycle(conn: &Connection, graph: &TransformerGraph, id: i64) -> Result<()> {
    if let Err(cycle) = graph.check_descendants(id) {
        let resource_group = db::get_group(conn, cycle.resource_group_id)?
            .map(|g| g.name)
            .unwrap_or_else(|| cycle.resource_group_id.to_string());
        warn!(transformer = id, %resource_group, "Rejected circular loop");
        return Err(FlowError::Cycle { resource_group });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(groups: &[&str]) -> (Tracker, i64) {
        let mut tracker = Tracker::open_in_memory().unwrap();
        for name in groups {
            tracker.create_group(name).unwrap();
        }
        let cpu = tracker.define_attribute("cpu", None).unwrap().id;
        (tracker, cpu)
    }

    #[test]
    fn rejected_edit_leaves_store_and_graph_untouched() {
        let (mut tracker, _) = tracker_with(&["A", "B"]);
        let a = tracker.key_for("A", "cpu").unwrap();
        let b = tracker.key_for("B", "cpu").unwrap();
        let root = tracker.create_edge(a, None, None).unwrap();
        tracker.create_edge(b, Some(a), None).unwrap();

        let err = tracker.relink(root.id, Some(b)).unwrap_err();
        assert!(matches!(err, FlowError::Cycle { ref resource_group } if resource_group == "A"));

        assert_eq!(tracker.transformer(root.id).unwrap().consume_from, None);
        let stored = db::list_transformers(tracker.connection()).unwrap();
        assert_eq!(stored.iter().find(|t| t.id == root.id).unwrap().consume_from, None);
    }

    #[test]
    fn cycle_through_pending_child_is_rejected_on_create() {
        let (mut tracker, _) = tracker_with(&["A", "B"]);
        let a = tracker.key_for("A", "cpu").unwrap();
        let b = tracker.key_for("B", "cpu").unwrap();

        // A points at B before B exists
        tracker.create_edge(a, Some(b), None).unwrap();
        let err = tracker.create_edge(b, Some(a), None).unwrap_err();
        assert!(matches!(err, FlowError::Cycle { .. }));
        assert!(tracker.find(b).is_none());
        assert_eq!(db::list_transformers(tracker.connection()).unwrap().len(), 1);
    }

    #[test]
    fn factor_defaults_to_one_only_with_parent() {
        let (mut tracker, _) = tracker_with(&["A", "B"]);
        let a = tracker.key_for("A", "cpu").unwrap();
        let b = tracker.key_for("B", "cpu").unwrap();

        let root = tracker.create_edge(a, None, None).unwrap();
        assert_eq!(root.factor, None);
        let child = tracker.create_edge(b, Some(a), None).unwrap();
        assert_eq!(child.factor, Some(1.0));
    }

    #[test]
    fn relink_from_root_sets_default_factor() {
        let (mut tracker, _) = tracker_with(&["A", "B"]);
        let a = tracker.key_for("A", "cpu").unwrap();
        let b = tracker.key_for("B", "cpu").unwrap();
        tracker.create_edge(a, None, None).unwrap();
        let child = tracker.create_edge(b, None, None).unwrap();

        tracker.relink(child.id, Some(a)).unwrap();
        assert_eq!(tracker.transformer(child.id).unwrap().factor, Some(1.0));
        assert_eq!(tracker.parent_of(child.id).unwrap().key, a);
    }

    #[test]
    fn detaching_clears_factor_and_root_factor_is_rejected() {
        let (mut tracker, _) = tracker_with(&["A", "B"]);
        let a = tracker.key_for("A", "cpu").unwrap();
        let b = tracker.key_for("B", "cpu").unwrap();
        let root = tracker.create_edge(a, None, None).unwrap();
        let child = tracker.create_edge(b, Some(a), Some(3.0)).unwrap();

        tracker.relink(child.id, None).unwrap();
        assert_eq!(tracker.transformer(child.id).unwrap().factor, None);
        let stored = db::list_transformers(tracker.connection()).unwrap();
        assert_eq!(stored.iter().find(|t| t.id == child.id).unwrap().factor, None);

        assert!(matches!(
            tracker.set_factor(root.id, 2.0),
            Err(FlowError::FactorWithoutParent)
        ));
        tracker.define_attribute("ram", None).unwrap();
        let a_ram = tracker.key_for("A", "ram").unwrap();
        assert!(matches!(
            tracker.create_edge(a_ram, None, Some(2.0)),
            Err(FlowError::FactorWithoutParent)
        ));
        assert!(tracker.find(a_ram).is_none());
    }

    #[test]
    fn overflowing_factor_is_rolled_back() {
        let (mut tracker, _) = tracker_with(&["A", "B"]);
        let a = tracker.key_for("A", "cpu").unwrap();
        let b = tracker.key_for("B", "cpu").unwrap();
        let root = tracker.create_edge(a, None, None).unwrap();
        let child = tracker.create_edge(b, Some(a), Some(2.0)).unwrap();
        let vm = tracker.create_resource(b.resource_group_id, "vm1").unwrap();
        tracker.set_attribute(vm.id, "cpu", 10).unwrap();

        let err = tracker.set_factor(child.id, 1e-300).unwrap_err();
        assert!(matches!(err, FlowError::TotalOverflow { transformer } if transformer == root.id));
        assert_eq!(tracker.transformer(child.id).unwrap().factor, Some(2.0));
        assert_eq!(tracker.transformer(root.id).unwrap().total_consumed, 5);
    }

    /// Roots G/ram and H/cpu, with G/cpu consuming from H/cpu
    fn tracker_with_cross_link() -> (Tracker, NodeKey, NodeKey, NodeKey) {
        let (mut tracker, _) = tracker_with(&["G", "H"]);
        tracker.define_attribute("ram", None).unwrap();
        let g_ram = tracker.key_for("G", "ram").unwrap();
        let g_cpu = tracker.key_for("G", "cpu").unwrap();
        let h_cpu = tracker.key_for("H", "cpu").unwrap();
        tracker.create_edge(g_ram, None, None).unwrap();
        (tracker, g_ram, g_cpu, h_cpu)
    }

    #[test]
    fn relink_closing_loop_below_edited_node_is_rejected() {
        let (mut tracker, g_ram, g_cpu, h_cpu) = tracker_with_cross_link();
        let h = tracker.create_edge(h_cpu, None, None).unwrap();
        tracker.create_edge(g_cpu, Some(h_cpu), None).unwrap();

        // G/cpu -> H/cpu -> G/ram re-enters G
        let err = tracker.relink(h.id, Some(g_ram)).unwrap_err();
        assert!(matches!(err, FlowError::Cycle { ref resource_group } if resource_group == "G"));
        assert_eq!(tracker.transformer(h.id).unwrap().consume_from, None);
        assert!(tracker.graph().find_any_cycle().is_none());
    }

    #[test]
    fn create_closing_loop_through_waiting_child_is_rejected() {
        let (mut tracker, g_ram, g_cpu, h_cpu) = tracker_with_cross_link();
        // G/cpu waits on H/cpu, which does not exist yet
        tracker.create_edge(g_cpu, Some(h_cpu), None).unwrap();

        let err = tracker.create_edge(h_cpu, Some(g_ram), None).unwrap_err();
        assert!(matches!(err, FlowError::Cycle { ref resource_group } if resource_group == "G"));
        assert!(tracker.find(h_cpu).is_none());
        assert!(tracker.graph().find_any_cycle().is_none());
    }

    #[test]
    fn same_group_other_attribute_is_self_consumption() {
        let (mut tracker, _) = tracker_with(&["A"]);
        tracker.define_attribute("ram", None).unwrap();
        let cpu = tracker.key_for("A", "cpu").unwrap();
        let ram = tracker.key_for("A", "ram").unwrap();

        let err = tracker.create_edge(cpu, Some(ram), None).unwrap_err();
        assert!(matches!(err, FlowError::SelfConsumption(_)));
    }

    #[test]
    fn unknown_group_or_attribute_is_not_found() {
        let (mut tracker, cpu) = tracker_with(&["A"]);
        let err = tracker.create_edge(NodeKey::new(999, cpu), None, None).unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));
        assert!(matches!(tracker.key_for("A", "gpu"), Err(FlowError::NotFound(_))));
    }

    #[test]
    fn new_resource_gets_zero_for_group_attributes() {
        let (mut tracker, _) = tracker_with(&["A"]);
        let a = tracker.key_for("A", "cpu").unwrap();
        tracker.create_edge(a, None, None).unwrap();

        let host = tracker.create_resource(a.resource_group_id, "host1").unwrap();
        let values = tracker.resource_attributes(host.id).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!((values[0].attribute_name.as_str(), values[0].value), ("cpu", 0));
    }

    #[test]
    fn set_attribute_without_transformer_is_not_found() {
        let (mut tracker, _) = tracker_with(&["A"]);
        let group = tracker.group_by_name("A").unwrap();
        let host = tracker.create_resource(group.id, "host1").unwrap();
        assert!(matches!(
            tracker.set_attribute(host.id, "cpu", 4),
            Err(FlowError::NotFound(_))
        ));
    }

    #[test]
    fn protected_deletes() {
        let (mut tracker, cpu) = tracker_with(&["A"]);
        let a = tracker.key_for("A", "cpu").unwrap();
        let t = tracker.create_edge(a, None, None).unwrap();
        let host = tracker.create_resource(a.resource_group_id, "host1").unwrap();
        tracker.set_attribute(host.id, "cpu", 4).unwrap();

        assert!(matches!(
            tracker.delete_attribute(cpu),
            Err(FlowError::ReferentialIntegrity { .. })
        ));
        assert!(matches!(
            tracker.delete_group(a.resource_group_id),
            Err(FlowError::ReferentialIntegrity { .. })
        ));
        assert!(matches!(
            tracker.delete_resource(host.id),
            Err(FlowError::ReferentialIntegrity { .. })
        ));

        tracker.set_attribute(host.id, "cpu", 0).unwrap();
        tracker.delete_resource(host.id).unwrap();
        tracker.delete_transformer(t.id).unwrap();
        tracker.delete_attribute(cpu).unwrap();
        tracker.delete_group(a.resource_group_id).unwrap();
        assert!(tracker.groups().unwrap().is_empty());
    }

    #[test]
    fn graph_is_rebuilt_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");

        let (a, b) = {
            let mut tracker = Tracker::open(&path).unwrap();
            tracker.create_group("A").unwrap();
            tracker.create_group("B").unwrap();
            tracker.define_attribute("cpu", None).unwrap();
            let a = tracker.key_for("A", "cpu").unwrap();
            let b = tracker.key_for("B", "cpu").unwrap();
            tracker.create_edge(a, None, None).unwrap();
            tracker.create_edge(b, Some(a), Some(4.0)).unwrap();
            (a, b)
        };

        let tracker = Tracker::open(&path).unwrap();
        assert_eq!(tracker.graph().len(), 2);
        let child = tracker.find(b).unwrap();
        assert_eq!(child.factor, Some(4.0));
        assert_eq!(tracker.parent_of(child.id).unwrap().key, a);
    }
}
