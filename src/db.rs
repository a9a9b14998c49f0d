//! Database schema and operations
//!
//! Plain CRUD accessors over the SQLite store. Nothing here knows about the
//! transformer graph; callers own transaction boundaries and pass a
//! `Transaction` wherever a `&Connection` is expected.

use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{
    AttributeDefinition, NodeKey, Resource, ResourceAttribute, ResourceGroup, Transformer,
};

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS resource_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        -- Vocabulary of attribute names usable by transformers
        CREATE TABLE IF NOT EXISTS attribute_definitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS resources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            resource_group_id INTEGER NOT NULL REFERENCES resource_groups(id),
            UNIQUE (resource_group_id, name)
        );

        CREATE TABLE IF NOT EXISTS resource_attributes (
            resource_id INTEGER NOT NULL REFERENCES resources(id),
            attribute_definition_id INTEGER NOT NULL REFERENCES attribute_definitions(id),
            value INTEGER NOT NULL DEFAULT 0 CHECK (value >= 0),
            PRIMARY KEY (resource_id, attribute_definition_id)
        );

        -- A transformer couples a group with the attribute it produces, and
        -- optionally the (group, attribute) pair it consumes from
        CREATE TABLE IF NOT EXISTS transformers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_group_id INTEGER NOT NULL REFERENCES resource_groups(id),
            attribute_definition_id INTEGER NOT NULL REFERENCES attribute_definitions(id),
            consume_from_resource_group_id INTEGER REFERENCES resource_groups(id),
            consume_from_attribute_definition_id INTEGER REFERENCES attribute_definitions(id),
            factor REAL,
            total_produced INTEGER NOT NULL DEFAULT 0,
            total_consumed INTEGER NOT NULL DEFAULT 0,
            yellow_threshold_percent_consumed INTEGER NOT NULL DEFAULT 80,
            red_threshold_percent_consumed INTEGER NOT NULL DEFAULT 90,
            UNIQUE (resource_group_id, attribute_definition_id),
            CONSTRAINT cannot_consume_from_itself
                CHECK (consume_from_resource_group_id IS NULL
                       OR consume_from_resource_group_id <> resource_group_id)
        );

        CREATE INDEX IF NOT EXISTS idx_resources_group ON resources(resource_group_id);
        CREATE INDEX IF NOT EXISTS idx_resource_attributes_attribute
            ON resource_attributes(attribute_definition_id);
        CREATE INDEX IF NOT EXISTS idx_transformers_consume_from
            ON transformers(consume_from_resource_group_id, consume_from_attribute_definition_id);
        "#,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Resource groups
// ---------------------------------------------------------------------------

pub fn insert_group(conn: &Connection, name: &str) -> Result<ResourceGroup> {
    conn.execute("INSERT INTO resource_groups (name) VALUES (?1)", [name])?;
    Ok(ResourceGroup {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
    })
}

pub fn get_group(conn: &Connection, id: i64) -> Result<Option<ResourceGroup>> {
    let group = conn
        .query_row(
            "SELECT id, name FROM resource_groups WHERE id = ?1",
            [id],
            |row| {
                Ok(ResourceGroup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(group)
}

pub fn find_group_by_name(conn: &Connection, name: &str) -> Result<Option<ResourceGroup>> {
    let group = conn
        .query_row(
            "SELECT id, name FROM resource_groups WHERE name = ?1",
            [name],
            |row| {
                Ok(ResourceGroup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(group)
}

/// List all resource groups ordered by name
pub fn list_groups(conn: &Connection) -> Result<Vec<ResourceGroup>> {
    let mut stmt = conn.prepare("SELECT id, name FROM resource_groups ORDER BY name")?;

    let rows = stmt.query_map([], |row| {
        Ok(ResourceGroup {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

pub fn delete_group(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM resource_groups WHERE id = ?1", [id])?;
    Ok(())
}

pub fn count_resources_in_group(conn: &Connection, group_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM resources WHERE resource_group_id = ?1",
        [group_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Attribute definitions
// ---------------------------------------------------------------------------

fn attribute_from_row(row: &Row<'_>) -> rusqlite::Result<AttributeDefinition> {
    Ok(AttributeDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

/// Insert an attribute definition, or return the existing one with that name
pub fn upsert_attribute(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
) -> Result<AttributeDefinition> {
    conn.execute(
        "INSERT OR IGNORE INTO attribute_definitions (name, description) VALUES (?1, ?2)",
        (name, description),
    )?;
    let attribute = conn.query_row(
        "SELECT id, name, description FROM attribute_definitions WHERE name = ?1",
        [name],
        attribute_from_row,
    )?;
    Ok(attribute)
}

pub fn get_attribute(conn: &Connection, id: i64) -> Result<Option<AttributeDefinition>> {
    let attribute = conn
        .query_row(
            "SELECT id, name, description FROM attribute_definitions WHERE id = ?1",
            [id],
            attribute_from_row,
        )
        .optional()?;
    Ok(attribute)
}

pub fn find_attribute_by_name(conn: &Connection, name: &str) -> Result<Option<AttributeDefinition>> {
    let attribute = conn
        .query_row(
            "SELECT id, name, description FROM attribute_definitions WHERE name = ?1",
            [name],
            attribute_from_row,
        )
        .optional()?;
    Ok(attribute)
}

pub fn list_attributes(conn: &Connection) -> Result<Vec<AttributeDefinition>> {
    let mut stmt =
        conn.prepare("SELECT id, name, description FROM attribute_definitions ORDER BY name")?;

    let rows = stmt.query_map([], attribute_from_row)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

pub fn delete_attribute(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM attribute_definitions WHERE id = ?1", [id])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Resources and their attribute values
// ---------------------------------------------------------------------------

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    Ok(Resource {
        id: row.get(0)?,
        name: row.get(1)?,
        resource_group_id: row.get(2)?,
    })
}

pub fn insert_resource(conn: &Connection, group_id: i64, name: &str) -> Result<Resource> {
    conn.execute(
        "INSERT INTO resources (name, resource_group_id) VALUES (?1, ?2)",
        (name, group_id),
    )?;
    Ok(Resource {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        resource_group_id: group_id,
    })
}

pub fn get_resource(conn: &Connection, id: i64) -> Result<Option<Resource>> {
    let resource = conn
        .query_row(
            "SELECT id, name, resource_group_id FROM resources WHERE id = ?1",
            [id],
            resource_from_row,
        )
        .optional()?;
    Ok(resource)
}

pub fn find_resource_by_name(
    conn: &Connection,
    group_id: i64,
    name: &str,
) -> Result<Option<Resource>> {
    let resource = conn
        .query_row(
            "SELECT id, name, resource_group_id FROM resources
             WHERE resource_group_id = ?1 AND name = ?2",
            (group_id, name),
            resource_from_row,
        )
        .optional()?;
    Ok(resource)
}

/// List the resources of one group ordered by name
pub fn list_resources(conn: &Connection, group_id: i64) -> Result<Vec<Resource>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, resource_group_id FROM resources
         WHERE resource_group_id = ?1 ORDER BY name",
    )?;

    let rows = stmt.query_map([group_id], resource_from_row)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Delete a resource along with its attribute rows
pub fn delete_resource(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM resource_attributes WHERE resource_id = ?1", [id])?;
    conn.execute("DELETE FROM resources WHERE id = ?1", [id])?;
    Ok(())
}

/// Give every resource of a group a zero value for the attribute, keeping
/// values that already exist
pub fn init_group_attribute(conn: &Connection, group_id: i64, attribute_id: i64) -> Result<usize> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO resource_attributes (resource_id, attribute_definition_id, value)
         SELECT id, ?2, 0 FROM resources WHERE resource_group_id = ?1",
        (group_id, attribute_id),
    )?;
    Ok(inserted)
}

pub fn init_resource_attribute(conn: &Connection, resource_id: i64, attribute_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO resource_attributes (resource_id, attribute_definition_id, value)
         VALUES (?1, ?2, 0)",
        (resource_id, attribute_id),
    )?;
    Ok(())
}

/// Update one attribute value, returning the number of rows touched
pub fn set_attribute_value(
    conn: &Connection,
    resource_id: i64,
    attribute_id: i64,
    value: u64,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE resource_attributes SET value = ?3
         WHERE resource_id = ?1 AND attribute_definition_id = ?2",
        (resource_id, attribute_id, value),
    )?;
    Ok(updated)
}

/// Get all attribute values carried by a resource
pub fn get_resource_attributes(conn: &Connection, resource_id: i64) -> Result<Vec<ResourceAttribute>> {
    let mut stmt = conn.prepare(
        "SELECT ra.resource_id, ra.attribute_definition_id, ad.name, ra.value
         FROM resource_attributes ra
         JOIN attribute_definitions ad ON ad.id = ra.attribute_definition_id
         WHERE ra.resource_id = ?1
         ORDER BY ad.name",
    )?;

    let rows = stmt.query_map([resource_id], |row| {
        Ok(ResourceAttribute {
            resource_id: row.get(0)?,
            attribute_definition_id: row.get(1)?,
            attribute_name: row.get(2)?,
            value: row.get(3)?,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

pub fn count_nonzero_values(conn: &Connection, resource_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM resource_attributes WHERE resource_id = ?1 AND value > 0",
        [resource_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Remove the attribute from every resource in the group
pub fn delete_group_attribute_values(
    conn: &Connection,
    group_id: i64,
    attribute_id: i64,
) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM resource_attributes
         WHERE attribute_definition_id = ?2
           AND resource_id IN (SELECT id FROM resources WHERE resource_group_id = ?1)",
        (group_id, attribute_id),
    )?;
    Ok(deleted)
}

/// Sum of one attribute across every resource of a group
pub fn sum_group_attribute(conn: &Connection, group_id: i64, attribute_id: i64) -> Result<u64> {
    let total = conn.query_row(
        "SELECT COALESCE(SUM(ra.value), 0)
         FROM resource_attributes ra
         JOIN resources r ON r.id = ra.resource_id
         WHERE r.resource_group_id = ?1 AND ra.attribute_definition_id = ?2",
        (group_id, attribute_id),
        |row| row.get(0),
    )?;
    Ok(total)
}

// ---------------------------------------------------------------------------
// Transformers
// ---------------------------------------------------------------------------

fn transformer_from_row(row: &Row<'_>) -> rusqlite::Result<Transformer> {
    let consume_group: Option<i64> = row.get(3)?;
    let consume_attribute: Option<i64> = row.get(4)?;
    let consume_from = match (consume_group, consume_attribute) {
        (Some(group), Some(attribute)) => Some(NodeKey::new(group, attribute)),
        _ => None,
    };

    Ok(Transformer {
        id: row.get(0)?,
        key: NodeKey::new(row.get(1)?, row.get(2)?),
        consume_from,
        factor: row.get(5)?,
        total_produced: row.get(6)?,
        total_consumed: row.get(7)?,
        yellow_threshold_percent_consumed: row.get(8)?,
        red_threshold_percent_consumed: row.get(9)?,
    })
}

/// Insert a transformer, returning its new id
pub fn insert_transformer(conn: &Connection, t: &Transformer) -> Result<i64> {
    conn.execute(
        "INSERT INTO transformers (
            resource_group_id, attribute_definition_id,
            consume_from_resource_group_id, consume_from_attribute_definition_id,
            factor, total_produced, total_consumed,
            yellow_threshold_percent_consumed, red_threshold_percent_consumed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        (
            t.key.resource_group_id,
            t.key.attribute_definition_id,
            t.consume_from.map(|k| k.resource_group_id),
            t.consume_from.map(|k| k.attribute_definition_id),
            t.factor,
            t.total_produced,
            t.total_consumed,
            t.yellow_threshold_percent_consumed,
            t.red_threshold_percent_consumed,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Write back every mutable column of a transformer
pub fn update_transformer(conn: &Connection, t: &Transformer) -> Result<()> {
    conn.execute(
        "UPDATE transformers SET
            consume_from_resource_group_id = ?2,
            consume_from_attribute_definition_id = ?3,
            factor = ?4,
            total_produced = ?5,
            total_consumed = ?6,
            yellow_threshold_percent_consumed = ?7,
            red_threshold_percent_consumed = ?8
         WHERE id = ?1",
        (
            t.id,
            t.consume_from.map(|k| k.resource_group_id),
            t.consume_from.map(|k| k.attribute_definition_id),
            t.factor,
            t.total_produced,
            t.total_consumed,
            t.yellow_threshold_percent_consumed,
            t.red_threshold_percent_consumed,
        ),
    )?;
    Ok(())
}

pub fn delete_transformer(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM transformers WHERE id = ?1", [id])?;
    Ok(())
}

pub fn list_transformers(conn: &Connection) -> Result<Vec<Transformer>> {
    let mut stmt = conn.prepare(
        "SELECT id, resource_group_id, attribute_definition_id,
                consume_from_resource_group_id, consume_from_attribute_definition_id,
                factor, total_produced, total_consumed,
                yellow_threshold_percent_consumed, red_threshold_percent_consumed
         FROM transformers ORDER BY id",
    )?;

    let rows = stmt.query_map([], transformer_from_row)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = setup();
        init_schema(&conn).unwrap();
        assert!(list_groups(&conn).unwrap().is_empty());
    }

    #[test]
    fn group_names_are_unique() {
        let conn = setup();
        insert_group(&conn, "DC1").unwrap();
        assert!(insert_group(&conn, "DC1").is_err());
        assert_eq!(find_group_by_name(&conn, "DC1").unwrap().unwrap().name, "DC1");
    }

    #[test]
    fn upsert_attribute_keeps_first_definition() {
        let conn = setup();
        let first = upsert_attribute(&conn, "cpu", Some("vCPU count")).unwrap();
        let second = upsert_attribute(&conn, "cpu", None).unwrap();
        assert_eq!(first, second);
        assert_eq!(list_attributes(&conn).unwrap().len(), 1);
    }

    #[test]
    fn sum_covers_only_the_group() {
        let conn = setup();
        let dc1 = insert_group(&conn, "DC1").unwrap();
        let dc2 = insert_group(&conn, "DC2").unwrap();
        let cpu = upsert_attribute(&conn, "cpu", None).unwrap();

        let host1 = insert_resource(&conn, dc1.id, "host1").unwrap();
        let host2 = insert_resource(&conn, dc1.id, "host2").unwrap();
        let other = insert_resource(&conn, dc2.id, "host1").unwrap();
        init_group_attribute(&conn, dc1.id, cpu.id).unwrap();
        init_group_attribute(&conn, dc2.id, cpu.id).unwrap();

        set_attribute_value(&conn, host1.id, cpu.id, 10).unwrap();
        set_attribute_value(&conn, host2.id, cpu.id, 6).unwrap();
        set_attribute_value(&conn, other.id, cpu.id, 100).unwrap();

        assert_eq!(sum_group_attribute(&conn, dc1.id, cpu.id).unwrap(), 16);
        assert_eq!(sum_group_attribute(&conn, dc2.id, cpu.id).unwrap(), 100);
    }

    #[test]
    fn sum_of_empty_group_is_zero() {
        let conn = setup();
        let group = insert_group(&conn, "empty").unwrap();
        let cpu = upsert_attribute(&conn, "cpu", None).unwrap();
        assert_eq!(sum_group_attribute(&conn, group.id, cpu.id).unwrap(), 0);
    }

    #[test]
    fn store_rejects_self_consumption() {
        let conn = setup();
        let group = insert_group(&conn, "DC1").unwrap();
        let cpu = upsert_attribute(&conn, "cpu", None).unwrap();
        let ram = upsert_attribute(&conn, "ram", None).unwrap();

        let t = Transformer::new(
            NodeKey::new(group.id, cpu.id),
            Some(NodeKey::new(group.id, ram.id)),
            Some(1.0),
        );
        assert!(insert_transformer(&conn, &t).is_err());
    }

    #[test]
    fn transformer_row_round_trips_consume_from() {
        let conn = setup();
        let dc1 = insert_group(&conn, "DC1").unwrap();
        let vms = insert_group(&conn, "VMs").unwrap();
        let cpu = upsert_attribute(&conn, "cpu", None).unwrap();

        let mut t = Transformer::new(
            NodeKey::new(vms.id, cpu.id),
            Some(NodeKey::new(dc1.id, cpu.id)),
            Some(2.0),
        );
        t.id = insert_transformer(&conn, &t).unwrap();

        let loaded = list_transformers(&conn).unwrap();
        assert_eq!(loaded, vec![t.clone()]);

        t.consume_from = None;
        update_transformer(&conn, &t).unwrap();
        assert_eq!(list_transformers(&conn).unwrap()[0].consume_from, None);
    }

    #[test]
    fn deleting_group_attribute_values_spares_other_attributes() {
        let conn = setup();
        let group = insert_group(&conn, "DC1").unwrap();
        let cpu = upsert_attribute(&conn, "cpu", None).unwrap();
        let ram = upsert_attribute(&conn, "ram", None).unwrap();
        let host = insert_resource(&conn, group.id, "host1").unwrap();
        init_group_attribute(&conn, group.id, cpu.id).unwrap();
        init_group_attribute(&conn, group.id, ram.id).unwrap();

        assert_eq!(delete_group_attribute_values(&conn, group.id, cpu.id).unwrap(), 1);
        let remaining = get_resource_attributes(&conn, host.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].attribute_name, "ram");
    }
}
