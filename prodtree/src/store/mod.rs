//! SQLite persistence for node records and named configurations.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::Result;
use crate::ident::NodeId;
use crate::node::{NodeKind, NodeRecord, Stamp};

const NODE_COLUMNS: &str = "id, kind, name, label, active, depth, meaning, parent_id, top_id, \
     origin_id, db_config, storage_config, type_name, type_group, extra_json, path_json, \
     created_at, created_by, updated_at, updated_by";

/// Column bindings shared by INSERT and UPDATE, in `NODE_COLUMNS` order.
macro_rules! node_params {
    ($node:expr) => {
        params![
            $node.id.as_i64(),
            $node.kind.as_str(),
            $node.name,
            $node.label,
            $node.active,
            $node.depth,
            $node.meaning,
            $node.parent_id.map(NodeId::as_i64),
            $node.top_id.map(NodeId::as_i64),
            $node.origin_id.map(NodeId::as_i64),
            $node.db_config_name,
            $node.storage_config_name,
            $node.type_name,
            $node.type_group_name,
            $node.extra_data.to_string(),
            $node.path_data.to_string(),
            $node.stamp.created_at.to_rfc3339(),
            $node.stamp.created_by,
            $node.stamp.updated_at.map(|t| t.to_rfc3339()),
            $node.stamp.updated_by,
        ]
    };
}

pub struct NodeStore {
    conn: Connection,
}

impl NodeStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = NodeStore { conn };
        store.initialize_tables()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = NodeStore { conn };
        store.initialize_tables()?;
        Ok(store)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                label TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                depth INTEGER NOT NULL,
                meaning TEXT NOT NULL,
                parent_id INTEGER,
                top_id INTEGER,
                origin_id INTEGER,
                db_config TEXT,
                storage_config TEXT,
                type_name TEXT,
                type_group TEXT,
                extra_json TEXT NOT NULL DEFAULT '{}',
                path_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                created_by TEXT NOT NULL,
                updated_at TEXT,
                updated_by TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_depth ON nodes(depth);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_sibling_name
                ON nodes(parent_id, name) WHERE active = 1;

            CREATE TABLE IF NOT EXISTS configs (
                name TEXT NOT NULL,
                family TEXT NOT NULL,
                data_yaml TEXT NOT NULL,
                PRIMARY KEY (family, name)
            );
            ",
        )?;
        Ok(())
    }

    // ── Nodes ────────────────────────────────────────────────────────

    pub fn insert_node(&self, node: &NodeRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO nodes ({NODE_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
            ),
            node_params!(node),
        )?;
        Ok(())
    }

    pub fn update_node(&self, node: &NodeRecord) -> Result<()> {
        self.conn.execute(
            "UPDATE nodes SET kind = ?2, name = ?3, label = ?4, active = ?5, depth = ?6, \
             meaning = ?7, parent_id = ?8, top_id = ?9, origin_id = ?10, db_config = ?11, \
             storage_config = ?12, type_name = ?13, type_group = ?14, extra_json = ?15, \
             path_json = ?16, created_at = ?17, created_by = ?18, updated_at = ?19, \
             updated_by = ?20 WHERE id = ?1",
            node_params!(node),
        )?;
        Ok(())
    }

    pub fn get_node(&self, id: NodeId) -> Result<Option<NodeRecord>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                params![id.as_i64()],
                node_from_row,
            )
            .optional()?;
        Ok(result)
    }

    /// The depth-0 sentinel, if the store has been bootstrapped.
    pub fn root(&self) -> Result<Option<NodeRecord>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE depth = 0 LIMIT 1"),
                [],
                node_from_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Active child with the given name.
    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Result<Option<NodeRecord>> {
        let result = self
            .conn
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes \
                     WHERE parent_id = ?1 AND name = ?2 AND active = 1"
                ),
                params![parent.as_i64(), name],
                node_from_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Children ordered by name. `active_only` hides soft-deleted rows.
    pub fn children(&self, parent: NodeId, active_only: bool) -> Result<Vec<NodeRecord>> {
        let filter = if active_only { "AND active = 1" } else { "" };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id = ?1 {filter} ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![parent.as_i64()], node_from_row)?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    pub fn set_path_data(&self, id: NodeId, path_data: &serde_json::Value) -> Result<()> {
        self.conn.execute(
            "UPDATE nodes SET path_json = ?2 WHERE id = ?1",
            params![id.as_i64(), serde_json::to_string(path_data)?],
        )?;
        Ok(())
    }

    pub fn set_active(&self, id: NodeId, active: bool, stamp: &Stamp) -> Result<()> {
        self.conn.execute(
            "UPDATE nodes SET active = ?2, updated_at = ?3, updated_by = ?4 WHERE id = ?1",
            params![
                id.as_i64(),
                active,
                stamp.updated_at.map(|t| t.to_rfc3339()),
                stamp.updated_by,
            ],
        )?;
        Ok(())
    }

    // ── Configs ──────────────────────────────────────────────────────

    pub fn upsert_config(&self, family: &str, name: &str, data_yaml: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO configs (name, family, data_yaml) VALUES (?1, ?2, ?3)",
            params![name, family, data_yaml],
        )?;
        Ok(())
    }

    pub fn get_config(&self, family: &str, name: &str) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row(
                "SELECT data_yaml FROM configs WHERE family = ?1 AND name = ?2",
                params![family, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    pub fn list_configs(&self, family: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, data_yaml FROM configs WHERE family = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![family], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut configs = Vec::new();
        for row in rows {
            configs.push(row?);
        }
        Ok(configs)
    }

    // ── Transaction Support ──────────────────────────────────────────

    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION")?;
        Ok(())
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRecord> {
    let kind_raw: String = row.get(1)?;
    let kind = NodeKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("unknown node kind '{kind_raw}'").into(),
        )
    })?;
    let extra_raw: String = row.get(14)?;
    let path_raw: String = row.get(15)?;
    Ok(NodeRecord {
        id: NodeId(row.get(0)?),
        kind,
        name: row.get(2)?,
        label: row.get(3)?,
        active: row.get(4)?,
        depth: row.get(5)?,
        meaning: row.get(6)?,
        parent_id: row.get::<_, Option<i64>>(7)?.map(NodeId),
        top_id: row.get::<_, Option<i64>>(8)?.map(NodeId),
        origin_id: row.get::<_, Option<i64>>(9)?.map(NodeId),
        db_config_name: row.get(10)?,
        storage_config_name: row.get(11)?,
        type_name: row.get(12)?,
        type_group_name: row.get(13)?,
        extra_data: serde_json::from_str(&extra_raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e)))?,
        path_data: serde_json::from_str(&path_raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(15, Type::Text, Box::new(e)))?,
        stamp: Stamp {
            created_at: parse_timestamp(row, 16)?,
            created_by: row.get(17)?,
            updated_at: parse_optional_timestamp(row, 18)?,
            updated_by: row.get(19)?,
        },
    })
}

fn parse_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_timestamp(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident;
    use crate::node::ROOT_MEANING;
    use pretty_assertions::assert_eq;

    fn node(name: &str, depth: u32, parent: Option<NodeId>) -> NodeRecord {
        NodeRecord {
            id: ident::generate(),
            kind: if depth == 0 { NodeKind::Folder } else { NodeKind::File },
            name: name.to_string(),
            label: name.to_string(),
            active: true,
            depth,
            meaning: if depth == 0 { ROOT_MEANING.into() } else { "SHOT".into() },
            parent_id: parent,
            top_id: None,
            origin_id: None,
            db_config_name: Some("movie".into()),
            storage_config_name: Some("movie".into()),
            type_name: None,
            type_group_name: None,
            extra_data: serde_json::json!({"note": "x"}),
            path_data: serde_json::json!({}),
            stamp: Stamp::now("alice"),
        }
    }

    #[test]
    fn nodes_round_trip() {
        let store = NodeStore::open_in_memory().unwrap();
        let record = node("sh0010", 3, None);
        store.insert_node(&record).unwrap();

        let loaded = store.get_node(record.id).unwrap().unwrap();
        assert_eq!(loaded.name, "sh0010");
        assert_eq!(loaded.kind, NodeKind::File);
        assert_eq!(loaded.meaning, "SHOT");
        assert_eq!(loaded.extra_data["note"], "x");
        assert_eq!(loaded.stamp.created_by, "alice");
        assert!(loaded.stamp.updated_at.is_none());
    }

    #[test]
    fn children_are_ordered_and_filtered() {
        let store = NodeStore::open_in_memory().unwrap();
        let parent = node("prj", 1, None);
        store.insert_node(&parent).unwrap();

        for name in ["b", "a", "c"] {
            store.insert_node(&node(name, 2, Some(parent.id))).unwrap();
        }
        let mut gone = node("d", 2, Some(parent.id));
        gone.active = false;
        store.insert_node(&gone).unwrap();

        let names: Vec<_> = store
            .children(parent.id, true)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(store.children(parent.id, false).unwrap().len(), 4);
    }

    #[test]
    fn active_sibling_names_are_unique() {
        let store = NodeStore::open_in_memory().unwrap();
        let parent = node("prj", 1, None);
        store.insert_node(&parent).unwrap();
        store.insert_node(&node("sh0010", 2, Some(parent.id))).unwrap();

        let dup = node("sh0010", 2, Some(parent.id));
        assert!(store.insert_node(&dup).is_err());
    }

    #[test]
    fn deactivated_names_can_be_reused() {
        let store = NodeStore::open_in_memory().unwrap();
        let parent = node("prj", 1, None);
        store.insert_node(&parent).unwrap();

        let mut first = node("sh0010", 2, Some(parent.id));
        store.insert_node(&first).unwrap();
        first.stamp.touch("bob");
        store.set_active(first.id, false, &first.stamp).unwrap();

        store.insert_node(&node("sh0010", 2, Some(parent.id))).unwrap();
        let loaded = store.get_node(first.id).unwrap().unwrap();
        assert!(!loaded.active);
        assert_eq!(loaded.stamp.updated_by.as_deref(), Some("bob"));
    }

    #[test]
    fn child_lookup_sees_only_active_rows() {
        let store = NodeStore::open_in_memory().unwrap();
        let parent = node("prj", 1, None);
        store.insert_node(&parent).unwrap();
        let mut child = node("sq01", 2, Some(parent.id));
        child.active = false;
        store.insert_node(&child).unwrap();

        assert!(store.child_by_name(parent.id, "sq01").unwrap().is_none());
    }

    #[test]
    fn configs_round_trip() {
        let store = NodeStore::open_in_memory().unwrap();
        store.upsert_config("hierarchy", "movie", "a: 1\n").unwrap();
        store.upsert_config("hierarchy", "movie", "a: 2\n").unwrap();
        store.upsert_config("storage", "movie", "b: 1\n").unwrap();

        assert_eq!(
            store.get_config("hierarchy", "movie").unwrap().unwrap(),
            "a: 2\n"
        );
        assert_eq!(store.list_configs("hierarchy").unwrap().len(), 1);
        assert!(store.get_config("decision", "movie").unwrap().is_none());
    }

    #[test]
    fn rollback_discards_writes() {
        let store = NodeStore::open_in_memory().unwrap();
        store.begin_transaction().unwrap();
        store.insert_node(&node("prj", 0, None)).unwrap();
        store.rollback_transaction().unwrap();
        assert!(store.root().unwrap().is_none());
    }
}
