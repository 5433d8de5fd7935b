//! Node records: the rows of the asset tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::NodeId;
use crate::naming;

/// Name of the singleton root node. Depth 0, invisible in logical paths.
pub const ROOT_NODE_NAME: &str = ".prodtree_root";

/// Meaning assigned to the root sentinel.
pub const ROOT_MEANING: &str = "ROOT";

/// Meaning assigned to symbolic link nodes, which sit outside the
/// depth-to-meaning machinery.
pub const SYMBOL_MEANING: &str = "SYMBOL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    File,
    Symbol,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Folder => "folder",
            NodeKind::File => "file",
            NodeKind::Symbol => "symbol",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "folder" => Some(NodeKind::Folder),
            "file" => Some(NodeKind::File),
            "symbol" => Some(NodeKind::Symbol),
            _ => None,
        }
    }
}

/// Creation and modification stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stamp {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

impl Stamp {
    pub fn now(user: impl Into<String>) -> Self {
        Stamp {
            created_at: Utc::now(),
            created_by: user.into(),
            updated_at: None,
            updated_by: None,
        }
    }

    pub fn touch(&mut self, user: impl Into<String>) {
        self.updated_at = Some(Utc::now());
        self.updated_by = Some(user.into());
    }
}

/// A single node of the asset tree as persisted in the store.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub label: String,
    pub active: bool,
    pub depth: u32,
    pub meaning: String,
    pub parent_id: Option<NodeId>,
    /// Depth-2 ancestor; self for depth-2 nodes, unset above depth 2.
    pub top_id: Option<NodeId>,
    /// Target node for symbols.
    pub origin_id: Option<NodeId>,
    pub db_config_name: Option<String>,
    pub storage_config_name: Option<String>,
    pub type_name: Option<String>,
    pub type_group_name: Option<String>,
    /// Free-form attachment data, including cascading info.
    pub extra_data: serde_json::Value,
    /// Persisted virtual sub-filesystem snapshot.
    pub path_data: serde_json::Value,
    pub stamp: Stamp,
}

impl NodeRecord {
    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_symbol(&self) -> bool {
        self.kind == NodeKind::Symbol
    }

    /// Version token embedded in the node name, e.g. "v0012".
    pub fn version_part(&self) -> Option<String> {
        naming::version_part(&self.name)
    }

    /// Attribute lookup by field name, used by disk template parameters.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "name" => Some(self.name.clone()),
            "label" => Some(self.label.clone()),
            "meaning" => Some(self.meaning.clone()),
            "id" => Some(self.id.to_string()),
            "type_name" => self.type_name.clone(),
            "type_group_name" => self.type_group_name.clone(),
            "version" => self.version_part(),
            _ => None,
        }
    }
}
