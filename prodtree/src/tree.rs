//! The `Tree` facade: boot lifecycle, node creation and structural ops.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::Path;

use serde_json::{Map, Value};

use crate::config::{self, ConfigRegistry, DecisionConfig, HierarchyConfig, StorageConfig};
use crate::error::{Result, TreeError};
use crate::ident::{self, NodeId};
use crate::naming;
use crate::node::{NodeKind, NodeRecord, Stamp, ROOT_MEANING, ROOT_NODE_NAME, SYMBOL_MEANING};
use crate::store::NodeStore;

const HIERARCHY_FAMILY: &str = "hierarchy";
const STORAGE_FAMILY: &str = "storage";
const DECISION_FAMILY: &str = "decision";

/// Extra-data key holding a node's cascading metadata map.
pub const CASCADING_KEY: &str = "cascading_info";

/// A dynamic disk-template parameter, referenced as `<name>` in
/// `to_disk_param` entries.
pub type PathFn = fn() -> String;

/// Login of the user driving this process.
pub fn current_user() -> String {
    std::env::var("PRODTREE_USER")
        .or_else(|_| std::env::var("USER"))
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Platform key used by storage configs for the running host.
pub fn current_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        _ => "linux",
    }
}

/// Specification for a node about to be created.
#[derive(Debug, Clone)]
pub struct NewNode<'a> {
    pub parent: &'a NodeRecord,
    pub kind: NodeKind,
    /// Short name fed into the naming template. `None` asks the version
    /// sequencer to propose one (files only).
    pub name: Option<String>,
    pub label: Option<String>,
    pub db_config_name: Option<String>,
    pub storage_config_name: Option<String>,
    pub type_name: Option<String>,
    pub type_group_name: Option<String>,
    pub origin: Option<NodeId>,
    pub extra_data: Option<Value>,
}

impl<'a> NewNode<'a> {
    pub fn folder(parent: &'a NodeRecord, name: &str) -> Self {
        Self::bare(parent, NodeKind::Folder, Some(name.to_string()))
    }

    pub fn file(parent: &'a NodeRecord, name: Option<&str>) -> Self {
        Self::bare(parent, NodeKind::File, name.map(str::to_string))
    }

    pub fn symbol(parent: &'a NodeRecord, name: &str, origin: NodeId) -> Self {
        let mut spec = Self::bare(parent, NodeKind::Symbol, Some(name.to_string()));
        spec.origin = Some(origin);
        spec
    }

    fn bare(parent: &'a NodeRecord, kind: NodeKind, name: Option<String>) -> Self {
        NewNode {
            parent,
            kind,
            name,
            label: None,
            db_config_name: None,
            storage_config_name: None,
            type_name: None,
            type_group_name: None,
            origin: None,
            extra_data: None,
        }
    }
}

/// Merged ancestor metadata for a node.
#[derive(Debug, Clone, Default)]
pub struct CascadingInfo {
    /// Ancestor and own keys, deeper nodes overriding shallower ones.
    pub all: Map<String, Value>,
    /// Keys contributed by ancestors only.
    pub inherited: Map<String, Value>,
    /// Keys set on the node itself.
    pub private: Map<String, Value>,
}

impl CascadingInfo {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.all.get(key)
    }
}

/// A production asset tree backed by a `NodeStore`.
pub struct Tree {
    store: NodeStore,
    configs: ConfigRegistry,
    root_id: NodeId,
    path_fns: HashMap<String, PathFn>,
    disk_cache: RefCell<HashMap<(i64, String, String), String>>,
}

impl Tree {
    /// Open or create a tree database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Self::boot(NodeStore::open(path)?)
    }

    /// Open an in-memory tree (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::boot(NodeStore::open_in_memory()?)
    }

    fn boot(store: NodeStore) -> Result<Self> {
        let mut configs = ConfigRegistry::new();
        for (name, yaml) in store.list_configs(HIERARCHY_FAMILY)? {
            configs.insert_hierarchy(name, config::parse_hierarchy_str(&yaml)?);
        }
        for (name, yaml) in store.list_configs(STORAGE_FAMILY)? {
            configs.insert_storage(name, config::parse_storage_str(&yaml)?);
        }
        for (name, yaml) in store.list_configs(DECISION_FAMILY)? {
            configs.insert_decision(name, config::parse_decision_str(&yaml)?);
        }

        let root_id = match store.root()? {
            Some(root) => root.id,
            None => {
                let root = NodeRecord {
                    id: ident::generate(),
                    kind: NodeKind::Folder,
                    name: ROOT_NODE_NAME.to_string(),
                    label: ROOT_NODE_NAME.to_string(),
                    active: true,
                    depth: 0,
                    meaning: ROOT_MEANING.to_string(),
                    parent_id: None,
                    top_id: None,
                    origin_id: None,
                    db_config_name: None,
                    storage_config_name: None,
                    type_name: None,
                    type_group_name: None,
                    extra_data: Value::Object(Map::new()),
                    path_data: Value::Object(Map::new()),
                    stamp: Stamp::now(current_user()),
                };
                store.insert_node(&root)?;
                root.id
            }
        };

        let mut path_fns: HashMap<String, PathFn> = HashMap::new();
        path_fns.insert("current_user".to_string(), current_user);

        Ok(Tree {
            store,
            configs,
            root_id,
            path_fns,
            disk_cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn configs(&self) -> &ConfigRegistry {
        &self.configs
    }

    /// Registers a dynamic `<name>` disk-template parameter.
    pub fn register_path_fn(&mut self, name: impl Into<String>, func: PathFn) {
        self.path_fns.insert(name.into(), func);
    }

    pub(crate) fn path_fn(&self, name: &str) -> Option<PathFn> {
        self.path_fns.get(name).copied()
    }

    pub(crate) fn disk_cache(&self) -> &RefCell<HashMap<(i64, String, String), String>> {
        &self.disk_cache
    }

    // ── Configs ──────────────────────────────────────────────────────

    /// Registers a hierarchy config and persists it in the store.
    pub fn add_hierarchy_config(&mut self, name: &str, config: HierarchyConfig) -> Result<()> {
        self.store
            .upsert_config(HIERARCHY_FAMILY, name, &serde_yaml::to_string(&config)?)?;
        self.configs.insert_hierarchy(name, config);
        Ok(())
    }

    /// Registers a storage config and persists it in the store.
    pub fn add_storage_config(&mut self, name: &str, config: StorageConfig) -> Result<()> {
        self.store
            .upsert_config(STORAGE_FAMILY, name, &serde_yaml::to_string(&config)?)?;
        self.configs.insert_storage(name, config);
        Ok(())
    }

    /// Registers a decision config and persists it in the store.
    pub fn add_decision_config(&mut self, name: &str, config: DecisionConfig) -> Result<()> {
        self.store
            .upsert_config(DECISION_FAMILY, name, &serde_yaml::to_string(&config)?)?;
        self.configs.insert_decision(name, config);
        Ok(())
    }

    /// Loads preset files from disk and persists them in the store.
    pub fn import_presets(&mut self, dir: &Path) -> Result<usize> {
        let loaded = self.configs.load_presets(dir)?;
        for (family, name) in &loaded {
            let yaml = match family.as_str() {
                HIERARCHY_FAMILY => serde_yaml::to_string(self.configs.hierarchy(name)?)?,
                STORAGE_FAMILY => serde_yaml::to_string(self.configs.storage(name)?)?,
                _ => serde_yaml::to_string(self.configs.decision(name)?)?,
            };
            self.store.upsert_config(family, name, &yaml)?;
        }
        Ok(loaded.len())
    }

    /// Hierarchy config governing `node`.
    pub fn hierarchy_config_for(&self, node: &NodeRecord) -> Result<&HierarchyConfig> {
        let name = node.db_config_name.as_deref().ok_or_else(|| {
            TreeError::Structure(format!("node '{}' has no hierarchy config", node.name))
        })?;
        self.configs.hierarchy(name)
    }

    /// Storage config governing `node`.
    pub fn storage_config_for(&self, node: &NodeRecord) -> Result<&StorageConfig> {
        let name = node.storage_config_name.as_deref().ok_or_else(|| {
            TreeError::Structure(format!("node '{}' has no storage config", node.name))
        })?;
        self.configs.storage(name)
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn root(&self) -> Result<NodeRecord> {
        self.node(self.root_id)
    }

    pub fn node(&self, id: NodeId) -> Result<NodeRecord> {
        self.store
            .get_node(id)?
            .ok_or_else(|| TreeError::NodeMissing(id.to_string()))
    }

    /// Active child by name. Symbols proxy to their origin node.
    pub fn child(&self, parent: &NodeRecord, name: &str) -> Result<Option<NodeRecord>> {
        let base = self.resolve_symbol(parent)?;
        self.store.child_by_name(base.id, name)
    }

    /// Active children ordered by name. Symbols proxy to their origin.
    pub fn children(&self, parent: &NodeRecord) -> Result<Vec<NodeRecord>> {
        let base = self.resolve_symbol(parent)?;
        self.store.children(base.id, true)
    }

    fn resolve_symbol(&self, node: &NodeRecord) -> Result<NodeRecord> {
        if let (NodeKind::Symbol, Some(origin)) = (node.kind, node.origin_id) {
            self.node(origin)
        } else {
            Ok(node.clone())
        }
    }

    /// Project (depth 1) node by name.
    pub fn project(&self, name: &str) -> Result<NodeRecord> {
        self.store
            .child_by_name(self.root_id, name)?
            .ok_or_else(|| TreeError::NodeMissing(format!("project '{name}'")))
    }

    pub fn projects(&self) -> Result<Vec<NodeRecord>> {
        self.store.children(self.root_id, true)
    }

    /// Ancestor chain from the root sentinel down to `node` inclusive.
    pub fn hierarchy(&self, node: &NodeRecord) -> Result<Vec<NodeRecord>> {
        let mut chain = vec![node.clone()];
        let mut cursor = node.parent_id;
        while let Some(id) = cursor {
            let parent = self.node(id)?;
            cursor = parent.parent_id;
            chain.push(parent);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Logical path of a node: `/`-joined names below the root sentinel.
    pub fn logical_path(&self, node: &NodeRecord) -> Result<String> {
        if node.is_root() {
            return Ok("/".to_string());
        }
        let chain = self.hierarchy(node)?;
        let mut path = String::new();
        for entry in &chain[1..] {
            path.push('/');
            path.push_str(&entry.name);
        }
        Ok(path)
    }

    /// Depth-2 ancestor; a depth-2 node references itself. Nodes above
    /// depth 2 have none.
    pub fn top(&self, node: &NodeRecord) -> Result<Option<NodeRecord>> {
        match node.top_id {
            Some(id) => Ok(Some(self.node(id)?)),
            None => Ok(None),
        }
    }

    /// Breadth-first traversal of the active subtree rooted at `node`,
    /// excluding `node` itself.
    pub fn walk(&self, node: &NodeRecord) -> Result<Vec<NodeRecord>> {
        let mut result = Vec::new();
        let mut queue = VecDeque::from([node.clone()]);
        while let Some(cursor) = queue.pop_front() {
            for child in self.children(&cursor)? {
                queue.push_back(child.clone());
                result.push(child);
            }
        }
        Ok(result)
    }

    /// First node whose meaning is in `meanings`, walking from `node`
    /// up towards the root.
    pub fn find_meaning(&self, node: &NodeRecord, meanings: &[&str]) -> Result<Option<NodeRecord>> {
        let mut cursor = Some(node.clone());
        while let Some(current) = cursor {
            if meanings.contains(&current.meaning.as_str()) {
                return Ok(Some(current));
            }
            cursor = match current.parent_id {
                Some(id) => Some(self.node(id)?),
                None => None,
            };
        }
        Ok(None)
    }

    // ── Cascading info ───────────────────────────────────────────────

    /// Merge `cascading_info` maps along the ancestor chain. Deeper nodes
    /// override shallower ones.
    pub fn cascading_info(&self, node: &NodeRecord) -> Result<CascadingInfo> {
        let chain = self.hierarchy(node)?;
        let mut info = CascadingInfo::default();
        for entry in &chain {
            let Some(map) = entry.extra_data.get(CASCADING_KEY).and_then(Value::as_object)
            else {
                continue;
            };
            for (key, value) in map {
                info.all.insert(key.clone(), value.clone());
                if entry.id == node.id {
                    info.private.insert(key.clone(), value.clone());
                } else {
                    info.inherited.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(info)
    }

    /// Sets one cascading-info key on `node` and persists it.
    pub fn set_cascading_info(&self, node: &mut NodeRecord, key: &str, value: Value) -> Result<()> {
        if !node.extra_data.is_object() {
            node.extra_data = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut node.extra_data {
            let slot = map
                .entry(CASCADING_KEY.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(slot) = slot {
                slot.insert(key.to_string(), value);
            }
        }
        node.stamp.touch(current_user());
        self.store.update_node(node)
    }

    // ── Creation ─────────────────────────────────────────────────────

    /// Creates a project node (depth 1) bound to the named hierarchy and
    /// storage configs, which must already be registered.
    pub fn create_project(
        &self,
        name: &str,
        hierarchy_config: &str,
        storage_config: &str,
    ) -> Result<NodeRecord> {
        self.configs.hierarchy(hierarchy_config)?;
        self.configs.storage(storage_config)?;
        let root = self.root()?;
        let mut spec = NewNode::folder(&root, name);
        spec.db_config_name = Some(hierarchy_config.to_string());
        spec.storage_config_name = Some(storage_config.to_string());
        self.create(spec)
    }

    /// Validates and creates a node.
    ///
    /// Walks the whole admission machine: structural parent checks, config
    /// inheritance, version sequencing, meaning resolution, template name
    /// assembly, type tagging and sibling uniqueness, all inside one store
    /// transaction.
    pub fn create(&self, spec: NewNode<'_>) -> Result<NodeRecord> {
        let parent = self.node(spec.parent.id)?;
        if !parent.active {
            return Err(TreeError::Structure(format!(
                "parent '{}' is deactivated",
                parent.name
            )));
        }
        if !parent.is_folder() {
            return Err(TreeError::Structure(format!(
                "parent '{}' is a {} and cannot have children",
                parent.name,
                parent.kind.as_str()
            )));
        }
        let depth = parent.depth + 1;

        let (db_config_name, storage_config_name) = if parent.is_root() {
            let db = spec.db_config_name.clone().ok_or_else(|| {
                TreeError::Structure("projects require an explicit hierarchy config".into())
            })?;
            let storage = spec.storage_config_name.clone().ok_or_else(|| {
                TreeError::Structure("projects require an explicit storage config".into())
            })?;
            (db, storage)
        } else {
            (
                spec.db_config_name
                    .clone()
                    .or_else(|| parent.db_config_name.clone())
                    .ok_or_else(|| {
                        TreeError::Structure(format!(
                            "parent '{}' carries no hierarchy config",
                            parent.name
                        ))
                    })?,
                spec.storage_config_name
                    .clone()
                    .or_else(|| parent.storage_config_name.clone())
                    .ok_or_else(|| {
                        TreeError::Structure(format!(
                            "parent '{}' carries no storage config",
                            parent.name
                        ))
                    })?,
            )
        };

        let mut type_name = spec.type_name.clone().or_else(|| parent.type_name.clone());
        let mut type_group_name = spec
            .type_group_name
            .clone()
            .or_else(|| parent.type_group_name.clone());

        let (name, meaning) = if spec.kind == NodeKind::Symbol {
            let name = spec
                .name
                .clone()
                .ok_or_else(|| TreeError::Naming("symbols require a name".into()))?;
            let origin = spec
                .origin
                .ok_or_else(|| TreeError::Structure("symbols require an origin node".into()))?;
            self.node(origin)?;
            (name, SYMBOL_MEANING.to_string())
        } else {
            let hierarchy = self.configs.hierarchy(&db_config_name)?;
            let short = match spec.name.clone() {
                Some(short) => short,
                None if spec.kind == NodeKind::File => {
                    self.propose_version_name(&parent, type_group_name.as_deref())?
                }
                None => {
                    return Err(TreeError::Naming(
                        "folders require a name; only files can be auto-versioned".into(),
                    ))
                }
            };

            let parent_path = self.logical_path(&parent)?;
            let candidate_path = if parent.is_root() {
                format!("/{short}")
            } else {
                format!("{parent_path}/{short}")
            };
            let meaning = config::meaning_for(hierarchy, depth, &candidate_path)?;

            let level = hierarchy.depth(depth).ok_or_else(|| TreeError::NoMeaning {
                depth,
                path: candidate_path.clone(),
            })?;
            let is_end = level.is_end.get(&meaning).copied().unwrap_or(false);
            if is_end != (spec.kind == NodeKind::File) {
                return Err(TreeError::Structure(format!(
                    "meaning '{meaning}' at depth {depth} expects a {}, got a {}",
                    if is_end { "file" } else { "folder" },
                    spec.kind.as_str()
                )));
            }

            let name = match (level.to_name.get(&meaning), level.to_name_param.get(&meaning)) {
                (Some(template), Some(indices)) => {
                    let mut chain: Vec<String> = self
                        .hierarchy(&parent)?
                        .into_iter()
                        .map(|n| n.name)
                        .collect();
                    chain.push(short.clone());
                    naming::assemble(template, &chain, indices)?
                }
                _ => short.clone(),
            };

            match meaning.as_str() {
                "TYPE" => type_name = Some(name.clone()),
                "TYPE_GROUP" => type_group_name = Some(name.clone()),
                _ => {}
            }
            (name, meaning)
        };

        if self.store.child_by_name(parent.id, &name)?.is_some() {
            return Err(TreeError::DuplicateName {
                parent: parent.name.clone(),
                name,
            });
        }

        let id = ident::generate();
        let record = NodeRecord {
            id,
            kind: spec.kind,
            label: spec.label.clone().unwrap_or_else(|| name.clone()),
            name,
            active: true,
            depth,
            meaning,
            parent_id: Some(parent.id),
            top_id: if depth == 2 { Some(id) } else { parent.top_id },
            origin_id: spec.origin,
            db_config_name: Some(db_config_name),
            storage_config_name: Some(storage_config_name),
            type_name,
            type_group_name,
            extra_data: spec.extra_data.clone().unwrap_or_else(|| Value::Object(Map::new())),
            path_data: Value::Object(Map::new()),
            stamp: Stamp::now(current_user()),
        };

        self.store.begin_transaction()?;
        match self.store.insert_node(&record) {
            Ok(()) => {
                self.store.commit_transaction()?;
                Ok(record)
            }
            Err(err) => {
                self.store.rollback_transaction()?;
                // A concurrent writer may have claimed the name between the
                // pre-check and the insert; surface that as a duplicate.
                if let TreeError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) = &err {
                    if code.code == rusqlite::ErrorCode::ConstraintViolation {
                        return Err(TreeError::DuplicateName {
                            parent: parent.name.clone(),
                            name: record.name.clone(),
                        });
                    }
                }
                Err(err)
            }
        }
    }

    /// Next version name the sequencer would assign under `parent`.
    pub fn propose_version_name(
        &self,
        parent: &NodeRecord,
        type_group: Option<&str>,
    ) -> Result<String> {
        let default = match type_group {
            Some(group) => {
                let info = self.cascading_info(parent)?;
                info.get(&format!("init_{group}_version"))
                    .and_then(Value::as_str)
                    .unwrap_or(naming::DEFAULT_VERSION)
                    .to_string()
            }
            None => naming::DEFAULT_VERSION.to_string(),
        };
        let siblings = self.store.children(parent.id, true)?;
        let names = siblings
            .iter()
            .filter(|n| n.is_file())
            .map(|n| n.name.as_str());
        Ok(naming::next_version_name(names, &default))
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Renames a node from a new short name, re-running meaning resolution
    /// and template assembly at its current position.
    pub fn rename(&self, node: &NodeRecord, short: &str) -> Result<NodeRecord> {
        if node.is_root() {
            return Err(TreeError::Structure("the root cannot be renamed".into()));
        }
        let parent_id = node
            .parent_id
            .ok_or_else(|| TreeError::Structure(format!("node '{}' has no parent", node.name)))?;
        let parent = self.node(parent_id)?;
        let mut updated = node.clone();

        if node.is_symbol() {
            updated.name = short.to_string();
        } else {
            let hierarchy = self.hierarchy_config_for(node)?;
            let parent_path = self.logical_path(&parent)?;
            let candidate_path = if parent.is_root() {
                format!("/{short}")
            } else {
                format!("{parent_path}/{short}")
            };
            let meaning = config::meaning_for(hierarchy, node.depth, &candidate_path)?;
            let level = hierarchy.depth(node.depth).ok_or_else(|| TreeError::NoMeaning {
                depth: node.depth,
                path: candidate_path.clone(),
            })?;
            updated.name = match (level.to_name.get(&meaning), level.to_name_param.get(&meaning)) {
                (Some(template), Some(indices)) => {
                    let mut chain: Vec<String> = self
                        .hierarchy(&parent)?
                        .into_iter()
                        .map(|n| n.name)
                        .collect();
                    chain.push(short.to_string());
                    naming::assemble(template, &chain, indices)?
                }
                _ => short.to_string(),
            };
            updated.meaning = meaning;
        }

        if updated.name != node.name {
            if self.store.child_by_name(parent.id, &updated.name)?.is_some() {
                return Err(TreeError::DuplicateName {
                    parent: parent.name.clone(),
                    name: updated.name,
                });
            }
            if updated.label == node.name {
                updated.label = updated.name.clone();
            }
        }
        updated.stamp.touch(current_user());
        self.store.update_node(&updated)?;
        Ok(updated)
    }

    /// Moves a node under a new parent at the same depth, revalidating its
    /// meaning at the new position. Descendant depths are unaffected since
    /// the depth does not change.
    pub fn move_node(&self, node: &NodeRecord, new_parent: &NodeRecord) -> Result<NodeRecord> {
        if node.is_root() {
            return Err(TreeError::Structure("the root cannot be moved".into()));
        }
        if new_parent.depth + 1 != node.depth {
            return Err(TreeError::Structure(format!(
                "cannot move '{}' from depth {} under a depth-{} parent",
                node.name, node.depth, new_parent.depth
            )));
        }
        if !new_parent.is_folder() || !new_parent.active {
            return Err(TreeError::Structure(format!(
                "'{}' cannot take children",
                new_parent.name
            )));
        }
        if self.store.child_by_name(new_parent.id, &node.name)?.is_some() {
            return Err(TreeError::DuplicateName {
                parent: new_parent.name.clone(),
                name: node.name.clone(),
            });
        }

        let mut updated = node.clone();
        updated.parent_id = Some(new_parent.id);
        updated.top_id = if node.depth == 2 {
            Some(node.id)
        } else {
            new_parent.top_id
        };
        if !node.is_symbol() {
            let hierarchy = self.hierarchy_config_for(&updated)?;
            let path = format!(
                "{}/{}",
                self.logical_path(new_parent)?.trim_end_matches('/'),
                node.name
            );
            updated.meaning = config::meaning_for(hierarchy, node.depth, &path)?;
        }
        updated.stamp.touch(current_user());

        self.store.begin_transaction()?;
        let outcome = (|| {
            self.store.update_node(&updated)?;
            // Every descendant inherits the new top pointer.
            let mut queue = VecDeque::from([updated.clone()]);
            while let Some(ancestor) = queue.pop_front() {
                for mut child in self.store.children(ancestor.id, false)? {
                    child.top_id = if child.depth == 2 {
                        Some(child.id)
                    } else {
                        ancestor.top_id
                    };
                    self.store.update_node(&child)?;
                    queue.push_back(child);
                }
            }
            Ok(())
        })();
        match outcome {
            Ok(()) => {
                self.store.commit_transaction()?;
                Ok(updated)
            }
            Err(err) => {
                self.store.rollback_transaction()?;
                Err(err)
            }
        }
    }

    /// Soft-deletes a node and every descendant. Ids survive; the names
    /// become reusable among active siblings. Returns the number of nodes
    /// deactivated.
    pub fn deactivate(&self, node: &NodeRecord) -> Result<usize> {
        if node.is_root() {
            return Err(TreeError::Structure("the root cannot be deactivated".into()));
        }
        log::warn!(
            "deactivating '{}' ({}) and its subtree",
            node.name,
            node.id
        );
        let mut stamp = node.stamp.clone();
        stamp.touch(current_user());

        self.store.begin_transaction()?;
        let outcome = (|| {
            let mut count = 0;
            let mut queue = VecDeque::from([node.id]);
            while let Some(id) = queue.pop_front() {
                self.store.set_active(id, false, &stamp)?;
                count += 1;
                for child in self.store.children(id, true)? {
                    queue.push_back(child.id);
                }
            }
            Ok(count)
        })();
        match outcome {
            Ok(count) => {
                self.store.commit_transaction()?;
                Ok(count)
            }
            Err(err) => {
                self.store.rollback_transaction()?;
                Err(err)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{movie_scaffold, movie_tree};
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn boot_creates_a_singleton_root() {
        let tree = Tree::open_in_memory().unwrap();
        let root = tree.root().unwrap();
        assert_eq!(root.depth, 0);
        assert_eq!(root.meaning, ROOT_MEANING);
        assert_eq!(root.name, ROOT_NODE_NAME);
    }

    #[test]
    fn configs_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tree.db");
        {
            let mut tree = Tree::open(&db).unwrap();
            tree.add_hierarchy_config(
                "movie",
                config::parse_hierarchy_str(test_support::HIERARCHY_YAML).unwrap(),
            )
            .unwrap();
        }
        let tree = Tree::open(&db).unwrap();
        assert!(tree.configs().has_hierarchy("movie"));
    }

    #[test]
    fn projects_require_explicit_configs() {
        let tree = Tree::open_in_memory().unwrap();
        let root = tree.root().unwrap();
        let err = tree.create(NewNode::folder(&root, "prj")).unwrap_err();
        assert!(matches!(err, TreeError::Structure(_)));
    }

    #[test]
    fn create_project_binds_configs() {
        let (tree, project) = movie_tree();
        assert_eq!(project.depth, 1);
        assert_eq!(project.meaning, "PROJECT");
        assert_eq!(project.db_config_name.as_deref(), Some("movie"));
        assert_eq!(tree.project("prj").unwrap().id, project.id);
    }

    #[test]
    fn children_inherit_configs_and_assemble_names() {
        let (tree, _, sequence, shot) = movie_scaffold();
        assert_eq!(sequence.meaning, "SEQUENCE");
        assert_eq!(sequence.db_config_name.as_deref(), Some("movie"));
        // Depth-3 template is "{0}_{1}" over [sequence, self].
        assert_eq!(shot.name, "sq01_0010");
        assert_eq!(shot.label, "sq01_0010");
        assert_eq!(tree.logical_path(&shot).unwrap(), "/prj/sq01/sq01_0010");
    }

    #[test]
    fn kind_must_agree_with_is_end() {
        let (tree, _, _, shot) = movie_scaffold();
        let err = tree
            .create(NewNode::folder(&shot, "v0001"))
            .unwrap_err();
        assert!(matches!(err, TreeError::Structure(_)));
    }

    #[test]
    fn duplicate_active_names_are_rejected() {
        let (tree, project) = movie_tree();
        tree.create(NewNode::folder(&project, "sq01")).unwrap();
        let err = tree.create(NewNode::folder(&project, "sq01")).unwrap_err();
        assert!(matches!(err, TreeError::DuplicateName { .. }));
    }

    #[test]
    fn deactivation_cascades_and_frees_names() {
        let (tree, _, sequence, shot) = movie_scaffold();
        let count = tree.deactivate(&sequence).unwrap();
        assert_eq!(count, 2);
        assert!(!tree.node(shot.id).unwrap().active);

        // The name is reusable now.
        let project = tree.project("prj").unwrap();
        tree.create(NewNode::folder(&project, "sq01")).unwrap();
    }

    #[test]
    fn files_auto_version_from_siblings() {
        let (tree, _, _, shot) = movie_scaffold();
        let first = tree.create(NewNode::file(&shot, None)).unwrap();
        assert_eq!(first.name, "v0001");
        assert_eq!(first.meaning, "VERSION");
        assert!(first.is_file());

        let second = tree.create(NewNode::file(&shot, None)).unwrap();
        assert_eq!(second.name, "v0002");
    }

    #[test]
    fn sequencer_default_comes_from_cascading_info() {
        let (tree, mut project) = movie_tree();
        tree.set_cascading_info(&mut project, "init_plate_version", "v0101".into())
            .unwrap();
        let project = tree.project("prj").unwrap();
        let sequence = tree.create(NewNode::folder(&project, "sq01")).unwrap();
        let shot = tree.create(NewNode::folder(&sequence, "0010")).unwrap();

        let mut spec = NewNode::file(&shot, None);
        spec.type_group_name = Some("plate".to_string());
        let file = tree.create(spec).unwrap();
        assert_eq!(file.name, "v0101");
    }

    #[test]
    fn cascading_info_merges_with_deeper_override() {
        let (tree, mut project) = movie_tree();
        tree.set_cascading_info(&mut project, "fps", 24.into()).unwrap();
        tree.set_cascading_info(&mut project, "colorspace", "aces".into())
            .unwrap();
        let sequence = tree
            .create(NewNode::folder(&tree.project("prj").unwrap(), "sq01"))
            .unwrap();
        let mut sequence = sequence;
        tree.set_cascading_info(&mut sequence, "fps", 48.into()).unwrap();

        let info = tree.cascading_info(&sequence).unwrap();
        assert_eq!(info.get("fps").unwrap(), &Value::from(48));
        assert_eq!(info.get("colorspace").unwrap(), &Value::from("aces"));
        assert_eq!(info.private.get("fps").unwrap(), &Value::from(48));
        assert_eq!(info.inherited.get("fps").unwrap(), &Value::from(24));
    }

    #[test]
    fn top_is_self_at_depth_two_and_inherited_below() {
        let (tree, project, sequence, shot) = movie_scaffold();
        assert!(tree.top(&project).unwrap().is_none());
        assert_eq!(tree.top(&sequence).unwrap().unwrap().id, sequence.id);
        assert_eq!(tree.top(&shot).unwrap().unwrap().id, sequence.id);

        let file = tree.create(NewNode::file(&shot, None)).unwrap();
        assert_eq!(tree.top(&file).unwrap().unwrap().id, sequence.id);
    }

    #[test]
    fn symbols_proxy_children_to_their_origin() {
        let (tree, project, sequence, shot) = movie_scaffold();
        let symbol = tree
            .create(NewNode::symbol(&project, "latest", sequence.id))
            .unwrap();
        assert_eq!(symbol.meaning, SYMBOL_MEANING);

        let names: Vec<_> = tree
            .children(&symbol)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec![shot.name.clone()]);
        assert_eq!(
            tree.child(&symbol, &shot.name).unwrap().unwrap().id,
            shot.id
        );
    }

    #[test]
    fn walk_is_breadth_first() {
        let (tree, project, _, _) = movie_scaffold();
        let sq02 = tree.create(NewNode::folder(&project, "sq02")).unwrap();
        tree.create(NewNode::folder(&sq02, "0020")).unwrap();

        let names: Vec<_> = tree
            .walk(&project)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["sq01", "sq02", "sq01_0010", "sq02_0020"]);
    }

    #[test]
    fn find_meaning_walks_upwards() {
        let (tree, _, sequence, shot) = movie_scaffold();
        let hit = tree
            .find_meaning(&shot, &["SEQUENCE", "PROJECT"])
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, sequence.id);
        assert!(tree.find_meaning(&shot, &["ASSET"]).unwrap().is_none());
    }

    #[test]
    fn rename_reassembles_the_template_name() {
        let (tree, _, _, shot) = movie_scaffold();
        let renamed = tree.rename(&shot, "0020").unwrap();
        assert_eq!(renamed.name, "sq01_0020");
        assert_eq!(renamed.label, "sq01_0020");
        assert!(renamed.stamp.updated_at.is_some());
    }

    #[test]
    fn move_requires_matching_depth_and_free_name() {
        let (tree, project, sequence, shot) = movie_scaffold();
        let sq02 = tree.create(NewNode::folder(&project, "sq02")).unwrap();

        let err = tree.move_node(&shot, &project).unwrap_err();
        assert!(matches!(err, TreeError::Structure(_)));

        let moved = tree.move_node(&shot, &sq02).unwrap();
        assert_eq!(moved.parent_id, Some(sq02.id));
        assert_eq!(moved.top_id, Some(sq02.id));
        assert!(tree.child(&sequence, &shot.name).unwrap().is_none());
    }

    #[test]
    fn move_rewrites_descendant_top_pointers() {
        let (tree, project, _, shot) = movie_scaffold();
        let file = tree.create(NewNode::file(&shot, None)).unwrap();
        let sq02 = tree.create(NewNode::folder(&project, "sq02")).unwrap();

        tree.move_node(&shot, &sq02).unwrap();
        assert_eq!(tree.node(file.id).unwrap().top_id, Some(sq02.id));
    }

    #[test]
    fn sequencer_proposals_are_idempotent() {
        let (tree, _, _, shot) = movie_scaffold();
        tree.create(NewNode::file(&shot, None)).unwrap();

        let first = tree.propose_version_name(&shot, None).unwrap();
        let second = tree.propose_version_name(&shot, None).unwrap();
        assert_eq!(first, "v0002");
        assert_eq!(second, first);
    }

    #[test]
    fn sequencer_ignores_folder_siblings() {
        let (tree, _, _, shot) = movie_scaffold();
        let rogue = NodeRecord {
            id: ident::generate(),
            kind: NodeKind::Folder,
            name: "v0099".to_string(),
            label: "v0099".to_string(),
            active: true,
            depth: shot.depth + 1,
            meaning: "VERSION".to_string(),
            parent_id: Some(shot.id),
            top_id: shot.top_id,
            origin_id: None,
            db_config_name: shot.db_config_name.clone(),
            storage_config_name: shot.storage_config_name.clone(),
            type_name: None,
            type_group_name: None,
            extra_data: Value::Object(Map::new()),
            path_data: Value::Object(Map::new()),
            stamp: Stamp::now("alice"),
        };
        tree.store().insert_node(&rogue).unwrap();

        assert_eq!(tree.propose_version_name(&shot, None).unwrap(), "v0001");
    }
}
