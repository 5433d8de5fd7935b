//! Logical tree paths with wildcard resolution.
//!
//! A `DbPath` is a value: building one never touches the store. `resolve`
//! matches each component as an anchored regex against node names level by
//! level, so `/prj/sq.*/sq.*_0010` fans out across sequences.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use regex::Regex;

use crate::config::HierarchyConfig;
use crate::error::{Result, TreeError};
use crate::node::{NodeKind, NodeRecord};
use crate::tree::{NewNode, Tree};

/// Outcome of resolving a logical path. A single hit is the common case;
/// wildcard components fan out into `Many`, which may be empty.
#[derive(Debug, Clone)]
pub enum Resolution {
    One(NodeRecord),
    Many(Vec<NodeRecord>),
}

impl Resolution {
    pub fn single(&self) -> Option<&NodeRecord> {
        match self {
            Resolution::One(node) => Some(node),
            Resolution::Many(_) => None,
        }
    }

    pub fn into_nodes(self) -> Vec<NodeRecord> {
        match self {
            Resolution::One(node) => vec![node],
            Resolution::Many(nodes) => nodes,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Resolution::Many(nodes) if nodes.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DbPath {
    components: Vec<String>,
    cache: RefCell<Option<Resolution>>,
}

impl PartialEq for DbPath {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for DbPath {}

impl fmt::Display for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl DbPath {
    pub fn new(path: &str) -> Self {
        let components = path
            .split('/')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        DbPath {
            components,
            cache: RefCell::new(None),
        }
    }

    pub fn from_components(components: Vec<String>) -> Self {
        DbPath {
            components,
            cache: RefCell::new(None),
        }
    }

    /// Wildcarded path from meaning → value pairs. Each named meaning is
    /// placed at the depth whose `content` lists it; gaps up to the deepest
    /// named meaning become `.*`.
    pub fn make_path(config: &HierarchyConfig, values: &HashMap<String, String>) -> Result<Self> {
        let mut slots: Vec<Option<String>> = Vec::new();
        for (meaning, value) in values {
            let meaning = meaning.to_uppercase();
            let depth = (1..=config.max_depth())
                .find(|d| {
                    config
                        .depth(*d)
                        .map_or(false, |level| level.content.iter().any(|m| *m == meaning))
                })
                .ok_or_else(|| {
                    TreeError::Config(format!("meaning '{meaning}' appears at no depth"))
                })?;
            if slots.len() < depth as usize {
                slots.resize(depth as usize, None);
            }
            slots[depth as usize - 1] = Some(value.clone());
        }
        Ok(DbPath::from_components(
            slots
                .into_iter()
                .map(|slot| slot.unwrap_or_else(|| ".*".to_string()))
                .collect(),
        ))
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Last component, if any.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    pub fn child(&self, name: &str) -> DbPath {
        let mut components = self.components.clone();
        components.extend(name.split('/').filter(|c| !c.is_empty()).map(str::to_string));
        DbPath::from_components(components)
    }

    pub fn parent(&self) -> Option<DbPath> {
        if self.components.is_empty() {
            return None;
        }
        Some(DbPath::from_components(
            self.components[..self.components.len() - 1].to_vec(),
        ))
    }

    /// Prefix of this path truncated to `depth` components.
    pub fn ancestor(&self, depth: usize) -> Option<DbPath> {
        if depth > self.components.len() {
            return None;
        }
        Some(DbPath::from_components(self.components[..depth].to_vec()))
    }

    /// Resolves the path against the tree. The result is cached on the
    /// value; pass `refresh` to re-run the lookup.
    pub fn resolve(&self, tree: &Tree, refresh: bool) -> Result<Resolution> {
        if !refresh {
            if let Some(cached) = self.cache.borrow().as_ref() {
                return Ok(cached.clone());
            }
        }

        let mut frontier = vec![tree.root()?];
        for component in &self.components {
            let matcher = Regex::new(&format!("^(?:{component})$"))?;
            let mut next = Vec::new();
            for node in &frontier {
                for child in tree.children(node)? {
                    if matcher.is_match(&child.name) {
                        next.push(child);
                    }
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }

        let resolution = if frontier.len() == 1 {
            Resolution::One(frontier.remove(0))
        } else {
            Resolution::Many(frontier)
        };
        *self.cache.borrow_mut() = Some(resolution.clone());
        Ok(resolution)
    }

    /// Child paths of a uniquely resolved node. Wildcard or empty
    /// resolutions list nothing.
    pub fn listdir(&self, tree: &Tree) -> Result<Vec<DbPath>> {
        let resolution = self.resolve(tree, false)?;
        let Some(node) = resolution.single() else {
            return Ok(Vec::new());
        };
        Ok(tree
            .children(node)?
            .into_iter()
            .map(|child| self.child(&child.name))
            .collect())
    }

    /// Breadth-first logical paths below a uniquely resolved node.
    pub fn walk(&self, tree: &Tree) -> Result<Vec<DbPath>> {
        let resolution = self.resolve(tree, false)?;
        let Some(node) = resolution.single() else {
            return Ok(Vec::new());
        };
        let mut paths = Vec::new();
        for descendant in tree.walk(node)? {
            paths.push(tree.db_path(&descendant)?);
        }
        Ok(paths)
    }

    /// Creates a chain of children below this path from short names, picking
    /// Folder or File per the resolved meaning's `is_end`. The path must
    /// resolve to exactly one non-root node.
    pub fn create(&self, tree: &Tree, names: &[&str]) -> Result<DbPath> {
        let resolution = self.resolve(tree, true)?;
        let base = resolution.single().ok_or_else(|| {
            TreeError::Structure(format!("'{self}' does not resolve to a single node"))
        })?;
        if base.is_root() {
            return Err(TreeError::Structure(
                "projects cannot be created through a logical path".into(),
            ));
        }

        let hierarchy = tree.hierarchy_config_for(base)?;
        let mut cursor = base.clone();
        let mut path = tree.db_path(&cursor)?;
        for short in names {
            let depth = cursor.depth + 1;
            let candidate = format!("{}/{}", tree.logical_path(&cursor)?, short);
            let meaning = crate::config::meaning_for(hierarchy, depth, &candidate)?;
            let is_end = hierarchy
                .depth(depth)
                .and_then(|level| level.is_end.get(&meaning).copied())
                .unwrap_or(false);
            let kind = if is_end { NodeKind::File } else { NodeKind::Folder };
            let mut spec = NewNode::folder(&cursor, short);
            spec.kind = kind;
            // An active folder already carrying the assembled name is reused;
            // an existing file stays an error.
            let next = match tree.create(spec) {
                Ok(created) => created,
                Err(TreeError::DuplicateName { name, .. }) if kind == NodeKind::Folder => tree
                    .child(&cursor, &name)?
                    .filter(NodeRecord::is_folder)
                    .ok_or(TreeError::DuplicateName {
                        parent: cursor.name.clone(),
                        name,
                    })?,
                Err(err) => return Err(err),
            };
            path = path.child(&next.name);
            cursor = next;
        }
        Ok(path)
    }
}

impl Tree {
    /// Logical path value for an existing node.
    pub fn db_path(&self, node: &NodeRecord) -> Result<DbPath> {
        Ok(DbPath::new(&self.logical_path(node)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::movie_scaffold;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_and_structure_ops() {
        let path = DbPath::new("/prj/sq01/sq01_0010");
        assert_eq!(path.to_string(), "/prj/sq01/sq01_0010");
        assert_eq!(path.depth(), 3);
        assert_eq!(path.name(), Some("sq01_0010"));
        assert_eq!(path.parent().unwrap().to_string(), "/prj/sq01");
        assert_eq!(path.ancestor(1).unwrap().to_string(), "/prj");
        assert_eq!(path.ancestor(0).unwrap().to_string(), "/");
        assert!(path.ancestor(9).is_none());
        assert_eq!(path.child("v0001").to_string(), "/prj/sq01/sq01_0010/v0001");
        assert_eq!(DbPath::new("///").to_string(), "/");
    }

    #[test]
    fn exact_paths_resolve_to_one_node() {
        let (tree, _, _, shot) = movie_scaffold();
        let path = DbPath::new("/prj/sq01/sq01_0010");
        let resolution = path.resolve(&tree, false).unwrap();
        assert_eq!(resolution.single().unwrap().id, shot.id);
    }

    #[test]
    fn wildcards_fan_out() {
        let (tree, project, _, _) = movie_scaffold();
        let sq02 = tree.create(NewNode::folder(&project, "sq02")).unwrap();
        tree.create(NewNode::folder(&sq02, "0010")).unwrap();

        let resolution = DbPath::new("/prj/sq.*/.*_0010").resolve(&tree, false).unwrap();
        let names: Vec<_> = resolution
            .into_nodes()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["sq01_0010", "sq02_0010"]);
    }

    #[test]
    fn narrowing_a_wildcard_never_grows_the_result() {
        let (tree, project, _, _) = movie_scaffold();
        let sq02 = tree.create(NewNode::folder(&project, "sq02")).unwrap();
        tree.create(NewNode::folder(&sq02, "0010")).unwrap();

        let wide = DbPath::new("/prj/.*/.*").resolve(&tree, false).unwrap();
        let narrower = DbPath::new("/prj/sq02/.*").resolve(&tree, false).unwrap();
        let exact = DbPath::new("/prj/sq02/sq02_0010")
            .resolve(&tree, false)
            .unwrap();

        let wide = wide.into_nodes();
        let narrower = narrower.into_nodes();
        let exact = exact.into_nodes();
        assert_eq!(wide.len(), 2);
        assert!(narrower.len() <= wide.len());
        assert!(exact.len() <= narrower.len());
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn segments_match_whole_names_only() {
        let (tree, project, _, _) = movie_scaffold();
        tree.create(NewNode::folder(&project, "sq012")).unwrap();

        let resolution = DbPath::new("/prj/sq01").resolve(&tree, false).unwrap();
        assert_eq!(resolution.single().unwrap().name, "sq01");
    }

    #[test]
    fn missing_paths_resolve_to_empty() {
        let (tree, _, _, _) = movie_scaffold();
        let resolution = DbPath::new("/prj/nothere").resolve(&tree, false).unwrap();
        assert!(resolution.is_empty());
    }

    #[test]
    fn resolution_is_cached_until_refreshed() {
        let (tree, project, _, _) = movie_scaffold();
        let path = DbPath::new("/prj/sq.*");
        assert_eq!(path.resolve(&tree, false).unwrap().into_nodes().len(), 1);

        tree.create(NewNode::folder(&project, "sq02")).unwrap();
        assert_eq!(path.resolve(&tree, false).unwrap().into_nodes().len(), 1);
        assert_eq!(path.resolve(&tree, true).unwrap().into_nodes().len(), 2);
    }

    #[test]
    fn make_path_fills_gaps_with_wildcards() {
        let (tree, _, _, _) = movie_scaffold();
        let hierarchy = tree.configs().hierarchy("movie").unwrap();
        let mut values = HashMap::new();
        values.insert("project".to_string(), "prj".to_string());
        values.insert("shot".to_string(), "sq01_0010".to_string());

        let path = DbPath::make_path(hierarchy, &values).unwrap();
        assert_eq!(path.to_string(), "/prj/.*/sq01_0010");
        assert_eq!(path.resolve(&tree, false).unwrap().single().unwrap().name, "sq01_0010");
    }

    #[test]
    fn make_path_rejects_unknown_meanings() {
        let (tree, _, _, _) = movie_scaffold();
        let hierarchy = tree.configs().hierarchy("movie").unwrap();
        let mut values = HashMap::new();
        values.insert("episode".to_string(), "ep01".to_string());
        assert!(DbPath::make_path(hierarchy, &values).is_err());
    }

    #[test]
    fn listdir_and_walk_return_logical_paths() {
        let (tree, _, _, shot) = movie_scaffold();
        tree.create(NewNode::file(&shot, None)).unwrap();

        let listed = DbPath::new("/prj/sq01").listdir(&tree).unwrap();
        assert_eq!(listed[0].to_string(), "/prj/sq01/sq01_0010");

        let walked = DbPath::new("/prj").walk(&tree).unwrap();
        let strings: Vec<_> = walked.iter().map(DbPath::to_string).collect();
        assert_eq!(
            strings,
            vec!["/prj/sq01", "/prj/sq01/sq01_0010", "/prj/sq01/sq01_0010/v0001"]
        );
    }

    #[test]
    fn create_builds_a_chain_with_kinds_from_is_end() {
        let (tree, _, _, _) = movie_scaffold();
        let made = DbPath::new("/prj/sq01")
            .create(&tree, &["0020", "v0001"])
            .unwrap();
        assert_eq!(made.to_string(), "/prj/sq01/sq01_0020/v0001");

        let node = made.resolve(&tree, true).unwrap().single().unwrap().clone();
        assert!(node.is_file());
        assert_eq!(node.meaning, "VERSION");

        let err = DbPath::new("/prj/sq01")
            .create(&tree, &["0020", "v0001"])
            .unwrap_err();
        assert!(matches!(err, TreeError::DuplicateName { .. }));
    }

    #[test]
    fn create_reuses_folders_under_their_assembled_names() {
        let (tree, _, _, _) = movie_scaffold();
        let base = DbPath::new("/prj/sq01");

        // The short name "0020" assembles to "sq01_0020"; a second run must
        // find that folder again instead of failing on the duplicate.
        let first = base.create(&tree, &["0020"]).unwrap();
        let second = base.create(&tree, &["0020"]).unwrap();
        assert_eq!(first.to_string(), "/prj/sq01/sq01_0020");
        assert_eq!(second, first);

        let shots = DbPath::new("/prj/sq01/sq01_0020")
            .resolve(&tree, true)
            .unwrap();
        assert!(shots.single().unwrap().is_folder());
    }

    #[test]
    fn create_refuses_wildcard_bases_and_projects() {
        let (tree, project, _, _) = movie_scaffold();
        tree.create(NewNode::folder(&project, "sq02")).unwrap();
        let err = DbPath::new("/prj/sq.*").create(&tree, &["0030"]).unwrap_err();
        assert!(matches!(err, TreeError::Structure(_)));

        let err = DbPath::new("/").create(&tree, &["prj2"]).unwrap_err();
        assert!(matches!(err, TreeError::Structure(_)));
    }
}
