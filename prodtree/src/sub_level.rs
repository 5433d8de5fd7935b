//! Virtual sub-filesystems below file nodes.
//!
//! The contents a file node stands for (frame sequences, caches, reference
//! folders) live on disk, not in the store. `rescan` snapshots that disk
//! subtree into the node's `path_data`, and `SubLevel` exposes the snapshot
//! as a navigable read-only filesystem that works away from the storage.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Result, TreeError};
use crate::node::NodeRecord;
use crate::tree::Tree;

/// Entry-name prefixes ignored during rescan.
pub const JUNK_PREFIXES: &[&str] = &[".", "Thumb"];

/// File extensions ignored during rescan.
pub const JUNK_EXTENSIONS: &[&str] = &["csv", "db", "tmp"];

/// `path_data` key holding the snapshot.
const FILE_TREE_KEY: &str = "file_tree";

fn frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)(\d+)(\.[A-Za-z][A-Za-z0-9]*)$").unwrap())
}

/// Nested snapshot of a disk subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubTree {
    #[serde(default)]
    pub is_file: bool,
    #[serde(default)]
    pub entries: BTreeMap<String, SubTree>,
}

impl SubTree {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `rel` (slash-separated) as a file path; intermediate
    /// components become directories.
    pub fn insert_file(&mut self, rel: &str) {
        self.insert(rel, true);
    }

    /// Records `rel` as a directory path.
    pub fn insert_dir(&mut self, rel: &str) {
        self.insert(rel, false);
    }

    fn insert(&mut self, rel: &str, is_file: bool) {
        let mut cursor = self;
        let components: Vec<&str> = rel.split('/').filter(|c| !c.is_empty()).collect();
        for (position, component) in components.iter().enumerate() {
            cursor = cursor.entries.entry((*component).to_string()).or_default();
            if is_file && position == components.len() - 1 {
                cursor.is_file = true;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&SubTree> {
        self.entries.get(name)
    }
}

/// Whether a directory entry should be skipped by `rescan`.
pub fn is_junk(name: &str) -> bool {
    if JUNK_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
        return true;
    }
    name.rsplit_once('.')
        .map_or(false, |(_, ext)| JUNK_EXTENSIONS.contains(&ext))
}

/// A group of files collapsed into one frame sequence. Single files have
/// no frames and `pattern` is just the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequentialFiles {
    /// Full path, with the frame number replaced by a printf pattern
    /// (`%04d`) when frames were collapsed.
    pub pattern: String,
    pub frames: Vec<i64>,
    pub missing: Vec<i64>,
}

impl SequentialFiles {
    pub fn single(path: impl Into<String>) -> Self {
        SequentialFiles {
            pattern: path.into(),
            frames: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub fn is_sequence(&self) -> bool {
        !self.frames.is_empty()
    }
}

/// Frames absent from the dense range spanned by `frames`.
pub fn missing_frames(frames: &[i64]) -> Vec<i64> {
    let (Some(&min), Some(&max)) = (frames.iter().min(), frames.iter().max()) else {
        return Vec::new();
    };
    (min..=max).filter(|f| !frames.contains(f)).collect()
}

/// Collapses file names within `dir` into frame sequences. Names sharing
/// head, extension and frame width group together; everything else stays a
/// single entry. Directory entries are never collapsed.
pub fn collapse_sequences(dir: &str, names: &[&str]) -> Vec<SequentialFiles> {
    let mut groups: HashMap<(String, String, usize), Vec<i64>> = HashMap::new();
    let mut order: Vec<(String, String, usize)> = Vec::new();
    let mut singles = Vec::new();

    for name in names {
        match frame_re().captures(name) {
            Some(caps) => {
                let key = (caps[1].to_string(), caps[3].to_string(), caps[2].len());
                let frame: i64 = match caps[2].parse() {
                    Ok(frame) => frame,
                    Err(_) => {
                        singles.push(SequentialFiles::single(format!("{dir}/{name}")));
                        continue;
                    }
                };
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                }
                groups.entry(key).or_default().push(frame);
            }
            None => singles.push(SequentialFiles::single(format!("{dir}/{name}"))),
        }
    }

    let mut result = Vec::new();
    for key in order {
        let mut frames = groups.remove(&key).unwrap_or_default();
        frames.sort_unstable();
        frames.dedup();
        let (head, tail, width) = key;
        result.push(SequentialFiles {
            pattern: format!("{dir}/{head}%0{width}d{tail}"),
            missing: missing_frames(&frames),
            frames,
        });
    }
    result.extend(singles);
    result
}

/// One navigable entry of a snapshot, carrying its physical path.
#[derive(Debug, Clone)]
pub struct SubLevel {
    path: String,
    tree: SubTree,
}

impl SubLevel {
    pub fn new(path: impl Into<String>, tree: SubTree) -> Self {
        SubLevel {
            path: path.into(),
            tree,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn is_file(&self) -> bool {
        self.tree.is_file
    }

    pub fn is_dir(&self) -> bool {
        !self.tree.is_file
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<SubLevel> {
        self.tree
            .get(name)
            .map(|child| SubLevel::new(format!("{}/{name}", self.path), child.clone()))
    }

    /// Direct children, directories and files alike, in name order.
    pub fn listdir(&self) -> Vec<SubLevel> {
        self.tree
            .entries
            .iter()
            .map(|(name, child)| SubLevel::new(format!("{}/{name}", self.path), child.clone()))
            .collect()
    }

    pub fn sub_folders(&self) -> Vec<SubLevel> {
        self.listdir().into_iter().filter(SubLevel::is_dir).collect()
    }

    pub fn sub_files(&self) -> Vec<SubLevel> {
        self.listdir().into_iter().filter(SubLevel::is_file).collect()
    }

    /// os.walk-style traversal: for each directory (self first), its
    /// sub-directory names and its files, collapsed into sequences when
    /// `collapse` is set.
    pub fn walk(&self, collapse: bool) -> Vec<(String, Vec<String>, Vec<SequentialFiles>)> {
        let mut result = Vec::new();
        let mut queue = VecDeque::from([self.clone()]);
        while let Some(level) = queue.pop_front() {
            let dirs: Vec<String> = level
                .sub_folders()
                .iter()
                .map(|d| d.name().to_string())
                .collect();
            let file_names: Vec<String> = level
                .sub_files()
                .iter()
                .map(|f| f.name().to_string())
                .collect();
            let name_refs: Vec<&str> = file_names.iter().map(String::as_str).collect();
            let files = if collapse {
                collapse_sequences(&level.path, &name_refs)
            } else {
                name_refs
                    .iter()
                    .map(|n| SequentialFiles::single(format!("{}/{n}", level.path)))
                    .collect()
            };
            result.push((level.path.clone(), dirs, files));
            for dir in level.sub_folders() {
                queue.push_back(dir);
            }
        }
        result
    }
}

/// A classified entry: the matched files plus the operation tag from the
/// decision config.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedFiles {
    pub files: SequentialFiles,
    pub op: String,
}

/// One flattened entry: which version contributed the files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenEntry {
    pub source: crate::ident::NodeId,
    pub files: SequentialFiles,
}

impl Tree {
    /// Snapshots the publish disk subtree of `node` into its `path_data`.
    /// Junk entries are dropped. Returns `Ok(false)` when the physical
    /// path does not exist.
    pub fn rescan(&self, node: &NodeRecord) -> Result<bool> {
        let base = self.disk_path_local(node, "publish", true)?;
        if !Path::new(&base).exists() {
            return Ok(false);
        }

        let mut tree = SubTree::default();
        let walker = WalkDir::new(&base)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| !is_junk(name))
            });
        for entry in walker {
            let entry = entry.map_err(|e| TreeError::Other(e.to_string()))?;
            let rel = entry
                .path()
                .strip_prefix(&base)
                .map_err(|e| TreeError::Other(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            if entry.file_type().is_dir() {
                tree.insert_dir(&rel);
            } else {
                tree.insert_file(&rel);
            }
        }

        let mut updated = node.clone();
        if !updated.path_data.is_object() {
            updated.path_data = serde_json::json!({});
        }
        if let serde_json::Value::Object(map) = &mut updated.path_data {
            map.insert(FILE_TREE_KEY.to_string(), serde_json::to_value(&tree)?);
        }
        self.store().set_path_data(node.id, &updated.path_data)?;
        Ok(true)
    }

    /// The cached virtual sub-filesystem of `node`. Empty when the node
    /// was never rescanned.
    pub fn sub_level(&self, node: &NodeRecord) -> Result<SubLevel> {
        let current = self.node(node.id)?;
        let tree = match current.path_data.get(FILE_TREE_KEY) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => SubTree::default(),
        };
        let base = self.disk_path_local(&current, "publish", false)?;
        Ok(SubLevel::new(base, tree))
    }

    /// Classifies the sub-filesystem of `node` with a decision config.
    ///
    /// Each level's patterns match full physical paths in declaration
    /// order. A null op descends one level deeper; a tagged op emits the
    /// entry. The `first` flag stops a level at its first match, `multiple`
    /// collects all matches, and `sequence` collapses frame files before
    /// matching.
    pub fn classify(&self, node: &NodeRecord, decision_name: &str) -> Result<Vec<ClassifiedFiles>> {
        let decision = self.configs().decision(decision_name)?;
        let root = self.sub_level(node)?;

        let mut result = Vec::new();
        let mut queue = VecDeque::from([(root, 0usize)]);
        while let Some((level, index)) = queue.pop_front() {
            let Some(stage) = decision.levels.get(index) else {
                continue;
            };

            // Entries at this level: directories stay single, files
            // collapse when the sequence flag is set.
            let mut entries: Vec<(SequentialFiles, Option<SubLevel>)> = Vec::new();
            for dir in level.sub_folders() {
                entries.push((SequentialFiles::single(dir.path().to_string()), Some(dir)));
            }
            if stage.has_flag("sequence") {
                let names: Vec<String> = level
                    .sub_files()
                    .iter()
                    .map(|f| f.name().to_string())
                    .collect();
                let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
                for files in collapse_sequences(level.path(), &name_refs) {
                    entries.push((files, None));
                }
            } else {
                for file in level.sub_files() {
                    entries.push((SequentialFiles::single(file.path().to_string()), None));
                }
            }

            let mut consumed = vec![false; entries.len()];
            let mut stop = false;
            for pattern in &stage.pattern {
                if stop {
                    break;
                }
                let matcher = Regex::new(pattern)?;
                let op = stage.op.get(pattern).cloned().unwrap_or(None);
                for (position, (files, child)) in entries.iter().enumerate() {
                    if consumed[position] || !matcher.is_match(&files.pattern) {
                        continue;
                    }
                    consumed[position] = true;
                    match (&op, child) {
                        (Some(tag), _) => result.push(ClassifiedFiles {
                            files: files.clone(),
                            op: tag.clone(),
                        }),
                        (None, Some(dir)) => queue.push_back((dir.clone(), index + 1)),
                        (None, None) => {}
                    }
                    if stage.has_flag("first") {
                        stop = true;
                        break;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Unions the collapsed sub-level contents of `node` and all older
    /// sibling versions, the newest contributor winning per relative path.
    pub fn flatten(&self, node: &NodeRecord, relative: bool) -> Result<Vec<FlattenEntry>> {
        let parent = match node.parent_id {
            Some(id) => self.node(id)?,
            None => return Ok(Vec::new()),
        };
        let mut versions: Vec<NodeRecord> = self
            .children(&parent)?
            .into_iter()
            .filter(|sibling| sibling.is_file() && sibling.name.as_str() <= node.name.as_str())
            .collect();
        versions.sort_by(|a, b| a.name.cmp(&b.name));

        let mut merged: BTreeMap<String, FlattenEntry> = BTreeMap::new();
        for version in &versions {
            let level = self.sub_level(version)?;
            let base = level.path().to_string();
            for (_, _, files) in level.walk(true) {
                for entry in files {
                    let key = entry
                        .pattern
                        .strip_prefix(&base)
                        .unwrap_or(&entry.pattern)
                        .trim_start_matches('/')
                        .to_string();
                    let files = if relative {
                        SequentialFiles {
                            pattern: key.clone(),
                            frames: entry.frames.clone(),
                            missing: entry.missing.clone(),
                        }
                    } else {
                        entry
                    };
                    merged.insert(
                        key,
                        FlattenEntry {
                            source: version.id,
                            files,
                        },
                    );
                }
            }
        }
        Ok(merged.into_values().collect())
    }
}
