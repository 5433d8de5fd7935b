//! Named configuration registry.
//!
//! Three families of configuration drive the tree: hierarchy configs
//! (depth semantics), storage configs (area roots per platform) and
//! decision configs (sub-filesystem classification). All are referenced
//! by dotted name, e.g. `movie` or `show.alt`.

pub mod types;

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, TreeError};
pub use types::{DecisionConfig, DecisionLevel, DepthConfig, HierarchyConfig, StorageConfig};

pub fn parse_hierarchy(path: &Path) -> Result<HierarchyConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_hierarchy_str(&content)
}

pub fn parse_hierarchy_str(content: &str) -> Result<HierarchyConfig> {
    Ok(serde_yaml::from_str(content)?)
}

pub fn parse_storage(path: &Path) -> Result<StorageConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_storage_str(&content)
}

pub fn parse_storage_str(content: &str) -> Result<StorageConfig> {
    Ok(serde_yaml::from_str(content)?)
}

pub fn parse_decision(path: &Path) -> Result<DecisionConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_decision_str(&content)
}

pub fn parse_decision_str(content: &str) -> Result<DecisionConfig> {
    Ok(serde_yaml::from_str(content)?)
}

/// In-memory registry of named configurations.
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    hierarchies: HashMap<String, HierarchyConfig>,
    storages: HashMap<String, StorageConfig>,
    decisions: HashMap<String, DecisionConfig>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_hierarchy(&mut self, name: impl Into<String>, config: HierarchyConfig) {
        self.hierarchies.insert(name.into(), config);
    }

    pub fn insert_storage(&mut self, name: impl Into<String>, config: StorageConfig) {
        self.storages.insert(name.into(), config);
    }

    pub fn insert_decision(&mut self, name: impl Into<String>, config: DecisionConfig) {
        self.decisions.insert(name.into(), config);
    }

    pub fn hierarchy(&self, name: &str) -> Result<&HierarchyConfig> {
        self.hierarchies
            .get(name)
            .ok_or_else(|| TreeError::ConfigMissing(format!("hierarchy config '{name}'")))
    }

    pub fn storage(&self, name: &str) -> Result<&StorageConfig> {
        self.storages
            .get(name)
            .ok_or_else(|| TreeError::ConfigMissing(format!("storage config '{name}'")))
    }

    pub fn decision(&self, name: &str) -> Result<&DecisionConfig> {
        self.decisions
            .get(name)
            .ok_or_else(|| TreeError::ConfigMissing(format!("decision config '{name}'")))
    }

    pub fn has_hierarchy(&self, name: &str) -> bool {
        self.hierarchies.contains_key(name)
    }

    pub fn hierarchy_names(&self) -> Vec<&str> {
        self.hierarchies.keys().map(String::as_str).collect()
    }

    pub fn storages(&self) -> impl Iterator<Item = (&str, &StorageConfig)> {
        self.storages.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Loads preset files from `root/{hierarchy,storage,decision}/`.
    ///
    /// The dotted config name is derived from the file path relative to
    /// its family directory: `hierarchy/show/alt.yaml` registers the
    /// hierarchy config `show.alt`. Returns the (family, name) pairs that
    /// were registered.
    pub fn load_presets(&mut self, root: &Path) -> Result<Vec<(String, String)>> {
        let mut loaded = Vec::new();
        for family in ["hierarchy", "storage", "decision"] {
            let dir = root.join(family);
            if !dir.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                let is_yaml = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |e| e == "yaml" || e == "yml");
                if !entry.file_type().is_file() || !is_yaml {
                    continue;
                }
                let name = dotted_name(&dir, path)?;
                match family {
                    "hierarchy" => self.insert_hierarchy(name.clone(), parse_hierarchy(path)?),
                    "storage" => self.insert_storage(name.clone(), parse_storage(path)?),
                    _ => self.insert_decision(name.clone(), parse_decision(path)?),
                }
                loaded.push((family.to_string(), name));
            }
        }
        Ok(loaded)
    }
}

fn dotted_name(base: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|_| TreeError::Config(format!("preset outside base dir: {}", path.display())))?
        .with_extension("");
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("."))
}

/// Resolves the meaning of a node at `depth` whose logical path is `path`.
///
/// A level declaring a single meaning resolves to it directly. Otherwise
/// branch rules are tried in declaration order, each anchored to the whole
/// path; the first match wins, and the resolved meaning must be listed in
/// the level's `content`.
pub fn meaning_for(config: &HierarchyConfig, depth: u32, path: &str) -> Result<String> {
    let level = config.depth(depth).ok_or_else(|| TreeError::NoMeaning {
        depth,
        path: path.to_string(),
    })?;
    if let [only] = level.content.as_slice() {
        return Ok(only.clone());
    }
    for (pattern, meaning) in level.branch_rules() {
        let re = Regex::new(&format!("^(?:{pattern})$"))?;
        if re.is_match(path) {
            if !level.content.iter().any(|m| m == meaning) {
                return Err(TreeError::Config(format!(
                    "meaning '{meaning}' not listed in content for depth {depth}"
                )));
            }
            return Ok(meaning.to_string());
        }
    }
    Err(TreeError::NoMeaning {
        depth,
        path: path.to_string(),
    })
}

/// Meanings allowed one level below `depth`, paired with whether each one
/// produces a file node.
pub fn next_depth(config: &HierarchyConfig, depth: u32) -> Vec<(String, bool)> {
    let Some(level) = config.depth(depth + 1) else {
        return Vec::new();
    };
    level
        .content
        .iter()
        .map(|meaning| {
            let is_end = level.is_end.get(meaning).copied().unwrap_or(false);
            (meaning.clone(), is_end)
        })
        .collect()
}
