use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hierarchy configuration: what each tree depth means and how nodes at
/// that depth are named and projected to disk. Parsed from YAML keyed by
/// depth ("1", "2", ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HierarchyConfig {
    pub levels: HashMap<String, DepthConfig>,
}

impl HierarchyConfig {
    pub fn depth(&self, depth: u32) -> Option<&DepthConfig> {
        self.levels.get(&depth.to_string())
    }

    /// Deepest level the configuration describes.
    pub fn max_depth(&self) -> u32 {
        self.levels
            .keys()
            .filter_map(|k| k.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
    }
}

/// Per-depth rules. `db_pattern` is kept as a `serde_yaml::Mapping` because
/// branch rules match in declaration order and the first hit wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepthConfig {
    #[serde(default)]
    pub content: Vec<String>,
    #[serde(default)]
    pub db_pattern: serde_yaml::Mapping,
    #[serde(default)]
    pub is_end: HashMap<String, bool>,
    #[serde(default)]
    pub to_name: HashMap<String, String>,
    #[serde(default)]
    pub to_name_param: HashMap<String, Vec<usize>>,
    #[serde(default)]
    pub to_disk: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub to_disk_param: HashMap<String, HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub from_disk: HashMap<String, HashMap<String, usize>>,
}

impl DepthConfig {
    /// Branch rules as (regex, meaning) pairs in declaration order.
    pub fn branch_rules(&self) -> impl Iterator<Item = (&str, &str)> {
        self.db_pattern
            .iter()
            .filter_map(|(k, v)| Some((k.as_str()?, v.as_str()?)))
    }
}

/// Storage configuration: area -> platform -> filesystem root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageConfig {
    pub areas: HashMap<String, HashMap<String, String>>,
}

impl StorageConfig {
    pub fn root(&self, area: &str, platform: &str) -> Option<&str> {
        self.areas.get(area)?.get(platform).map(String::as_str)
    }

    /// Finds the (area, platform) pair whose root is a prefix of `path`.
    /// Longest root wins so nested roots resolve to the deeper area.
    pub fn locate(&self, path: &str) -> Option<(&str, &str, &str)> {
        let mut best: Option<(&str, &str, &str)> = None;
        for (area, platforms) in &self.areas {
            for (platform, root) in platforms {
                if path.starts_with(root.as_str())
                    && best.map_or(true, |(_, _, r)| root.len() > r.len())
                {
                    best = Some((area.as_str(), platform.as_str(), root.as_str()));
                }
            }
        }
        best
    }
}

/// Decision configuration driving `classify` over a virtual sub-filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionConfig {
    pub levels: Vec<DecisionLevel>,
}

/// One classification level: ordered patterns, a per-pattern operation
/// (`None` means descend) and combinable flags separated by `|`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLevel {
    pub pattern: Vec<String>,
    #[serde(default)]
    pub op: HashMap<String, Option<String>>,
    #[serde(default)]
    pub flag: String,
}

impl DecisionLevel {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flag.split('|').any(|f| f.trim() == flag)
    }
}
