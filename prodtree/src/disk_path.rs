//! Projection between nodes and physical storage paths.
//!
//! A node maps to one physical path per (storage area, platform): the
//! area root plus one `to_disk` template segment per ancestor. The reverse
//! direction consumes path segments according to `from_disk` indices and
//! may legitimately land on zero or several nodes.

use crate::db_path::Resolution;
use crate::error::{Result, TreeError};
use crate::naming;
use crate::node::NodeRecord;
use crate::tree::{current_platform, Tree};

impl Tree {
    /// Physical path of `node` for a storage area and platform. Results are
    /// cached per (node, area, platform); pass `refresh` after renames.
    pub fn disk_path(
        &self,
        node: &NodeRecord,
        area: &str,
        platform: &str,
        refresh: bool,
    ) -> Result<String> {
        let key = (node.id.as_i64(), area.to_string(), platform.to_string());
        if !refresh {
            if let Some(cached) = self.disk_cache().borrow().get(&key) {
                return Ok(cached.clone());
            }
        }

        let storage = self.storage_config_for(node)?;
        let root = storage.root(area, platform).ok_or_else(|| {
            TreeError::DiskMapping(format!("no '{area}' root for platform '{platform}'"))
        })?;
        let hierarchy = self.hierarchy_config_for(node)?;

        let mut path = root.trim_end_matches('/').to_string();
        let chain = self.hierarchy(node)?;
        for entry in &chain[1..] {
            let level = hierarchy.depth(entry.depth).ok_or_else(|| {
                TreeError::DiskMapping(format!("no depth {} in hierarchy config", entry.depth))
            })?;
            let template = level
                .to_disk
                .get(&entry.meaning)
                .and_then(|areas| areas.get(area))
                .ok_or_else(|| {
                    TreeError::DiskMapping(format!(
                        "no '{area}' disk template for meaning '{}' at depth {}",
                        entry.meaning, entry.depth
                    ))
                })?;
            let params = level
                .to_disk_param
                .get(&entry.meaning)
                .and_then(|areas| areas.get(area))
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let mut values = Vec::with_capacity(params.len());
            for param in params {
                values.push(self.disk_param_value(entry, param)?);
            }
            path.push_str(&naming::format_positional(template, &values)?);
        }

        self.disk_cache().borrow_mut().insert(key, path.clone());
        Ok(path)
    }

    /// Physical path on the running host.
    pub fn disk_path_local(&self, node: &NodeRecord, area: &str, refresh: bool) -> Result<String> {
        self.disk_path(node, area, current_platform(), refresh)
    }

    fn disk_param_value(&self, node: &NodeRecord, param: &str) -> Result<String> {
        if let Some(name) = param.strip_prefix('<').and_then(|p| p.strip_suffix('>')) {
            let func = self.path_fn(name).ok_or_else(|| {
                TreeError::DiskMapping(format!("no dynamic path parameter '<{name}>' registered"))
            })?;
            return Ok(func());
        }
        node.field(param).ok_or_else(|| {
            TreeError::DiskMapping(format!(
                "node '{}' has no value for disk parameter '{param}'",
                node.name
            ))
        })
    }

    /// Finds the nodes a physical path points at within a storage area.
    ///
    /// The path must contain the area name as a segment; the prefix up to
    /// it selects the storage root and the next segment names the project.
    /// Descent consumes segments at each meaning's `from_disk` index, and
    /// extension-bearing segments are compared on their stem. Zero or
    /// several hits are normal outcomes.
    pub fn node_from_disk(&self, path: &str, area: &str) -> Result<Resolution> {
        let normalized = path.replace('\\', "/");
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let mark = segments.iter().position(|s| *s == area).ok_or_else(|| {
            TreeError::DiskMapping(format!("'{path}' carries no '{area}' area segment"))
        })?;
        let rel = &segments[mark + 1..];
        if rel.is_empty() {
            return Ok(Resolution::Many(Vec::new()));
        }

        let Some(project) = self.store().child_by_name(self.root()?.id, rel[0])? else {
            return Ok(Resolution::Many(Vec::new()));
        };
        let storage = self.storage_config_for(&project)?;
        match storage.locate(&normalized) {
            Some((found_area, _, _)) if found_area == area => {}
            _ => return Ok(Resolution::Many(Vec::new())),
        }
        let hierarchy = self.hierarchy_config_for(&project)?;

        let mut hits = Vec::new();
        let mut frontier = vec![project];
        let target = rel.len() - 1;
        while let Some(node) = frontier.pop() {
            let level = match hierarchy.depth(node.depth) {
                Some(level) => level,
                None => continue,
            };
            let Some(index) = level
                .from_disk
                .get(&node.meaning)
                .and_then(|areas| areas.get(area))
                .copied()
            else {
                continue;
            };
            if index == target {
                hits.push(node);
                continue;
            }
            if index > target {
                continue;
            }
            for child in self.children(&node)? {
                let Some(child_level) = hierarchy.depth(child.depth) else {
                    continue;
                };
                let Some(child_index) = child_level
                    .from_disk
                    .get(&child.meaning)
                    .and_then(|areas| areas.get(area))
                    .copied()
                else {
                    continue;
                };
                if child_index > target {
                    continue;
                }
                if segment_matches(&child.name, rel[child_index]) {
                    frontier.push(child);
                }
            }
        }

        if hits.len() == 1 {
            Ok(Resolution::One(hits.remove(0)))
        } else {
            Ok(Resolution::Many(hits))
        }
    }

    /// Rewrites a physical path onto another platform's root for the same
    /// storage area. Paths under no known root pass through unchanged.
    pub fn to_platform(&self, path: &str, platform: &str) -> Result<String> {
        let normalized = path.replace('\\', "/");
        let mut best: Option<(&str, &str, &str)> = None;
        for (_, storage) in self.configs().storages() {
            if let Some((area, found_platform, root)) = storage.locate(&normalized) {
                if best.map_or(true, |(_, _, r)| root.len() > r.len()) {
                    let target = storage.root(area, platform);
                    if let Some(target) = target {
                        best = Some((root, found_platform, target));
                    }
                }
            }
        }
        match best {
            Some((_, found_platform, _)) if found_platform == platform => Ok(normalized),
            Some((root, _, target)) => Ok(format!(
                "{}{}",
                target.trim_end_matches('/'),
                &normalized[root.trim_end_matches('/').len()..]
            )),
            None => Ok(normalized),
        }
    }
}

fn segment_matches(name: &str, segment: &str) -> bool {
    if name == segment {
        return true;
    }
    let stem = segment.split('.').next().unwrap_or(segment);
    stem != segment && name == stem
}
