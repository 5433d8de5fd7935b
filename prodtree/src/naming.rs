//! Name assembly and version sequencing.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Result, TreeError};

/// Fallback proposal when no sibling carries a version token and no
/// cascading default applies.
pub const DEFAULT_VERSION: &str = "v0001";

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[vV](\d+)").unwrap())
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\d+)\}").unwrap())
}

/// Last version token in `name`, e.g. "v0042" out of "sh0010_plt_v0042".
pub fn version_part(name: &str) -> Option<String> {
    version_re()
        .find_iter(name)
        .last()
        .map(|m| m.as_str().to_string())
}

fn version_number(name: &str) -> Option<(u64, usize)> {
    let caps = version_re().captures_iter(name).last()?;
    let digits = caps.get(1)?.as_str();
    Some((digits.parse().ok()?, digits.len()))
}

/// Proposes the next version name given the names of existing active
/// siblings. The result is max + 1, zero-padded to the widest padding
/// observed across all version tokens unless the number no longer fits.
pub fn next_version_name<'a>(
    sibling_names: impl IntoIterator<Item = &'a str>,
    default: &str,
) -> String {
    let mut highest: Option<u64> = None;
    let mut width = 0;
    for (number, digits) in sibling_names.into_iter().filter_map(version_number) {
        width = width.max(digits);
        highest = Some(highest.map_or(number, |h| h.max(number)));
    }
    match highest {
        Some(n) => {
            let next = n + 1;
            let needed = next.to_string().len();
            format!("v{:0width$}", next, width = width.max(needed))
        }
        None => default.to_string(),
    }
}

/// Formats `template` by substituting `{k}` with the ancestor name at
/// `indices[k]` within `chain`. The chain starts at the root sentinel
/// (index 0) and ends with the node being named.
pub fn assemble(template: &str, chain: &[String], indices: &[usize]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(template) {
        let whole = caps.get(0).unwrap();
        let slot: usize = caps[1].parse().map_err(|_| {
            TreeError::Naming(format!("bad placeholder in template '{template}'"))
        })?;
        let chain_index = *indices.get(slot).ok_or_else(|| {
            TreeError::Naming(format!(
                "template '{template}' references parameter {slot} but only {} are configured",
                indices.len()
            ))
        })?;
        let value = chain.get(chain_index).ok_or_else(|| {
            TreeError::Naming(format!(
                "name parameter points at ancestor {chain_index} but the chain has {} entries",
                chain.len()
            ))
        })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Formats `template` by substituting `{k}` with `values[k]`.
pub fn format_positional(template: &str, values: &[String]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(template) {
        let whole = caps.get(0).unwrap();
        let slot: usize = caps[1].parse().map_err(|_| {
            TreeError::Naming(format!("bad placeholder in template '{template}'"))
        })?;
        let value = values.get(slot).ok_or_else(|| {
            TreeError::Naming(format!(
                "template '{template}' references value {slot} but only {} were supplied",
                values.len()
            ))
        })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn version_part_takes_the_last_token() {
        assert_eq!(version_part("v0001_over_v0002").unwrap(), "v0002");
        assert_eq!(version_part("sh0010_plt_V07").unwrap(), "V07");
        assert_eq!(version_part("no_token_here"), None);
    }

    #[test]
    fn next_version_increments_the_highest_sibling() {
        let names = ["v0001", "v0003", "v0002"];
        assert_eq!(next_version_name(names, DEFAULT_VERSION), "v0004");
    }

    #[test]
    fn next_version_preserves_padding_until_it_overflows() {
        assert_eq!(next_version_name(["v08"], DEFAULT_VERSION), "v09");
        assert_eq!(next_version_name(["v99"], DEFAULT_VERSION), "v100");
    }

    #[test]
    fn next_version_pads_to_the_widest_sibling() {
        assert_eq!(next_version_name(["v0001", "v2"], DEFAULT_VERSION), "v0003");
        assert_eq!(next_version_name(["v2", "v0001"], DEFAULT_VERSION), "v0003");
    }

    #[test]
    fn next_version_falls_back_to_the_default() {
        assert_eq!(next_version_name(["notes", "ref"], "v0101"), "v0101");
        assert_eq!(next_version_name([], DEFAULT_VERSION), "v0001");
    }

    #[test]
    fn assemble_substitutes_chain_names() {
        let chain: Vec<String> = [".root", "prj", "sq01", "0010"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let name = assemble("{0}_{1}", &chain, &[2, 3]).unwrap();
        assert_eq!(name, "sq01_0010");
    }

    #[test]
    fn assemble_keeps_literal_text() {
        let chain: Vec<String> = vec!["root".into(), "prj".into()];
        assert_eq!(assemble("lib", &chain, &[]).unwrap(), "lib");
        assert_eq!(assemble("x_{0}_y", &chain, &[1]).unwrap(), "x_prj_y");
    }

    #[test]
    fn format_positional_substitutes_in_order() {
        let values: Vec<String> = vec!["sh0010".into(), "alice".into()];
        assert_eq!(
            format_positional("/{0}/{1}", &values).unwrap(),
            "/sh0010/alice"
        );
        assert!(format_positional("/{2}", &values).is_err());
    }

    #[test]
    fn assemble_rejects_out_of_range_parameters() {
        let chain: Vec<String> = vec!["root".into()];
        assert!(assemble("{0}", &chain, &[]).is_err());
        assert!(assemble("{0}", &chain, &[7]).is_err());
    }
}
