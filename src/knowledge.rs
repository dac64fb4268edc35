//! Assembles the knowledge context injected into CHARON's prompt: the
//! chain of location records from system root down to where the instance
//! lives, plus lore text pulled from the Obsidian vault and filtered to
//! the sections players are allowed to hear about.

use crate::locations::{LocationProvider, LocationRecord, LoreConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

const DESCRIPTION_LIMIT: usize = 200;

/// One link in the location chain, tagged with the path prefix it was
/// loaded from.
#[derive(Clone, Debug)]
pub struct LocationEntry {
    pub path: String,
    pub record: LocationRecord,
}

/// Identity block for a specific CHARON installation, from
/// `<location>/charon/instance.yaml`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub clearance_level: Option<String>,
}

/// Everything a CHARON instance is allowed to know, pre-serialization.
#[derive(Debug, Default)]
pub struct Knowledge {
    pub instance: Option<InstanceConfig>,
    pub chain: Vec<LocationEntry>,
    pub lore: String,
}

pub struct KnowledgeLoader {
    provider: LocationProvider,
    vault: Option<PathBuf>,
    location_path: String,
}

impl KnowledgeLoader {
    pub fn new(
        provider: LocationProvider,
        vault: Option<PathBuf>,
        location_path: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            vault,
            location_path: location_path.into(),
        }
    }

    /// Loads the full knowledge set for this location. Every part is
    /// optional; a missing file contributes nothing rather than failing
    /// the call.
    pub fn load_knowledge(&self) -> Knowledge {
        let chain = self.load_location_chain();
        let lore = chain
            .last()
            .filter(|entry| entry.path == self.location_path)
            .and_then(|entry| entry.record.lore.as_ref())
            .map(|config| self.load_lore(config))
            .unwrap_or_default();
        Knowledge {
            instance: self.load_instance_config(),
            chain,
            lore,
        }
    }

    /// One record per path prefix, root to leaf. Prefixes without a
    /// backing record are skipped, so a partially-described hierarchy
    /// still yields what it can.
    pub fn load_location_chain(&self) -> Vec<LocationEntry> {
        let mut chain = Vec::new();
        let parts: Vec<&str> = self
            .location_path
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();
        for i in 1..=parts.len() {
            let prefix = parts[..i].join("/");
            if let Some(record) = self.provider.location_record(&prefix) {
                chain.push(LocationEntry {
                    path: prefix,
                    record,
                });
            }
        }
        chain
    }

    /// Reads the lore note and filters it down to what CHARON may know.
    /// A missing note yields a sentinel string so the GM can spot the
    /// broken reference in the assembled context.
    pub fn load_lore(&self, config: &LoreConfig) -> String {
        let Some(vault) = &self.vault else {
            return String::new();
        };
        if config.note.is_empty() {
            return String::new();
        }
        let note_path = vault.join(&config.note);
        let content = match fs::read_to_string(&note_path) {
            Ok(text) => text,
            Err(_) => return format!("[LORE FILE NOT FOUND: {}]", config.note),
        };

        let deny = compile_patterns(&config.exclude_patterns);
        let filtered = filter_sections(&content, &config.charon_sections, &deny);
        strip_wiki_links(&filtered).trim().to_string()
    }

    fn load_instance_config(&self) -> Option<InstanceConfig> {
        let path = self.provider.instance_config_path(&self.location_path);
        let text = fs::read_to_string(&path).ok()?;
        match serde_yaml::from_str(&text) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("unparsable instance config {:?}: {}", path, e);
                None
            }
        }
    }

    /// Serializes identity, location hierarchy, and lore into the single
    /// prompt block. Blocks with no underlying data are omitted.
    pub fn build_context_string(&self) -> String {
        let knowledge = self.load_knowledge();
        render_context(&knowledge)
    }
}

pub fn render_context(knowledge: &Knowledge) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(instance) = &knowledge.instance {
        sections.push("[SYSTEM IDENTITY]".to_string());
        sections.push(format!(
            "Instance ID: {}",
            instance.instance_id.as_deref().unwrap_or("UNKNOWN")
        ));
        sections.push(format!(
            "Clearance Level: {}",
            instance.clearance_level.as_deref().unwrap_or("PUBLIC")
        ));
        sections.push(String::new());
    }

    if !knowledge.chain.is_empty() {
        sections.push("[LOCATION HIERARCHY]".to_string());
        for entry in &knowledge.chain {
            let record = &entry.record;
            let kind = if record.kind.is_empty() {
                "unknown".to_string()
            } else {
                record.kind.clone()
            };
            let name = if record.name.is_empty() {
                "Unknown"
            } else {
                record.name.as_str()
            };
            sections.push(format!("- {}: {}", kind.to_uppercase(), name));
            if let Some(status) = &record.status {
                sections.push(format!("  Status: {}", status));
            }
            if let Some(description) = &record.description {
                sections.push(format!("  Info: {}", truncate(description, DESCRIPTION_LIMIT)));
            }
        }
        sections.push(String::new());
    }

    if !knowledge.lore.is_empty() {
        sections.push("[DATABANK RECORDS]".to_string());
        sections.push(knowledge.lore.clone());
        sections.push(String::new());
    }

    sections.join("\n")
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("skipping invalid exclude pattern {:?}: {}", p, e);
                None
            }
        })
        .collect()
}

fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.bytes().take_while(|&b| b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        None
    } else {
        Some((level, title))
    }
}

/// Single top-to-bottom scan over markdown lines.
///
/// Deny patterns are checked first on every heading and always win,
/// closing any allowed section in progress. With a non-empty allow-list a
/// line is kept only inside an allowed section (case-insensitive
/// substring or prefix match on the heading); with an empty allow-list
/// everything outside a denied section is kept. A section extends until
/// the next heading at the same or a shallower level.
fn filter_sections(content: &str, allow: &[String], deny: &[Regex]) -> String {
    let restrict = !allow.is_empty();
    let mut result: Vec<&str> = Vec::new();
    // Level of the section currently being kept (allow mode) or denied
    // (deny-only mode).
    let mut allowed_level: Option<usize> = None;
    let mut denied_level: Option<usize> = None;

    for line in content.lines() {
        let Some((level, title)) = parse_heading(line) else {
            let keep = if restrict {
                allowed_level.is_some()
            } else {
                denied_level.is_none()
            };
            if keep {
                result.push(line);
            }
            continue;
        };

        if deny.iter().any(|re| re.is_match(title)) {
            allowed_level = None;
            denied_level = Some(level);
            continue;
        }

        if restrict {
            let lowered = title.to_lowercase();
            let matches_allow = allow.iter().any(|a| {
                let a = a.to_lowercase();
                lowered.starts_with(&a) || lowered.contains(&a)
            });
            if matches_allow {
                allowed_level = Some(level);
                result.push(line);
            } else if allowed_level.map_or(false, |l| level > l) {
                // Subsection of an allowed section.
                result.push(line);
            } else {
                allowed_level = None;
            }
        } else {
            match denied_level {
                Some(l) if level > l => {}
                _ => {
                    denied_level = None;
                    result.push(line);
                }
            }
        }
    }

    result.join("\n")
}

/// Rewrites Obsidian wiki-links to their display text:
/// `[[Target|Display]]` -> `Display`, `[[Target]]` -> `Target`.
fn strip_wiki_links(content: &str) -> String {
    let piped = Regex::new(r"\[\[([^\]|]+)\|([^\]]+)\]\]").unwrap();
    let plain = Regex::new(r"\[\[([^\]]+)\]\]").unwrap();
    let content = piped.replace_all(content, "$2");
    plain.replace_all(&content, "$1").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locations::default_exclude_patterns;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_location(root: &Path, rel: &str, yaml: &str) {
        let dir = root.join("galaxy").join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("location.yaml"), yaml).unwrap();
    }

    fn loader(root: &Path, vault: Option<PathBuf>, path: &str) -> KnowledgeLoader {
        KnowledgeLoader::new(LocationProvider::new(root), vault, path)
    }

    #[test]
    fn test_location_chain_root_to_leaf() {
        let tmp = TempDir::new().unwrap();
        write_location(tmp.path(), "sol", "type: system\nname: Sol\n");
        write_location(tmp.path(), "sol/earth", "type: planet\nname: Earth\n");
        write_location(
            tmp.path(),
            "sol/earth/base-alpha",
            "type: base\nname: Base Alpha\n",
        );

        let chain = loader(tmp.path(), None, "sol/earth/base-alpha").load_location_chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].path, "sol");
        assert_eq!(chain[1].path, "sol/earth");
        assert_eq!(chain[2].path, "sol/earth/base-alpha");
        assert_eq!(chain[2].record.name, "Base Alpha");
    }

    #[test]
    fn test_location_chain_skips_missing_records() {
        let tmp = TempDir::new().unwrap();
        write_location(tmp.path(), "sol", "type: system\nname: Sol\n");
        write_location(
            tmp.path(),
            "sol/earth/base-alpha",
            "type: base\nname: Base Alpha\n",
        );
        // sol/earth has no location.yaml
        let chain = loader(tmp.path(), None, "sol/earth/base-alpha").load_location_chain();
        let paths: Vec<&str> = chain.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["sol", "sol/earth/base-alpha"]);
    }

    #[test]
    fn test_allow_list_keeps_only_allowed_section() {
        let doc = "# Overview\npublic intro\n# GM Notes\nhidden\n# History\nold news\n";
        let deny = compile_patterns(&default_exclude_patterns());
        let out = filter_sections(doc, &["Overview".to_string()], &deny);
        assert!(out.contains("public intro"));
        assert!(!out.contains("hidden"));
        assert!(!out.contains("old news"));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let doc = "# GM Notes\nhidden\n# Overview\npublic\n";
        let deny = compile_patterns(&default_exclude_patterns());
        let out = filter_sections(doc, &["GM Notes".to_string(), "Overview".to_string()], &deny);
        assert!(!out.contains("hidden"));
        assert!(out.contains("public"));
    }

    #[test]
    fn test_denied_heading_exits_allowed_section() {
        let doc = "# Overview\nintro\n## Secrets\nclassified\n## Layout\nrooms\n";
        let deny = compile_patterns(&default_exclude_patterns());
        let out = filter_sections(doc, &["Overview".to_string()], &deny);
        assert!(out.contains("intro"));
        assert!(!out.contains("classified"));
        // "Layout" is not itself allowed and the denied heading closed the
        // Overview section.
        assert!(!out.contains("rooms"));
    }

    #[test]
    fn test_allowed_section_includes_subsections() {
        let doc = "# Overview\nintro\n## Docking\nbay doors\n# Other\nskip me\n";
        let deny = compile_patterns(&default_exclude_patterns());
        let out = filter_sections(doc, &["Overview".to_string()], &deny);
        assert!(out.contains("intro"));
        assert!(out.contains("bay doors"));
        assert!(!out.contains("skip me"));
    }

    #[test]
    fn test_deny_only_mode_skips_nested_content() {
        let doc = "# Public\nvisible\n# Secrets\nhidden\n## Deeper\nalso hidden\n# After\nback\n";
        let deny = compile_patterns(&default_exclude_patterns());
        let out = filter_sections(doc, &[], &deny);
        assert!(out.contains("visible"));
        assert!(!out.contains("hidden"));
        assert!(!out.contains("also hidden"));
        assert!(out.contains("back"));
    }

    #[test]
    fn test_wiki_link_rewrite() {
        assert_eq!(
            strip_wiki_links("see [[Planet Prime|the colony]] for details"),
            "see the colony for details"
        );
        assert_eq!(strip_wiki_links("[[Planet Prime]]"), "Planet Prime");
    }

    #[test]
    fn test_missing_note_yields_sentinel() {
        let tmp = TempDir::new().unwrap();
        let vault = TempDir::new().unwrap();
        let loader = loader(tmp.path(), Some(vault.path().to_path_buf()), "sol");
        let config = LoreConfig {
            note: "lore/ghost.md".to_string(),
            charon_sections: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
        };
        assert_eq!(
            loader.load_lore(&config),
            "[LORE FILE NOT FOUND: lore/ghost.md]"
        );
    }

    #[test]
    fn test_no_vault_disables_lore() {
        let tmp = TempDir::new().unwrap();
        let loader = loader(tmp.path(), None, "sol");
        let config = LoreConfig {
            note: "lore/station.md".to_string(),
            charon_sections: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
        };
        assert_eq!(loader.load_lore(&config), "");
    }

    #[test]
    fn test_context_string_blocks_and_truncation() {
        let tmp = TempDir::new().unwrap();
        let long_desc = "x".repeat(250);
        write_location(
            tmp.path(),
            "sol",
            &format!(
                "type: system\nname: Sol\nstatus: STABLE\ndescription: {}\n",
                long_desc
            ),
        );
        let instance_dir = tmp.path().join("galaxy/sol/charon");
        fs::create_dir_all(&instance_dir).unwrap();
        fs::write(
            instance_dir.join("instance.yaml"),
            "instance_id: CHARON-7\nclearance_level: CREW\n",
        )
        .unwrap();

        let context = loader(tmp.path(), None, "sol").build_context_string();
        assert!(context.contains("[SYSTEM IDENTITY]"));
        assert!(context.contains("Instance ID: CHARON-7"));
        assert!(context.contains("[LOCATION HIERARCHY]"));
        assert!(context.contains("- SYSTEM: Sol"));
        assert!(context.contains("Status: STABLE"));
        let truncated = format!("{}...", "x".repeat(200));
        assert!(context.contains(&truncated));
        assert!(!context.contains(&"x".repeat(201)));
        // No lore configured, so no databank block.
        assert!(!context.contains("[DATABANK RECORDS]"));
    }

    #[test]
    fn test_full_lore_pipeline() {
        let tmp = TempDir::new().unwrap();
        let vault = TempDir::new().unwrap();
        fs::create_dir_all(vault.path().join("lore")).unwrap();
        fs::write(
            vault.path().join("lore/station.md"),
            "# Overview\nBuilt around [[Anchor Point|the anchor]].\n# GM Notes\nplot twist\n",
        )
        .unwrap();
        write_location(
            tmp.path(),
            "sol",
            "type: station\nname: Veil\nlore:\n  note: lore/station.md\n  charon_sections:\n    - Overview\n",
        );

        let context = loader(tmp.path(), Some(vault.path().to_path_buf()), "sol")
            .build_context_string();
        assert!(context.contains("[DATABANK RECORDS]"));
        assert!(context.contains("Built around the anchor."));
        assert!(!context.contains("plot twist"));
    }
}
