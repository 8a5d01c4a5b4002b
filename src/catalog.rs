//! C1 — the in-memory plugin catalog and its JSON persistence.
//!
//! Grounded on `plugin-catalog.hpp`'s `PluginCatalogEntry`/`PluginCatalog`
//! for the shape, and on this codebase's own `create_dir_all` + `fs::write` +
//! `serde_json::to_string_pretty` save idiom used elsewhere for persistence.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// One of the four hosted plugin formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginFormatKind {
    Vst3,
    Au,
    Lv2,
    Clap,
}

impl PluginFormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vst3 => "VST3",
            Self::Au => "AU",
            Self::Lv2 => "LV2",
            Self::Clap => "CLAP",
        }
    }
}

impl std::fmt::Display for PluginFormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the catalog: a plugin the host knows about but has not
/// necessarily instantiated. Identity is `(format, plugin_id)`; never
/// mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub format: PluginFormatKind,
    #[serde(rename = "id")]
    pub plugin_id: String,
    #[serde(rename = "bundle", default, skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<PathBuf>,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "vendor", default)]
    pub vendor_name: String,
    #[serde(rename = "url", default)]
    pub product_url: String,
}

impl PluginDescriptor {
    pub fn key(&self) -> (PluginFormatKind, &str) {
        (self.format, self.plugin_id.as_str())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    plugins: Vec<PluginDescriptor>,
    #[serde(rename = "denyList", default)]
    deny_list: Vec<PluginDescriptor>,
}

/// Two disjoint ordered sequences: accepted plugins and a deny list.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    plugins: Vec<PluginDescriptor>,
    deny_list: Vec<PluginDescriptor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    pub fn get_deny_list(&self) -> &[PluginDescriptor] {
        &self.deny_list
    }

    pub fn contains(&self, format: PluginFormatKind, id: &str) -> bool {
        self.plugins
            .iter()
            .any(|p| p.format == format && p.plugin_id == id)
    }

    /// Inserts `entry` unless its `(format, id)` already exists, in which
    /// case the call is a silent no-op.
    pub fn add(&mut self, entry: PluginDescriptor) {
        if self.contains(entry.format, &entry.plugin_id) {
            log::debug!(
                "catalog: duplicate {}/{} ignored",
                entry.format,
                entry.plugin_id
            );
            return;
        }
        self.plugins.push(entry);
    }

    pub fn add_denied(&mut self, entry: PluginDescriptor) {
        self.deny_list.push(entry);
    }

    /// Moves every entry out of `other` into `self`, preserving `other`'s
    /// insertion order and dropping entries whose key already exists.
    pub fn merge(&mut self, mut other: Catalog) {
        for entry in other.plugins.drain(..) {
            self.add(entry);
        }
        self.deny_list.append(&mut other.deny_list);
    }

    pub fn clear(&mut self) {
        self.plugins.clear();
        self.deny_list.clear();
    }

    /// Loads a catalog from `path`. A missing file is not an error — it
    /// yields an empty catalog, matching scanning a fresh machine.
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let file: CatalogFile = serde_json::from_str(&text)?;
        Ok(Self {
            plugins: file.plugins,
            deny_list: file.deny_list,
        })
    }

    /// Saves atomically: ensures the parent directory exists, then writes
    /// the whole file in one call (replacing any existing file).
    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = CatalogFile {
            plugins: self.plugins.clone(),
            deny_list: self.deny_list.clone(),
        };
        let text = serde_json::to_string_pretty(&file)?;
        fs::write(path, text)?;
        log::info!("catalog: saved {} plugins to {}", self.plugins.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(format: PluginFormatKind, id: &str, name: &str) -> PluginDescriptor {
        PluginDescriptor {
            format,
            plugin_id: id.to_string(),
            bundle_path: None,
            display_name: name.to_string(),
            vendor_name: String::new(),
            product_url: String::new(),
        }
    }

    #[test]
    fn add_rejects_duplicate_key() {
        let mut cat = Catalog::new();
        cat.add(entry(PluginFormatKind::Vst3, "A", "Alpha"));
        cat.add(entry(PluginFormatKind::Vst3, "A", "Alpha Renamed"));
        assert_eq!(cat.get_plugins().len(), 1);
        assert_eq!(cat.get_plugins()[0].display_name, "Alpha");
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.json");

        let mut cat = Catalog::new();
        cat.add(entry(PluginFormatKind::Vst3, "A", "Alpha"));
        cat.add(entry(PluginFormatKind::Au, "B", "Beta"));
        cat.save(&path).unwrap();

        let loaded = Catalog::load(&path).unwrap();
        assert_eq!(loaded.get_plugins().len(), 2);
        assert!(loaded.contains(PluginFormatKind::Vst3, "A"));
        assert!(loaded.contains(PluginFormatKind::Au, "B"));
    }

    #[test]
    fn loading_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let cat = Catalog::load(&path).unwrap();
        assert!(cat.get_plugins().is_empty());
    }

    #[test]
    fn merge_preserves_order_and_drops_duplicates() {
        let mut a = Catalog::new();
        a.add(entry(PluginFormatKind::Clap, "A", "Alpha"));

        let mut b = Catalog::new();
        b.add(entry(PluginFormatKind::Clap, "A", "Alpha Duplicate"));
        b.add(entry(PluginFormatKind::Clap, "C", "Gamma"));

        a.merge(b);
        let ids: Vec<&str> = a.get_plugins().iter().map(|p| p.plugin_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
    }
}
