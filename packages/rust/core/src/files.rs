//! Persisted pipeline documents: inventory and mapping files.
//!
//! Both are pretty-printed JSON under the configured data directory, one
//! pair per collection, so a run can be inspected and diffed between stages.

use std::path::{Path, PathBuf};

use tagrail_shared::{Inventory, Result, TagMapping, TagrailError};

/// `<data_dir>/<collection>-tag-inventory.json`
pub fn inventory_path(data_dir: &Path, collection: &str) -> PathBuf {
    data_dir.join(format!("{collection}-tag-inventory.json"))
}

/// `<data_dir>/<collection>-tag-mapping.json`
pub fn mapping_path(data_dir: &Path, collection: &str) -> PathBuf {
    data_dir.join(format!("{collection}-tag-mapping.json"))
}

pub fn save_inventory(data_dir: &Path, inventory: &Inventory) -> Result<PathBuf> {
    let path = inventory_path(data_dir, &inventory.collection);
    write_json(&path, inventory)?;
    Ok(path)
}

/// Load a previously extracted inventory, with a pointed error when the
/// extract stage has not run yet.
pub fn load_inventory(data_dir: &Path, collection: &str) -> Result<Inventory> {
    let path = inventory_path(data_dir, collection);
    if !path.exists() {
        return Err(TagrailError::validation(format!(
            "no inventory at {} — run 'extract' first",
            path.display()
        )));
    }
    read_json(&path)
}

pub fn save_mapping(data_dir: &Path, mapping: &TagMapping) -> Result<PathBuf> {
    let path = mapping_path(data_dir, &mapping.meta.collection);
    write_json(&path, mapping)?;
    Ok(path)
}

pub fn load_mapping(data_dir: &Path, collection: &str) -> Result<TagMapping> {
    let path = mapping_path(data_dir, collection);
    if !path.exists() {
        return Err(TagrailError::validation(format!(
            "no mapping at {} — run 'normalize' first",
            path.display()
        )));
    }
    read_json(&path)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TagrailError::io(parent, e))?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| TagrailError::parse(format!("serialize {}: {e}", path.display())))?;
    std::fs::write(path, content).map_err(|e| TagrailError::io(path, e))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| TagrailError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| TagrailError::parse(format!("{}: {e}", path.display())))
}
