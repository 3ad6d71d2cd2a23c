use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storage_sys::{Inventory, InventoryDevice};
use storage_types::DeviceKind;

use crate::errors::{Result, TestingError};

/// A named device tree to resolve against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "device")]
    pub devices: Vec<InventoryDevice>,
}

impl LabSpec {
    pub fn inventory(&self) -> Inventory {
        Inventory {
            devices: self.devices.clone(),
        }
    }
}

pub fn workspace_root() -> PathBuf {
    if let Ok(value) = std::env::var("STORAGE_TESTING_WORKSPACE_ROOT") {
        return PathBuf::from(value);
    }

    if let Ok(current_dir) = std::env::current_dir()
        && current_dir.join("resources/lab-specs").exists()
    {
        return current_dir;
    }

    let manifest_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    if manifest_root.join("resources/lab-specs").exists() {
        return manifest_root;
    }

    PathBuf::from(".")
}

pub fn specs_root() -> PathBuf {
    workspace_root().join("resources/lab-specs")
}

pub fn spec_path_for_name(spec_name: &str) -> PathBuf {
    specs_root().join(format!("{}.toml", spec_name))
}

/// Names of every lab spec, sorted.
pub fn spec_names() -> Result<Vec<String>> {
    let root = specs_root();
    let entries = fs::read_dir(&root).map_err(|error| TestingError::SpecInvalid {
        spec_name: root.display().to_string(),
        reason: error.to_string(),
    })?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            (path.extension()? == "toml")
                .then(|| path.file_stem()?.to_str().map(str::to_string))
                .flatten()
        })
        .collect();
    names.sort();
    Ok(names)
}

pub fn load_by_name(spec_name: &str) -> Result<LabSpec> {
    let path = spec_path_for_name(spec_name);
    if !path.exists() {
        return Err(TestingError::SpecNotFound {
            spec_name: spec_name.to_string(),
        });
    }

    let raw = fs::read_to_string(&path).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.to_string(),
        reason: error.to_string(),
    })?;

    let spec: LabSpec = toml::from_str(&raw).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.to_string(),
        reason: error.to_string(),
    })?;

    validate(&spec)?;
    Ok(spec)
}

pub fn validate(spec: &LabSpec) -> Result<()> {
    let invalid = |reason: &str| TestingError::SpecInvalid {
        spec_name: spec.name.clone(),
        reason: reason.to_string(),
    };

    if spec.name.is_empty() {
        return Err(TestingError::SpecInvalid {
            spec_name: "<unknown>".to_string(),
            reason: "name must not be empty".to_string(),
        });
    }

    if !spec.devices.iter().any(|device| device.kind == DeviceKind::Disk) {
        return Err(invalid("at least one disk is required"));
    }

    let mut seen = BTreeSet::new();
    for device in &spec.devices {
        if let Some(parent) = device.parents.iter().find(|parent| !seen.contains(*parent)) {
            return Err(invalid(&format!(
                "{} lists parent {parent} before it is declared",
                device.name
            )));
        }
        if !seen.insert(device.name.clone()) {
            return Err(invalid(&format!("{} is declared twice", device.name)));
        }
    }

    spec.inventory()
        .to_nodes()
        .map_err(|error| invalid(&error.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_spec_name_without_extension() {
        let spec = load_by_name("1disk").unwrap();
        assert_eq!(spec.name, "1disk");
    }

    #[test]
    fn parents_come_first() {
        let spec: LabSpec = toml::from_str(
            r#"
            name = "broken"

            [[device]]
            name = "sda1"
            kind = "partition"
            size = "1 GiB"
            parents = ["sda"]

            [[device]]
            name = "sda"
            kind = "disk"
            size = "20 GiB"
            "#,
        )
        .unwrap();
        assert!(matches!(
            validate(&spec),
            Err(TestingError::SpecInvalid { .. })
        ));
    }
}
