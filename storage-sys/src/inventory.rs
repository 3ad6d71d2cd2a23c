// SPDX-License-Identifier: GPL-3.0-only

//! Device inventories
//!
//! An inventory is a flat list of devices, parents first, describing a
//! system's block devices. It seeds the simulated working tree either from a
//! TOML/JSON file or from live discovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storage_types::{
    Bytes, DeviceId, DeviceKind, DeviceNode, Evaluated, FormatKind, FormatSpec, FormatState,
    SizeExpression, SizeUnit,
};

use crate::{Result, SysError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryDevice {
    pub name: String,
    pub kind: DeviceKind,
    /// Bare numbers are bytes.
    pub size: SizeExpression,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub format: Option<FormatKind>,
    /// Format (filesystem) UUID.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Device UUID (md arrays, volume groups).
    #[serde(default)]
    pub device_uuid: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub mount_options: Option<String>,
    /// Smallest size the format can shrink to.
    #[serde(default)]
    pub min_size: Option<SizeExpression>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub sysfs_path: Option<String>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default)]
    pub removable: bool,
    #[serde(default, rename = "virtual")]
    pub virtual_device: bool,
    #[serde(default)]
    pub partition_number: Option<u32>,
    #[serde(default)]
    pub start: Option<SizeExpression>,
}

impl InventoryDevice {
    pub fn new(name: &str, kind: DeviceKind, size: Bytes) -> Self {
        Self {
            name: name.to_string(),
            kind,
            size: SizeExpression::scalar(size.to_string(), "B"),
            parents: Vec::new(),
            format: None,
            uuid: None,
            device_uuid: None,
            label: None,
            mountpoint: None,
            mount_options: None,
            min_size: None,
            paths: Vec::new(),
            sysfs_path: None,
            protected: false,
            hidden: false,
            incomplete: false,
            removable: false,
            virtual_device: false,
            partition_number: None,
            start: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default, rename = "device")]
    pub devices: Vec<InventoryDevice>,
}

impl Inventory {
    /// Load from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let invalid = |reason: String| SysError::Inventory {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| invalid(e.to_string()))
        }
    }

    /// Build working tree nodes; parents must be listed before their children.
    pub fn to_nodes(&self) -> Result<Vec<DeviceNode>> {
        let invalid = |reason: String| SysError::Inventory {
            path: PathBuf::from("<inventory>"),
            reason,
        };
        let bytes = |name: &str, expr: &SizeExpression| -> Result<Bytes> {
            match expr.evaluate(SizeUnit::B) {
                Ok(Evaluated::Bytes(bytes)) => Ok(bytes),
                Ok(Evaluated::Fill) => Err(invalid(format!("{name}: size cannot be 'fill'"))),
                Err(error) => Err(invalid(format!("{name}: {error}"))),
            }
        };

        let mut ids: HashMap<&str, DeviceId> = HashMap::new();
        let mut nodes = Vec::with_capacity(self.devices.len());

        for (index, entry) in self.devices.iter().enumerate() {
            if ids.contains_key(entry.name.as_str()) {
                return Err(invalid(format!("device {} listed twice", entry.name)));
            }
            let id = DeviceId(index as u32);

            let mut node = DeviceNode::new(id, entry.name.clone(), entry.kind);
            node.size = bytes(&entry.name, &entry.size)?;
            node.parents = entry
                .parents
                .iter()
                .map(|parent| {
                    ids.get(parent.as_str()).copied().ok_or_else(|| {
                        invalid(format!("{}: unknown parent {parent}", entry.name))
                    })
                })
                .collect::<Result<_>>()?;
            node.uuid = entry.device_uuid.clone();
            node.paths = if entry.paths.is_empty() {
                vec![format!("/dev/{}", entry.name)]
            } else {
                entry.paths.clone()
            };
            node.sysfs_path = entry.sysfs_path.clone();
            node.protected = entry.protected;
            node.hidden = entry.hidden;
            node.incomplete = entry.incomplete;
            node.removable = entry.removable;
            node.virtual_device = entry.virtual_device || entry.kind == DeviceKind::Loop;
            node.partition_number = entry.partition_number;
            node.start = entry
                .start
                .as_ref()
                .map(|start| bytes(&entry.name, start))
                .transpose()?;

            if let Some(kind) = entry.format {
                let spec = FormatSpec::new(kind)
                    .with_mountpoint(entry.mountpoint.clone())
                    .with_label(entry.label.clone())
                    .with_mount_options(entry.mount_options.clone());
                node.format = Some(FormatState {
                    spec,
                    exists: true,
                    uuid: entry.uuid.clone(),
                    min_size: entry
                        .min_size
                        .as_ref()
                        .map(|min| bytes(&entry.name, min))
                        .transpose()?,
                });
            }

            ids.insert(entry.name.as_str(), id);
            nodes.push(node);
        }

        Ok(nodes)
    }
}
