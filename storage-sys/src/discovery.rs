// SPDX-License-Identifier: GPL-3.0-only

//! Live device discovery through `lsblk --json`

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use storage_types::{Bytes, DeviceKind, Evaluated, FormatKind, SizeExpression, SizeUnit};
use tracing::{debug, warn};

use crate::cmd::run_command;
use crate::inventory::{Inventory, InventoryDevice};
use crate::{Result, SysError};

const LSBLK_COLUMNS: &str = "NAME,KNAME,PATH,TYPE,SIZE,FSTYPE,UUID,LABEL,PTTYPE,MOUNTPOINT,RM,RO";

const BY_ID_DIR: &str = "/dev/disk/by-id";

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

/// Older util-linux prints numbers and flags as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LsblkValue {
    Bool(bool),
    Number(u64),
    Text(String),
}

impl LsblkValue {
    fn as_bytes(&self) -> Option<Bytes> {
        match self {
            Self::Number(value) => Some(Bytes::from(*value)),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    fn as_flag(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Number(value) => *value != 0,
            Self::Text(text) => text.trim() == "1",
        }
    }
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<LsblkValue>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    pttype: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    rm: Option<LsblkValue>,
    #[serde(default)]
    ro: Option<LsblkValue>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// Probe the running system.
pub fn discover() -> Result<Inventory> {
    if which::which("lsblk").is_err() {
        return Err(SysError::ToolMissing("lsblk".to_string()));
    }

    let output = run_command("lsblk", &["--json", "--bytes", "--output", LSBLK_COLUMNS])?;
    let mut inventory = parse_lsblk(&output)?;
    attach_by_id_links(&mut inventory, Path::new(BY_ID_DIR));
    attach_sysfs_paths(&mut inventory);
    debug!("discovered {} block devices", inventory.devices.len());
    Ok(inventory)
}

/// Flatten `lsblk --json` output into an inventory, parents first.
pub fn parse_lsblk(output: &str) -> Result<Inventory> {
    let parsed: LsblkOutput = serde_json::from_str(output).map_err(|error| SysError::Parse {
        tool: "lsblk".to_string(),
        reason: error.to_string(),
    })?;

    let mut collector = Collector::default();
    for device in &parsed.blockdevices {
        collector.visit(device, None);
    }
    Ok(Inventory {
        devices: collector.devices,
    })
}

#[derive(Default)]
struct Collector {
    devices: Vec<InventoryDevice>,
    index: HashMap<String, usize>,
}

impl Collector {
    fn visit(&mut self, device: &LsblkDevice, parent: Option<&str>) {
        if let Some(&position) = self.index.get(&device.name) {
            // members of an array list the array once each
            if let Some(parent) = parent {
                self.add_parent(position, parent);
            }
            return;
        }

        let Some(kind) = device_kind(device) else {
            debug!("skipping {} of type {}", device.name, device.kind);
            return;
        };

        let size = device.size.as_ref().and_then(LsblkValue::as_bytes).unwrap_or(0);
        let mut entry = InventoryDevice::new(&device.name, kind, size);
        entry.paths = vec![device
            .path
            .clone()
            .unwrap_or_else(|| format!("/dev/{}", device.name))];
        entry.format = device_format(device);
        entry.uuid = device.uuid.clone();
        entry.label = device.label.clone();
        entry.mountpoint = device
            .mountpoint
            .clone()
            .filter(|mountpoint| mountpoint.starts_with('/'));
        entry.removable = device.rm.as_ref().is_some_and(LsblkValue::as_flag);
        entry.protected = device.ro.as_ref().is_some_and(LsblkValue::as_flag);
        entry.virtual_device = kind == DeviceKind::Loop
            || ["zram", "ram", "nbd"]
                .iter()
                .any(|prefix| device.name.starts_with(prefix));
        if kind == DeviceKind::Partition {
            entry.partition_number = partition_number(&device.name);
        }

        if let Some(parent) = parent {
            if kind == DeviceKind::LogicalVolume {
                match split_lvm_name(&device.name) {
                    Some((vg, _)) => {
                        let vg_parent = self.ensure_volume_group(&vg, parent);
                        entry.parents.push(vg_parent);
                    }
                    None => entry.parents.push(parent.to_string()),
                }
            } else {
                entry.parents.push(parent.to_string());
            }
        }

        self.index.insert(device.name.clone(), self.devices.len());
        self.devices.push(entry);

        for child in &device.children {
            self.visit(child, Some(&device.name));
        }
    }

    fn add_parent(&mut self, position: usize, parent: &str) {
        let entry = &mut self.devices[position];
        if !entry.parents.iter().any(|existing| existing == parent) {
            entry.parents.push(parent.to_string());
        }
    }

    /// Volume groups do not appear in `lsblk`; synthesise one per group name.
    fn ensure_volume_group(&mut self, vg: &str, pv: &str) -> String {
        let pv_size = self
            .index
            .get(pv)
            .map(|&position| size_bytes(&self.devices[position].size))
            .unwrap_or(0);

        match self.index.get(vg).copied() {
            Some(position) => {
                let entry = &mut self.devices[position];
                if !entry.parents.iter().any(|existing| existing == pv) {
                    entry.parents.push(pv.to_string());
                    let total = size_bytes(&entry.size) + pv_size;
                    entry.size = SizeExpression::scalar(total.to_string(), "B");
                }
            }
            None => {
                let mut entry = InventoryDevice::new(vg, DeviceKind::VolumeGroup, pv_size);
                entry.parents.push(pv.to_string());
                entry.paths = vec![format!("/dev/{vg}")];
                self.index.insert(vg.to_string(), self.devices.len());
                self.devices.push(entry);
            }
        }
        vg.to_string()
    }
}

fn size_bytes(size: &SizeExpression) -> Bytes {
    match size.evaluate(SizeUnit::B) {
        Ok(Evaluated::Bytes(bytes)) => bytes,
        _ => 0,
    }
}

fn device_kind(device: &LsblkDevice) -> Option<DeviceKind> {
    Some(match device.kind.as_str() {
        "disk" => DeviceKind::Disk,
        "part" => DeviceKind::Partition,
        "lvm" => DeviceKind::LogicalVolume,
        "crypt" => DeviceKind::Luks,
        "mpath" => DeviceKind::Multipath,
        "loop" => DeviceKind::Loop,
        kind if kind.starts_with("raid") || kind == "linear" => DeviceKind::MdArray,
        _ => return None,
    })
}

fn device_format(device: &LsblkDevice) -> Option<FormatKind> {
    if let Some(fstype) = device.fstype.as_deref() {
        let kind = FormatKind::parse(fstype);
        if kind.is_none() {
            debug!("{}: unrecognised format {fstype}", device.name);
        }
        return kind;
    }
    if device.kind == "part" {
        return None;
    }
    device.pttype.as_deref().and_then(FormatKind::parse)
}

fn partition_number(name: &str) -> Option<u32> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    name[name.len() - digits..].parse().ok()
}

/// Split a device-mapper LV name (`vg--data-root`) into VG and LV names.
fn split_lvm_name(name: &str) -> Option<(String, String)> {
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'-' {
            if bytes.get(i + 1) == Some(&b'-') {
                i += 2;
                continue;
            }
            let vg = name[..i].replace("--", "-");
            let lv = name[i + 1..].replace("--", "-");
            return (!vg.is_empty() && !lv.is_empty()).then_some((vg, lv));
        }
        i += 1;
    }
    None
}

fn attach_by_id_links(inventory: &mut Inventory, dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            warn!("cannot read {}: {error}", dir.display());
            return;
        }
    };

    let mut links: HashMap<String, Vec<String>> = HashMap::new();
    for entry in entries.flatten() {
        let link = entry.path();
        if let Ok(target) = std::fs::canonicalize(&link) {
            links
                .entry(target.to_string_lossy().to_string())
                .or_default()
                .push(link.to_string_lossy().to_string());
        }
    }

    for device in &mut inventory.devices {
        let Some(canonical) = device.paths.first().cloned() else {
            continue;
        };
        if let Some(found) = links.get_mut(&canonical) {
            found.sort();
            device.paths.extend(found.iter().cloned());
        }
    }
}

fn attach_sysfs_paths(inventory: &mut Inventory) {
    for device in &mut inventory.devices {
        let Some(kernel_name) = device
            .paths
            .first()
            .and_then(|path| std::fs::canonicalize(path).ok())
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().to_string()))
        else {
            continue;
        };
        let class_path = Path::new("/sys/class/block").join(&kernel_name);
        if let Ok(resolved) = std::fs::canonicalize(class_path) {
            let resolved = resolved.to_string_lossy().to_string();
            device.sysfs_path = Some(
                resolved
                    .strip_prefix("/sys")
                    .unwrap_or(&resolved)
                    .to_string(),
            );
        }
    }
}
