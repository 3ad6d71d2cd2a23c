// SPDX-License-Identifier: GPL-3.0-only

//! Declarative storage configuration
//!
//! The configuration is an already evaluated tree (JSON or TOML) with a
//! `storage` section describing devices and a `fileSystems` section assigning
//! formats and mountpoints to them. Devices refer to each other through
//! [`DeviceRef`]s (`"disk.sda"` or `{ type = "disk", name = "sda" }`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::{DiskLabelType, MatchCriteria, SizeExpression};

/// Device section a reference points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefKind {
    Disk,
    Partition,
    Volgroup,
    Logvol,
    Raid,
    Btrfs,
}

impl RefKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Partition => "partition",
            Self::Volgroup => "volgroup",
            Self::Logvol => "logvol",
            Self::Raid => "raid",
            Self::Btrfs => "btrfs",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Some(match kind {
            "disk" => Self::Disk,
            "partition" => Self::Partition,
            "volgroup" => Self::Volgroup,
            "logvol" => Self::Logvol,
            "raid" => Self::Raid,
            "btrfs" => Self::Btrfs,
            _ => return None,
        })
    }
}

/// Symbolic reference to a device declared in the `storage` section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceRef {
    pub kind: RefKind,
    pub name: String,
}

impl DeviceRef {
    pub fn new(kind: RefKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.as_str(), self.name)
    }
}

impl FromStr for DeviceRef {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, name) = value
            .split_once('.')
            .ok_or_else(|| format!("device reference '{value}' is not of the form kind.name"))?;
        let kind = RefKind::parse(kind)
            .ok_or_else(|| format!("device reference '{value}' has unknown kind '{kind}'"))?;
        if name.is_empty() {
            return Err(format!("device reference '{value}' has an empty name"));
        }
        Ok(Self::new(kind, name))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceRefRepr {
    Text(String),
    Map {
        #[serde(rename = "type")]
        kind: String,
        name: String,
    },
}

impl<'de> Deserialize<'de> for DeviceRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match DeviceRefRepr::deserialize(deserializer)? {
            DeviceRefRepr::Text(text) => text.parse().map_err(de::Error::custom),
            DeviceRefRepr::Map { kind, name } => {
                let kind = RefKind::parse(&kind).ok_or_else(|| {
                    de::Error::custom(format!("unknown device reference kind '{kind}'"))
                })?;
                Ok(Self::new(kind, name))
            }
        }
    }
}

impl Serialize for DeviceRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Encryption requested on a device; the device becomes a LUKS container
/// and its format moves to the cleartext mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptionEntry {
    pub passphrase: Option<String>,
    pub cipher: Option<String>,
    /// URL of an escrow certificate in the certificate registry.
    pub escrow_cert: Option<String>,
    pub backup_passphrase: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskEntry {
    #[serde(rename = "match")]
    pub match_criteria: MatchCriteria,
    /// Remove all partitions before use.
    pub clear: bool,
    /// Write a fresh disk label even when one exists.
    pub initlabel: bool,
    pub disklabel: Option<DiskLabelType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionEntry {
    pub target_device: DeviceRef,
    #[serde(default)]
    pub size: Option<SizeExpression>,
    #[serde(default)]
    pub max_size: Option<SizeExpression>,
    #[serde(default)]
    pub primary: bool,
    /// Existing device (kickstart-style spec) to reuse instead of creating a partition.
    #[serde(default)]
    pub on_part: Option<String>,
    /// Keep the existing format of an `onPart` device.
    #[serde(default)]
    pub no_format: bool,
    /// Resize an `onPart` device to `size`.
    #[serde(default)]
    pub resize: bool,
    #[serde(default)]
    pub encryption: Option<EncryptionEntry>,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeGroupEntry {
    pub devices: Vec<DeviceRef>,
    /// Physical extent size; a bare number is KiB.
    pub extent_size: Option<SizeExpression>,
    pub reserved_space: Option<SizeExpression>,
    pub reserved_percent: Option<u8>,
    pub use_existing: bool,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalVolumeEntry {
    pub volgroup: DeviceRef,
    #[serde(default)]
    pub size: Option<SizeExpression>,
    #[serde(default)]
    pub max_size: Option<SizeExpression>,
    #[serde(default)]
    pub percent: Option<i64>,
    #[serde(default)]
    pub grow: bool,
    /// Reuse the existing `<vg>-<name>` volume.
    #[serde(default)]
    pub use_existing: bool,
    #[serde(default)]
    pub no_format: bool,
    #[serde(default)]
    pub resize: bool,
    #[serde(default)]
    pub encryption: Option<EncryptionEntry>,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaidEntry {
    pub level: String,
    #[serde(default)]
    pub devices: Vec<DeviceRef>,
    #[serde(default)]
    pub spares: usize,
    #[serde(default)]
    pub use_existing: bool,
    #[serde(default)]
    pub no_format: bool,
    #[serde(default)]
    pub encryption: Option<EncryptionEntry>,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BtrfsEntry {
    pub devices: Vec<DeviceRef>,
    /// Data RAID level.
    pub data: Option<String>,
    /// Metadata RAID level.
    pub metadata: Option<String>,
    pub use_existing: bool,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemEntry {
    pub storage: DeviceRef,
    #[serde(default)]
    pub fs_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    /// mkfs usage profile.
    #[serde(default)]
    pub profile: Option<String>,
    /// UUID used to find the filesystem in mount-only mode.
    #[serde(default)]
    pub uuid: Option<String>,
}

impl FileSystemEntry {
    /// Comma-joined mount options, if any.
    pub fn mount_options(&self) -> Option<String> {
        (!self.options.is_empty()).then(|| self.options.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapEntry {
    pub storage: DeviceRef,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    pub disk: BTreeMap<String, DiskEntry>,
    pub partition: BTreeMap<String, PartitionEntry>,
    pub btrfs: BTreeMap<String, BtrfsEntry>,
    #[serde(default)]
    pub volgroup: BTreeMap<String, VolumeGroupEntry>,
    #[serde(default)]
    pub logvol: BTreeMap<String, LogicalVolumeEntry>,
    #[serde(default)]
    pub raid: BTreeMap<String, RaidEntry>,
}

impl StorageSection {
    /// Whether the section declares the referenced device.
    pub fn declares(&self, reference: &DeviceRef) -> bool {
        let name = reference.name.as_str();
        match reference.kind {
            RefKind::Disk => self.disk.contains_key(name),
            RefKind::Partition => self.partition.contains_key(name),
            RefKind::Volgroup => self.volgroup.contains_key(name),
            RefKind::Logvol => self.logvol.contains_key(name),
            RefKind::Raid => self.raid.contains_key(name),
            RefKind::Btrfs => self.btrfs.contains_key(name),
        }
    }

    /// UUID recorded on the referenced device declaration.
    pub fn uuid_of(&self, reference: &DeviceRef) -> Option<&str> {
        let name = reference.name.as_str();
        match reference.kind {
            RefKind::Disk => self.disk.get(name).and_then(|d| d.match_criteria.uuid.as_deref()),
            RefKind::Partition => self.partition.get(name).and_then(|p| p.uuid.as_deref()),
            RefKind::Volgroup => self.volgroup.get(name).and_then(|v| v.uuid.as_deref()),
            RefKind::Logvol => self.logvol.get(name).and_then(|l| l.uuid.as_deref()),
            RefKind::Raid => self.raid.get(name).and_then(|r| r.uuid.as_deref()),
            RefKind::Btrfs => self.btrfs.get(name).and_then(|b| b.uuid.as_deref()),
        }
    }

    /// Encryption requested on the referenced device.
    pub fn encryption_of(&self, reference: &DeviceRef) -> Option<&EncryptionEntry> {
        let name = reference.name.as_str();
        match reference.kind {
            RefKind::Partition => self.partition.get(name)?.encryption.as_ref(),
            RefKind::Logvol => self.logvol.get(name)?.encryption.as_ref(),
            RefKind::Raid => self.raid.get(name)?.encryption.as_ref(),
            _ => None,
        }
    }
}

/// Top-level declarative configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub storage: StorageSection,
    #[serde(rename = "fileSystems")]
    pub file_systems: BTreeMap<String, FileSystemEntry>,
    #[serde(rename = "swapDevices", default)]
    pub swap_devices: Vec<SwapEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_refs_accept_both_shapes() {
        let text: DeviceRef = serde_json::from_str("\"partition.root\"").unwrap();
        let map: DeviceRef = serde_json::from_str(r#"{"type": "partition", "name": "root"}"#).unwrap();
        assert_eq!(text, map);
        assert_eq!(text.to_string(), "partition.root");

        assert!(serde_json::from_str::<DeviceRef>("\"tape.t0\"").is_err());
        assert!(serde_json::from_str::<DeviceRef>("\"root\"").is_err());
    }

    #[test]
    fn parses_minimal_json_config() {
        let config: StorageConfig = serde_json::from_str(
            r#"{
                "storage": {
                    "disk": { "sda": {} },
                    "partition": { "root": { "targetDevice": "disk.sda", "size": "fill" } },
                    "btrfs": {}
                },
                "fileSystems": { "/": { "storage": "partition.root", "fsType": "ext4" } }
            }"#,
        )
        .unwrap();

        let root = &config.storage.partition["root"];
        assert_eq!(root.target_device, DeviceRef::new(RefKind::Disk, "sda"));
        assert!(root.size.as_ref().is_some_and(SizeExpression::is_fill));
        assert!(config.storage.volgroup.is_empty());
        assert!(config.swap_devices.is_empty());
        assert_eq!(config.file_systems["/"].fs_type.as_deref(), Some("ext4"));
    }

    #[test]
    fn parses_toml_config_with_composites() {
        let config: StorageConfig = toml::from_str(
            r#"
            [storage.disk.sda.match]
            physicalPos = 1

            [storage.partition.pv1]
            targetDevice = { type = "disk", name = "sda" }
            size = { gib = 20 }
            encryption = { passphrase = "secret" }

            [storage.volgroup.vg0]
            devices = ["partition.pv1"]

            [storage.logvol.home]
            volgroup = "volgroup.vg0"
            percent = 50

            [storage.btrfs]

            [fileSystems."/home"]
            storage = "logvol.home"
            fsType = "xfs"
            options = ["noatime", "nodev"]
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.disk["sda"].match_criteria.physical_pos, Some(1));
        let pv = DeviceRef::new(RefKind::Partition, "pv1");
        assert!(config.storage.declares(&pv));
        assert!(config.storage.encryption_of(&pv).is_some());
        assert_eq!(config.storage.logvol["home"].percent, Some(50));
        assert_eq!(
            config.file_systems["/home"].mount_options().as_deref(),
            Some("noatime,nodev")
        );
    }

    #[test]
    fn missing_required_sections_fail() {
        let result = serde_json::from_str::<StorageConfig>(
            r#"{ "storage": { "disk": {}, "partition": {} }, "fileSystems": {} }"#,
        );
        assert!(result.is_err());
    }
}
