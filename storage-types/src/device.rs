// SPDX-License-Identifier: GPL-3.0-only

//! Working device tree nodes
//!
//! A `DeviceNode` is one entry in the storage engine's working tree: either a
//! device that already exists on the system or one requested during the
//! current resolver pass. Nodes reference their parents by `DeviceId`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Bytes, DeviceLayout, FormatKind, FormatState};

/// Handle of a device in the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Disk,
    Partition,
    VolumeGroup,
    LogicalVolume,
    MdArray,
    Btrfs,
    Luks,
    Multipath,
    Loop,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Partition => "partition",
            Self::VolumeGroup => "volume group",
            Self::LogicalVolume => "logical volume",
            Self::MdArray => "md array",
            Self::Btrfs => "btrfs volume",
            Self::Luks => "luks device",
            Self::Multipath => "multipath device",
            Self::Loop => "loop device",
        }
    }

    /// Whether partitions may be created directly on this kind of device.
    pub fn is_partitionable(self) -> bool {
        matches!(self, Self::Disk | Self::Multipath | Self::MdArray)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device in the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNode {
    pub id: DeviceId,

    /// Kernel / device-mapper name (e.g. "sda1", "vg0-root", "luks0").
    pub name: String,

    /// Symbolic request name (e.g. "raid.01", "pv.01") used by later references.
    pub alias: Option<String>,

    pub kind: DeviceKind,

    /// Current (or requested) size in bytes; 0 for pending grow requests.
    pub size: Bytes,

    /// Pending request grows into remaining space.
    pub grow: bool,

    pub max_size: Option<Bytes>,

    pub parents: Vec<DeviceId>,

    pub format: Option<FormatState>,

    /// Whether the device already exists on the system.
    pub exists: bool,

    pub uuid: Option<String>,

    /// Device node paths; the first entry is canonical, the rest are symlinks
    /// such as `/dev/disk/by-id/...`.
    pub paths: Vec<String>,

    pub sysfs_path: Option<String>,

    /// Protected devices (e.g. installation media) are never cleared.
    pub protected: bool,

    /// Ignored devices are invisible to lookups.
    pub hidden: bool,

    /// Composite device missing some of its members.
    pub incomplete: bool,

    pub removable: bool,

    /// Virtual block device (loop, ram, zram, ...).
    pub virtual_device: bool,

    /// Partition number on the parent disk.
    pub partition_number: Option<u32>,

    /// Byte offset of a partition on its disk.
    pub start: Option<Bytes>,

    /// Creation parameters of devices requested in this pass.
    pub layout: Option<DeviceLayout>,
}

impl DeviceNode {
    pub fn new(id: DeviceId, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id,
            name: name.into(),
            alias: None,
            kind,
            size: 0,
            grow: false,
            max_size: None,
            parents: Vec::new(),
            format: None,
            exists: true,
            uuid: None,
            paths: Vec::new(),
            sysfs_path: None,
            protected: false,
            hidden: false,
            incomplete: false,
            removable: false,
            virtual_device: false,
            partition_number: None,
            start: None,
            layout: None,
        }
    }

    /// Canonical device node path.
    pub fn path(&self) -> String {
        self.paths
            .first()
            .cloned()
            .unwrap_or_else(|| format!("/dev/{}", self.name))
    }

    pub fn format_kind(&self) -> Option<FormatKind> {
        self.format.as_ref().map(|format| format.spec.kind)
    }

    pub fn mountpoint(&self) -> Option<&str> {
        self.format
            .as_ref()
            .and_then(|format| format.spec.mountpoint.as_deref())
    }

    pub fn format_uuid(&self) -> Option<&str> {
        self.format.as_ref().and_then(|format| format.uuid.as_deref())
    }

    pub fn format_label(&self) -> Option<&str> {
        self.format
            .as_ref()
            .and_then(|format| format.spec.label.as_deref())
    }

    /// Whether the device carries a partition table.
    pub fn is_partitioned(&self) -> bool {
        matches!(self.format_kind(), Some(FormatKind::DiskLabel(_)))
    }

    /// Physical disk as counted by kernel enumeration position.
    pub fn is_physical_disk(&self) -> bool {
        self.kind == DeviceKind::Disk && !self.virtual_device
    }

    /// Whether `name` refers to this device, by kernel name or symbolic alias.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.alias.as_deref() == Some(name)
    }
}
