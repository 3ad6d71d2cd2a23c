// SPDX-License-Identifier: GPL-3.0-only

//! Device creation requests

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Bytes, DeviceId, DeviceKind, FormatSpec};

/// Software RAID level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RaidLevel {
    Linear,
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
}

impl RaidLevel {
    pub fn parse(level: &str) -> Option<Self> {
        let level = level.trim().to_ascii_lowercase();
        let level = level.strip_prefix("raid").unwrap_or(&level);
        Some(match level {
            "linear" => Self::Linear,
            "0" | "stripe" => Self::Raid0,
            "1" | "mirror" => Self::Raid1,
            "4" => Self::Raid4,
            "5" => Self::Raid5,
            "6" => Self::Raid6,
            "10" => Self::Raid10,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Raid0 => "raid0",
            Self::Raid1 => "raid1",
            Self::Raid4 => "raid4",
            Self::Raid5 => "raid5",
            Self::Raid6 => "raid6",
            Self::Raid10 => "raid10",
        }
    }

    /// Minimum number of active (non-spare) members.
    pub fn min_members(self) -> usize {
        match self {
            Self::Linear | Self::Raid0 | Self::Raid1 => 2,
            Self::Raid4 | Self::Raid5 => 3,
            Self::Raid6 | Self::Raid10 => 4,
        }
    }

    pub fn supports_spares(self) -> bool {
        !matches!(self, Self::Linear | Self::Raid0)
    }
}

impl fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for RaidLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown RAID level '{value}'"))
    }
}

impl From<RaidLevel> for String {
    fn from(level: RaidLevel) -> Self {
        level.as_str().to_string()
    }
}

/// Space held back from allocation in a volume group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VgReserve {
    Space(Bytes),
    Percent(u8),
}

/// Kind-specific creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DeviceLayout {
    Partition {
        primary: bool,
    },
    VolumeGroup {
        extent_size: Bytes,
        reserve: Option<VgReserve>,
    },
    LogicalVolume {
        /// Percentage of the volume group, in (0, 100].
        percent: Option<u8>,
    },
    MdArray {
        level: RaidLevel,
        member_devices: usize,
        total_devices: usize,
    },
    Btrfs {
        data_level: Option<String>,
        metadata_level: Option<String>,
        subvolume: bool,
    },
    Luks,
}

impl DeviceLayout {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Partition { .. } => DeviceKind::Partition,
            Self::VolumeGroup { .. } => DeviceKind::VolumeGroup,
            Self::LogicalVolume { .. } => DeviceKind::LogicalVolume,
            Self::MdArray { .. } => DeviceKind::MdArray,
            Self::Btrfs { .. } => DeviceKind::Btrfs,
            Self::Luks => DeviceKind::Luks,
        }
    }
}

/// Everything the engine needs to create a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRequest {
    /// Requested name; the engine assigns one when absent.
    pub name: Option<String>,
    pub alias: Option<String>,
    pub parents: Vec<DeviceId>,
    pub size: Option<Bytes>,
    pub grow: bool,
    pub max_size: Option<Bytes>,
    pub format: Option<FormatSpec>,
    pub layout: DeviceLayout,
}

impl DeviceRequest {
    pub fn new(layout: DeviceLayout, parents: Vec<DeviceId>) -> Self {
        Self {
            name: None,
            alias: None,
            parents,
            size: None,
            grow: false,
            max_size: None,
            format: None,
            layout,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    pub fn with_size(mut self, size: Option<Bytes>, grow: bool) -> Self {
        self.size = size;
        self.grow = grow;
        self
    }

    pub fn with_max_size(mut self, max_size: Option<Bytes>) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_format(mut self, format: Option<FormatSpec>) -> Self {
        self.format = format;
        self
    }

    pub fn kind(&self) -> DeviceKind {
        self.layout.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raid_level_aliases() {
        assert_eq!(RaidLevel::parse("RAID1"), Some(RaidLevel::Raid1));
        assert_eq!(RaidLevel::parse("1"), Some(RaidLevel::Raid1));
        assert_eq!(RaidLevel::parse("raid10"), Some(RaidLevel::Raid10));
        assert_eq!(RaidLevel::parse("raid7"), None);
    }

    #[test]
    fn member_minimums() {
        assert_eq!(RaidLevel::Raid5.min_members(), 3);
        assert!(!RaidLevel::Raid0.supports_spares());
    }
}
