// SPDX-License-Identifier: GPL-3.0-only

//! Disk match criteria

use serde::{Deserialize, Serialize};

/// How a declared disk is located in the working tree.
///
/// Several criteria may be present; only the highest-priority one is used
/// (`id > label > name > path > sysfsPath > uuid > script > physicalPos`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchCriteria {
    /// Name under `/dev/disk/by-id/`.
    pub id: Option<String>,
    pub label: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub sysfs_path: Option<String>,
    pub uuid: Option<String>,
    /// Probe program that prints the device path on its first output line.
    pub script: Option<String>,
    /// 1-indexed position among physical disks in kernel enumeration order.
    pub physical_pos: Option<u32>,
    pub allow_incomplete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy<'a> {
    Id(&'a str),
    Label(&'a str),
    Name(&'a str),
    Path(&'a str),
    SysfsPath(&'a str),
    Uuid(&'a str),
    Script(&'a str),
    PhysicalPos(u32),
}

impl MatchCriteria {
    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// The single strategy to use, falling back to a name lookup of `symbolic_name`.
    pub fn strategy<'a>(&'a self, symbolic_name: &'a str) -> MatchStrategy<'a> {
        if let Some(id) = &self.id {
            MatchStrategy::Id(id)
        } else if let Some(label) = &self.label {
            MatchStrategy::Label(label)
        } else if let Some(name) = &self.name {
            MatchStrategy::Name(name)
        } else if let Some(path) = &self.path {
            MatchStrategy::Path(path)
        } else if let Some(sysfs_path) = &self.sysfs_path {
            MatchStrategy::SysfsPath(sysfs_path)
        } else if let Some(uuid) = &self.uuid {
            MatchStrategy::Uuid(uuid)
        } else if let Some(script) = &self.script {
            MatchStrategy::Script(script)
        } else if let Some(position) = self.physical_pos {
            MatchStrategy::PhysicalPos(position)
        } else {
            MatchStrategy::Name(symbolic_name)
        }
    }
}
