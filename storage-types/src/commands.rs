// SPDX-License-Identifier: GPL-3.0-only

//! Imperative (kickstart-style) partitioning commands
//!
//! A script is a syntax version plus an ordered list of raw command entries
//! (`{ command = "part", mountpoint = "/", size = 500 }`). Entries are decoded
//! against the set of commands the syntax version supports. Sizes without a
//! unit are MiB.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DiskLabelType, SizeExpression};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandKind {
    ClearPart,
    IgnoreDisk,
    AutoPart,
    Partition,
    Raid,
    VolGroup,
    LogVol,
    Btrfs,
}

impl CommandKind {
    /// Execution order of command categories within a script.
    pub const EXECUTION_ORDER: [CommandKind; 8] = [
        Self::IgnoreDisk,
        Self::ClearPart,
        Self::AutoPart,
        Self::Partition,
        Self::Raid,
        Self::VolGroup,
        Self::LogVol,
        Self::Btrfs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ClearPart => "clearpart",
            Self::IgnoreDisk => "ignoredisk",
            Self::AutoPart => "autopart",
            Self::Partition => "partition",
            Self::Raid => "raid",
            Self::VolGroup => "volgroup",
            Self::LogVol => "logvol",
            Self::Btrfs => "btrfs",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Command syntax revision a script is written against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyntaxVersion {
    #[serde(rename = "RHEL6", alias = "rhel6")]
    Rhel6,
    #[serde(rename = "F18", alias = "f18")]
    F18,
    #[serde(rename = "F19", alias = "f19")]
    F19,
    #[default]
    #[serde(rename = "DEVEL", alias = "devel")]
    Devel,
}

impl SyntaxVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rhel6 => "RHEL6",
            Self::F18 => "F18",
            Self::F19 => "F19",
            Self::Devel => "DEVEL",
        }
    }

    /// Command names understood by this version.
    pub fn command_map(self) -> BTreeMap<&'static str, CommandKind> {
        let mut map = BTreeMap::from([
            ("autopart", CommandKind::AutoPart),
            ("clearpart", CommandKind::ClearPart),
            ("ignoredisk", CommandKind::IgnoreDisk),
            ("logvol", CommandKind::LogVol),
            ("part", CommandKind::Partition),
            ("partition", CommandKind::Partition),
            ("raid", CommandKind::Raid),
            ("volgroup", CommandKind::VolGroup),
        ]);
        if self != Self::Rhel6 {
            map.insert("btrfs", CommandKind::Btrfs);
        }
        map
    }

    pub fn command_kind(self, command: &str) -> Option<CommandKind> {
        self.command_map()
            .get(command.trim().to_ascii_lowercase().as_str())
            .copied()
    }
}

impl fmt::Display for SyntaxVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undecoded command entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCommand {
    pub command: String,
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Imperative command script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KickstartScript {
    #[serde(default)]
    pub version: SyntaxVersion,
    #[serde(default)]
    pub commands: Vec<RawCommand>,
}

#[derive(Debug, Error)]
pub enum CommandDecodeError {
    #[error("command #{index}: '{command}' is not supported by syntax version {version}")]
    Unsupported {
        index: usize,
        command: String,
        version: SyntaxVersion,
    },
    #[error("command #{index} ({command}): {source}")]
    InvalidOptions {
        index: usize,
        command: CommandKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Encryption options shared by the device commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptionOptions {
    pub encrypted: bool,
    pub passphrase: Option<String>,
    pub cipher: Option<String>,
    #[serde(alias = "escrowcert")]
    pub escrow_cert: Option<String>,
    #[serde(alias = "backuppassphrase")]
    pub backup_passphrase: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearPartType {
    #[default]
    None,
    All,
    Linux,
    /// Only the devices in `devices`.
    List,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClearPartCommand {
    #[serde(rename = "type")]
    pub kind: ClearPartType,
    /// Disk specs or globs (`sd*`) to clear.
    pub drives: Vec<String>,
    /// Device specs cleared with type `list`.
    #[serde(alias = "list")]
    pub devices: Vec<String>,
    #[serde(alias = "initall", alias = "initlabel")]
    pub init_all: bool,
    pub disklabel: Option<DiskLabelType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IgnoreDiskCommand {
    #[serde(alias = "ignoredisk")]
    pub drives: Vec<String>,
    #[serde(alias = "onlyuse")]
    pub only_use: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoPartScheme {
    Plain,
    #[default]
    Lvm,
    Btrfs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoPartCommand {
    #[serde(rename = "type")]
    pub scheme: AutoPartScheme,
    #[serde(alias = "fstype")]
    pub fs_type: Option<String>,
    #[serde(flatten)]
    pub encryption: EncryptionOptions,
}

/// Format options shared by the commands that create filesystems.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatOptions {
    #[serde(alias = "fstype")]
    pub fs_type: Option<String>,
    #[serde(alias = "fsoptions", alias = "fsopts")]
    pub fs_options: Option<String>,
    #[serde(alias = "fsprofile")]
    pub fs_profile: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartitionCommand {
    /// Mountpoint or role (`swap`, `raid.01`, `pv.01`, `btrfs.01`, `biosboot`, ...).
    pub mountpoint: String,
    pub size: Option<SizeExpression>,
    #[serde(alias = "maxsize")]
    pub max_size: Option<SizeExpression>,
    pub grow: bool,
    #[serde(alias = "asprimary")]
    pub primary: bool,
    #[serde(alias = "ondisk", alias = "ondrive")]
    pub on_disk: Option<String>,
    #[serde(alias = "onpart", alias = "usepart")]
    pub on_part: Option<String>,
    #[serde(alias = "noformat")]
    pub no_format: bool,
    pub resize: bool,
    pub recommended: bool,
    pub hibernation: bool,
    #[serde(flatten)]
    pub format: FormatOptions,
    #[serde(flatten)]
    pub encryption: EncryptionOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RaidCommand {
    /// Mountpoint or role (`swap`, `pv.01`, `btrfs.01`).
    pub mountpoint: String,
    /// Array name (`md0`).
    pub device: Option<String>,
    pub level: Option<String>,
    #[serde(alias = "partitions")]
    pub members: Vec<String>,
    pub spares: usize,
    #[serde(alias = "noformat")]
    pub no_format: bool,
    #[serde(alias = "useexisting")]
    pub use_existing: bool,
    #[serde(flatten)]
    pub format: FormatOptions,
    #[serde(flatten)]
    pub encryption: EncryptionOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolGroupCommand {
    #[serde(alias = "vgname")]
    pub name: String,
    #[serde(alias = "physvols", alias = "partitions")]
    pub physical_volumes: Vec<String>,
    /// Physical extent size in KiB.
    #[serde(alias = "pesize")]
    pub pe_size: Option<u64>,
    #[serde(alias = "reserved-space")]
    pub reserved_space: Option<SizeExpression>,
    #[serde(alias = "reserved-percent")]
    pub reserved_percent: Option<u8>,
    #[serde(alias = "noformat")]
    pub no_format: bool,
    #[serde(alias = "useexisting")]
    pub use_existing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogVolCommand {
    pub mountpoint: String,
    pub name: String,
    #[serde(alias = "vgname")]
    pub vg_name: String,
    pub size: Option<SizeExpression>,
    #[serde(alias = "maxsize")]
    pub max_size: Option<SizeExpression>,
    pub grow: bool,
    pub percent: Option<i64>,
    #[serde(alias = "noformat")]
    pub no_format: bool,
    #[serde(alias = "useexisting")]
    pub use_existing: bool,
    pub resize: bool,
    pub recommended: bool,
    pub hibernation: bool,
    #[serde(flatten)]
    pub format: FormatOptions,
    #[serde(flatten)]
    pub encryption: EncryptionOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BtrfsCommand {
    pub mountpoint: String,
    pub name: Option<String>,
    pub label: Option<String>,
    pub devices: Vec<String>,
    #[serde(alias = "data")]
    pub data_level: Option<String>,
    #[serde(alias = "metadata")]
    pub metadata_level: Option<String>,
    pub subvol: bool,
    #[serde(alias = "useexisting")]
    pub use_existing: bool,
}

/// A decoded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ClearPart(ClearPartCommand),
    IgnoreDisk(IgnoreDiskCommand),
    AutoPart(AutoPartCommand),
    Partition(PartitionCommand),
    Raid(RaidCommand),
    VolGroup(VolGroupCommand),
    LogVol(LogVolCommand),
    Btrfs(BtrfsCommand),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::ClearPart(_) => CommandKind::ClearPart,
            Self::IgnoreDisk(_) => CommandKind::IgnoreDisk,
            Self::AutoPart(_) => CommandKind::AutoPart,
            Self::Partition(_) => CommandKind::Partition,
            Self::Raid(_) => CommandKind::Raid,
            Self::VolGroup(_) => CommandKind::VolGroup,
            Self::LogVol(_) => CommandKind::LogVol,
            Self::Btrfs(_) => CommandKind::Btrfs,
        }
    }
}

/// A decoded command with its position in the script (1-indexed).
#[derive(Debug, Clone, PartialEq)]
pub struct NumberedCommand {
    pub index: usize,
    pub command: Command,
}

impl KickstartScript {
    /// Decode every entry against the script's syntax version.
    pub fn decode(&self) -> Result<Vec<NumberedCommand>, CommandDecodeError> {
        self.commands
            .iter()
            .enumerate()
            .map(|(position, raw)| {
                let index = position + 1;
                let kind = self.version.command_kind(&raw.command).ok_or_else(|| {
                    CommandDecodeError::Unsupported {
                        index,
                        command: raw.command.clone(),
                        version: self.version,
                    }
                })?;
                let command = decode_options(kind, &raw.options).map_err(|source| {
                    CommandDecodeError::InvalidOptions {
                        index,
                        command: kind,
                        source,
                    }
                })?;
                Ok(NumberedCommand { index, command })
            })
            .collect()
    }
}

fn decode_options(
    kind: CommandKind,
    options: &serde_json::Map<String, serde_json::Value>,
) -> Result<Command, serde_json::Error> {
    let value = serde_json::Value::Object(options.clone());
    Ok(match kind {
        CommandKind::ClearPart => Command::ClearPart(serde_json::from_value(value)?),
        CommandKind::IgnoreDisk => Command::IgnoreDisk(serde_json::from_value(value)?),
        CommandKind::AutoPart => Command::AutoPart(serde_json::from_value(value)?),
        CommandKind::Partition => Command::Partition(serde_json::from_value(value)?),
        CommandKind::Raid => Command::Raid(serde_json::from_value(value)?),
        CommandKind::VolGroup => Command::VolGroup(serde_json::from_value(value)?),
        CommandKind::LogVol => Command::LogVol(serde_json::from_value(value)?),
        CommandKind::Btrfs => Command::Btrfs(serde_json::from_value(value)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_script_with_kickstart_option_names() {
        let script: KickstartScript = serde_json::from_str(
            r#"{
                "version": "F18",
                "commands": [
                    { "command": "clearpart", "type": "all", "drives": ["sd*"], "initlabel": true },
                    { "command": "part", "mountpoint": "pv.01", "size": 1000, "grow": true, "ondisk": "sda" },
                    { "command": "volgroup", "vgname": "vg0", "physvols": ["pv.01"], "pesize": 8192 },
                    { "command": "logvol", "mountpoint": "/", "vgname": "vg0", "name": "root",
                      "percent": 80, "fstype": "xfs", "encrypted": true, "passphrase": "pw" }
                ]
            }"#,
        )
        .unwrap();

        let commands = script.decode().unwrap();
        assert_eq!(commands.len(), 4);

        let Command::ClearPart(clear) = &commands[0].command else {
            panic!("expected clearpart");
        };
        assert_eq!(clear.kind, ClearPartType::All);
        assert!(clear.init_all);

        let Command::Partition(part) = &commands[1].command else {
            panic!("expected partition");
        };
        assert_eq!(part.on_disk.as_deref(), Some("sda"));
        assert!(part.grow);

        let Command::VolGroup(vg) = &commands[2].command else {
            panic!("expected volgroup");
        };
        assert_eq!(vg.pe_size, Some(8192));
        assert_eq!(vg.physical_volumes, vec!["pv.01".to_string()]);

        let Command::LogVol(lv) = &commands[3].command else {
            panic!("expected logvol");
        };
        assert_eq!(lv.format.fs_type.as_deref(), Some("xfs"));
        assert!(lv.encryption.encrypted);
        assert_eq!(commands[3].index, 4);
    }

    #[test]
    fn btrfs_is_not_available_in_rhel6() {
        let script = KickstartScript {
            version: SyntaxVersion::Rhel6,
            commands: vec![RawCommand {
                command: "btrfs".to_string(),
                options: serde_json::Map::new(),
            }],
        };
        assert!(matches!(
            script.decode(),
            Err(CommandDecodeError::Unsupported { index: 1, .. })
        ));
        assert_eq!(SyntaxVersion::Devel.command_kind("btrfs"), Some(CommandKind::Btrfs));
    }

    #[test]
    fn rejects_malformed_options() {
        let script: KickstartScript = toml::from_str(
            r#"
            version = "DEVEL"
            [[commands]]
            command = "raid"
            spares = "two"
            "#,
        )
        .unwrap();
        assert!(matches!(
            script.decode(),
            Err(CommandDecodeError::InvalidOptions {
                command: CommandKind::Raid,
                ..
            })
        ));
    }
}
