// SPDX-License-Identifier: GPL-3.0-only

//! Format (filesystem / container) models and mountpoint roles

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Bytes;

/// Mount options applied to EFI system partitions mounted at `/boot/efi`.
pub const EFI_MOUNT_OPTIONS: &str = "defaults,uid=0,gid=0,umask=0077,shortname=winnt";

/// Mountpoint of the EFI system partition.
pub const EFI_MOUNTPOINT: &str = "/boot/efi";

/// Filesystems that carry mountable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilesystemType {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Vfat,
    Ntfs,
    Exfat,
    F2fs,
    Hfs,
    HfsPlus,
}

impl FilesystemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Vfat => "vfat",
            Self::Ntfs => "ntfs",
            Self::Exfat => "exfat",
            Self::F2fs => "f2fs",
            Self::Hfs => "hfs",
            Self::HfsPlus => "hfs+",
        }
    }
}

/// Partition table flavour used when a disk gets a fresh label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskLabelType {
    #[default]
    Gpt,
    #[serde(alias = "dos", alias = "mbr")]
    Msdos,
}

impl DiskLabelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Msdos => "msdos",
        }
    }
}

/// What a device is formatted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormatKind {
    Filesystem(FilesystemType),
    Swap,
    BiosBoot,
    PrepBoot,
    AppleBoot,
    /// EFI system partition (vfat underneath).
    Efi,
    Luks,
    LvmPv,
    MdMember,
    Btrfs,
    MultipathMember,
    DiskLabel(DiskLabelType),
}

/// Which directions a format can be resized in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeSupport {
    Both,
    GrowOnly,
    Unsupported,
}

impl FormatKind {
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "ext2" => Self::Filesystem(FilesystemType::Ext2),
            "ext3" => Self::Filesystem(FilesystemType::Ext3),
            "ext4" => Self::Filesystem(FilesystemType::Ext4),
            "xfs" => Self::Filesystem(FilesystemType::Xfs),
            "vfat" | "fat" | "fat32" => Self::Filesystem(FilesystemType::Vfat),
            "ntfs" => Self::Filesystem(FilesystemType::Ntfs),
            "exfat" => Self::Filesystem(FilesystemType::Exfat),
            "f2fs" => Self::Filesystem(FilesystemType::F2fs),
            "hfs" => Self::Filesystem(FilesystemType::Hfs),
            "hfs+" | "hfsplus" => Self::Filesystem(FilesystemType::HfsPlus),
            "swap" => Self::Swap,
            "biosboot" => Self::BiosBoot,
            "prepboot" => Self::PrepBoot,
            "appleboot" => Self::AppleBoot,
            "efi" | "efi system partition" => Self::Efi,
            "luks" | "crypto_luks" => Self::Luks,
            "lvmpv" | "lvm2_member" => Self::LvmPv,
            "mdmember" | "linux_raid_member" => Self::MdMember,
            "btrfs" => Self::Btrfs,
            "multipath_member" | "mpath_member" => Self::MultipathMember,
            "gpt" => Self::DiskLabel(DiskLabelType::Gpt),
            "msdos" | "dos" | "mbr" => Self::DiskLabel(DiskLabelType::Msdos),
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Filesystem(fs) => fs.as_str(),
            Self::Swap => "swap",
            Self::BiosBoot => "biosboot",
            Self::PrepBoot => "prepboot",
            Self::AppleBoot => "appleboot",
            Self::Efi => "efi",
            Self::Luks => "luks",
            Self::LvmPv => "lvmpv",
            Self::MdMember => "mdmember",
            Self::Btrfs => "btrfs",
            Self::MultipathMember => "multipath_member",
            Self::DiskLabel(label) => label.as_str(),
        }
    }

    pub fn resize_support(&self) -> ResizeSupport {
        match self {
            Self::Filesystem(
                FilesystemType::Ext2
                | FilesystemType::Ext3
                | FilesystemType::Ext4
                | FilesystemType::Ntfs,
            )
            | Self::Btrfs => ResizeSupport::Both,
            Self::Filesystem(FilesystemType::Xfs) => ResizeSupport::GrowOnly,
            _ => ResizeSupport::Unsupported,
        }
    }

    /// Formats a "clear Linux partitions" pass is allowed to remove.
    pub fn is_linux_native(&self) -> bool {
        matches!(
            self,
            Self::Filesystem(
                FilesystemType::Ext2
                    | FilesystemType::Ext3
                    | FilesystemType::Ext4
                    | FilesystemType::Xfs
                    | FilesystemType::F2fs
            ) | Self::Swap
                | Self::LvmPv
                | Self::MdMember
                | Self::Btrfs
                | Self::Luks
        )
    }

    pub fn is_mountable(&self) -> bool {
        matches!(self, Self::Filesystem(_) | Self::Efi | Self::Btrfs)
    }

    /// Member formats of composite devices.
    pub fn is_container_member(&self) -> bool {
        matches!(self, Self::LvmPv | Self::MdMember | Self::Luks)
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for FormatKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unsupported format type '{value}'"))
    }
}

impl From<FormatKind> for String {
    fn from(kind: FormatKind) -> Self {
        kind.name().to_string()
    }
}

/// LUKS container parameters.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuksParams {
    pub passphrase: Option<String>,
    pub cipher: Option<String>,
    /// Escrow certificate contents, already looked up in the registry.
    pub escrow_cert: Option<String>,
    pub backup_passphrase: bool,
}

impl fmt::Debug for LuksParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuksParams")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("cipher", &self.cipher)
            .field("escrow_cert", &self.escrow_cert.is_some())
            .field("backup_passphrase", &self.backup_passphrase)
            .finish()
    }
}

/// A requested format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    pub kind: FormatKind,
    pub mountpoint: Option<String>,
    pub label: Option<String>,
    pub mount_options: Option<String>,
    /// Format-specific creation profile (e.g. mkfs usage type).
    pub profile: Option<String>,
    pub luks: Option<LuksParams>,
}

impl FormatSpec {
    pub fn new(kind: FormatKind) -> Self {
        Self {
            kind,
            mountpoint: None,
            label: None,
            mount_options: None,
            profile: None,
            luks: None,
        }
    }

    pub fn luks(params: LuksParams) -> Self {
        Self {
            luks: Some(params),
            ..Self::new(FormatKind::Luks)
        }
    }

    pub fn with_mountpoint(mut self, mountpoint: Option<String>) -> Self {
        self.mountpoint = mountpoint.filter(|mp| !mp.is_empty());
        self
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn with_mount_options(mut self, options: Option<String>) -> Self {
        self.mount_options = options.filter(|opts| !opts.is_empty());
        self
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }
}

impl fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(mountpoint) = &self.mountpoint {
            write!(f, " at {mountpoint}")?;
        }
        if let Some(label) = &self.label {
            write!(f, " label={label}")?;
        }
        if let Some(options) = &self.mount_options {
            write!(f, " options={options}")?;
        }
        Ok(())
    }
}

/// Format currently present on (or scheduled for) a device in the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatState {
    pub spec: FormatSpec,
    /// Whether the format already exists on disk.
    pub exists: bool,
    pub uuid: Option<String>,
    /// Smallest size the format can be shrunk to.
    pub min_size: Option<Bytes>,
}

impl FormatState {
    pub fn planned(spec: FormatSpec) -> Self {
        Self {
            spec,
            exists: false,
            uuid: None,
            min_size: None,
        }
    }
}

/// How a mount target string from a configuration is to be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountRole {
    Path(String),
    Swap,
    BiosBoot,
    PrepBoot,
    AppleBoot,
    /// `None`, `none` or empty: formatted but not mounted.
    Unmounted,
}

impl MountRole {
    /// Format implied by a reserved role.
    pub fn implied_format(&self) -> Option<FormatKind> {
        match self {
            Self::Swap => Some(FormatKind::Swap),
            Self::BiosBoot => Some(FormatKind::BiosBoot),
            Self::PrepBoot => Some(FormatKind::PrepBoot),
            Self::AppleBoot => Some(FormatKind::AppleBoot),
            Self::Path(path) if path == EFI_MOUNTPOINT => Some(FormatKind::Efi),
            _ => None,
        }
    }

    pub fn mountpoint(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("the mount point \"{0}\" is not valid")]
pub struct InvalidMountpoint(pub String);

/// Interpret a mount target: an absolute path or one of the reserved roles.
pub fn parse_mount_role(target: &str) -> Result<MountRole, InvalidMountpoint> {
    match target {
        "" | "none" | "None" => Ok(MountRole::Unmounted),
        "swap" => Ok(MountRole::Swap),
        "biosboot" => Ok(MountRole::BiosBoot),
        "prepboot" => Ok(MountRole::PrepBoot),
        "appleboot" => Ok(MountRole::AppleBoot),
        path if path.starts_with('/') => Ok(MountRole::Path(path.to_string())),
        other => Err(InvalidMountpoint(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_roles() {
        assert_eq!(parse_mount_role("/home"), Ok(MountRole::Path("/home".into())));
        assert_eq!(parse_mount_role("swap"), Ok(MountRole::Swap));
        assert_eq!(parse_mount_role("None"), Ok(MountRole::Unmounted));
        assert_eq!(parse_mount_role(""), Ok(MountRole::Unmounted));
        assert!(parse_mount_role("home").is_err());
        assert_eq!(
            parse_mount_role(EFI_MOUNTPOINT).unwrap().implied_format(),
            Some(FormatKind::Efi)
        );
    }

    #[test]
    fn format_names_roundtrip_through_parse() {
        for name in ["ext4", "xfs", "swap", "luks", "lvmpv", "mdmember", "btrfs", "hfs+", "gpt"] {
            let kind = FormatKind::parse(name).unwrap();
            assert_eq!(kind.name(), name);
        }
        assert_eq!(FormatKind::parse("reiser5"), None);
    }

    #[test]
    fn resize_support_by_kind() {
        assert_eq!(FormatKind::parse("ext4").unwrap().resize_support(), ResizeSupport::Both);
        assert_eq!(FormatKind::parse("xfs").unwrap().resize_support(), ResizeSupport::GrowOnly);
        assert_eq!(FormatKind::Swap.resize_support(), ResizeSupport::Unsupported);
    }

    #[test]
    fn luks_debug_redacts_passphrase() {
        let params = LuksParams {
            passphrase: Some("hunter2".to_string()),
            ..LuksParams::default()
        };
        assert!(!format!("{params:?}").contains("hunter2"));
    }
}
