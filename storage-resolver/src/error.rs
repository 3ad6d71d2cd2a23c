// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use storage_contracts::StorageError;
use storage_types::{Bytes, CommandKind, DeviceRef, RefKind};
use thiserror::Error;

/// Where in the input a problem was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecLocation {
    /// `storage.<kind>.<name>`
    Storage { kind: RefKind, name: String },
    /// `fileSystems."<mountpoint>"`
    FileSystem(String),
    /// `swapDevices[<index>]`
    SwapDevice(usize),
    /// `command #<index> (<kind>)`, 1-based
    Command { index: usize, kind: CommandKind },
    /// `command #<index>` whose kind is unknown
    Script(usize),
}

impl SpecLocation {
    pub fn storage(kind: RefKind, name: &str) -> Self {
        Self::Storage {
            kind,
            name: name.to_string(),
        }
    }

    pub fn command(index: usize, kind: CommandKind) -> Self {
        Self::Command { index, kind }
    }
}

impl From<&DeviceRef> for SpecLocation {
    fn from(reference: &DeviceRef) -> Self {
        Self::storage(reference.kind, &reference.name)
    }
}

impl fmt::Display for SpecLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { kind, name } => write!(f, "storage.{}.{name}", kind.as_str()),
            Self::FileSystem(mountpoint) => write!(f, "fileSystems.\"{mountpoint}\""),
            Self::SwapDevice(index) => write!(f, "swapDevices[{index}]"),
            Self::Command { index, kind } => write!(f, "command #{index} ({kind})"),
            Self::Script(index) => write!(f, "command #{index}"),
        }
    }
}

/// The constraint a configuration or command broke.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("the mount point \"{0}\" is not valid")]
    InvalidMountpoint(String),
    #[error("the \"{0}\" format type is not supported")]
    UnsupportedFormat(String),
    #[error("device name \"{0}\" is already in use")]
    DuplicateName(String),
    #[error("{0} is assigned more than one filesystem")]
    DuplicateFilesystem(DeviceRef),
    #[error("{found} cannot be used here, expected a {} reference", .expected.as_str())]
    WrongReferenceKind { expected: RefKind, found: DeviceRef },
    #[error("defined without any member devices; specify members or use an existing device")]
    NoMembers,
    #[error("encryption needs a passphrase or an escrow certificate")]
    MissingPassphrase,
    #[error("a size is required")]
    SizeRequired,
    #[error("a name is required when reusing an existing device")]
    NameRequired,
    #[error("a preexisting device (onPart) is required when the format is kept")]
    NoFormatWithoutOnPart,
    #[error("invalid physical extent size {0} bytes; must be a power of two between 1 MiB and 16 GiB")]
    InvalidExtentSize(Bytes),
    #[error("logical volume size must be at least the physical extent size")]
    SmallerThanExtent,
    #[error("reserved space of {0}% leaves nothing to allocate")]
    InvalidReserve(u8),
    #[error("unknown RAID level \"{0}\"")]
    InvalidRaidLevel(String),
    #[error("RAID level {level} needs at least {required} active members, got {found}")]
    TooFewMembers {
        level: String,
        required: usize,
        found: usize,
    },
    #[error("RAID level {0} does not support spare devices")]
    SparesUnsupported(String),
    #[error("no disk matches \"{0}\"")]
    NonexistentDisk(String),
    #[error("cannot create partitions on read-only or unpartitionable device {0}")]
    NotPartitionable(String),
    #[error("disk {0} has no partition table and is not being cleared")]
    Unpartitioned(String),
    #[error("no usable disk to place the partition on")]
    NoUsableDisk,
    #[error("no UUID is known for this filesystem")]
    MissingUuid,
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

pub type Result<T> = std::result::Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{location}: {violation}")]
    Specification {
        location: SpecLocation,
        violation: Violation,
    },

    #[error("{location}: cannot resolve {reference}")]
    UnresolvedParent {
        location: SpecLocation,
        reference: String,
    },

    #[error("{location}: invalid target size {target} bytes for device {device}: {reason}")]
    InvalidResizeTarget {
        location: SpecLocation,
        device: String,
        target: Bytes,
        reason: String,
    },

    #[error("{location}: unknown size unit '{unit}'")]
    InvalidSizeUnit { location: SpecLocation, unit: String },

    #[error("{location}: invalid size: {reason}")]
    InvalidSizeSpec {
        location: SpecLocation,
        reason: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: StorageError,
    },

    #[error("storage engine: {0}")]
    Engine(#[from] StorageError),
}

impl ResolveError {
    pub fn spec(location: SpecLocation, violation: Violation) -> Self {
        Self::Specification {
            location,
            violation,
        }
    }

    pub fn unresolved(location: SpecLocation, reference: impl fmt::Display) -> Self {
        Self::UnresolvedParent {
            location,
            reference: reference.to_string(),
        }
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Self::Specification { violation, .. } => Some(violation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_render_like_the_input() {
        assert_eq!(
            SpecLocation::storage(RefKind::Partition, "root").to_string(),
            "storage.partition.root"
        );
        assert_eq!(
            SpecLocation::FileSystem("/data".to_string()).to_string(),
            "fileSystems.\"/data\""
        );
        assert_eq!(
            SpecLocation::command(3, CommandKind::LogVol).to_string(),
            "command #3 (logvol)"
        );
    }

    #[test]
    fn messages_name_the_offending_device() {
        let error = ResolveError::unresolved(
            SpecLocation::storage(RefKind::Volgroup, "vg0"),
            DeviceRef::new(RefKind::Partition, "pv1"),
        );
        assert_eq!(
            error.to_string(),
            "storage.volgroup.vg0: cannot resolve partition.pv1"
        );

        let error = ResolveError::spec(
            SpecLocation::FileSystem("home".to_string()),
            Violation::InvalidMountpoint("home".to_string()),
        );
        assert_eq!(
            error.to_string(),
            "fileSystems.\"home\": the mount point \"home\" is not valid"
        );
    }
}
