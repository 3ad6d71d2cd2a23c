// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the declarative storage resolver
//!
//! This crate defines the types shared across the workspace:
//!
//! - **storage-contracts**: engine traits speak in `DeviceNode`, `DeviceRequest`
//!   and `StorageAction`
//! - **storage-sys**: the simulated working tree stores `DeviceNode`s and
//!   renders `StorageAction`s into tool invocations
//! - **storage-resolver**: consumes `StorageConfig` and `KickstartScript` and
//!   produces ordered actions
//!
//! ## Inputs
//!
//! - `StorageConfig` → declarative tree (`storage.*` sections + `fileSystems`)
//! - `KickstartScript` → ordered imperative command list
//!
//! ## Working tree
//!
//! - `DeviceNode` → one existing or requested device
//! - `FormatState` → format present on, or scheduled for, a device
//! - `StorageAction` → one step of the ordered action graph

pub mod action;
pub mod commands;
pub mod common;
pub mod config;
pub mod device;
pub mod format;
pub mod layout;
pub mod matching;
pub mod size;

pub use action::{ActionKind, ActionParams, StorageAction};
pub use commands::{
    AutoPartCommand, AutoPartScheme, BtrfsCommand, ClearPartCommand, ClearPartType, Command,
    CommandDecodeError, CommandKind, EncryptionOptions, FormatOptions, IgnoreDiskCommand,
    KickstartScript, LogVolCommand, NumberedCommand, PartitionCommand, RaidCommand, RawCommand,
    SyntaxVersion, VolGroupCommand,
};
pub use common::{
    Bytes, GIB, KIB, MIB, QuantityError, SizeUnit, bytes_to_pretty, quantity_to_bytes,
};
pub use config::{
    BtrfsEntry, DeviceRef, DiskEntry, EncryptionEntry, FileSystemEntry, LogicalVolumeEntry,
    PartitionEntry, RaidEntry, RefKind, StorageConfig, StorageSection, SwapEntry,
    VolumeGroupEntry,
};
pub use device::{DeviceId, DeviceKind, DeviceNode};
pub use format::{
    DiskLabelType, EFI_MOUNT_OPTIONS, EFI_MOUNTPOINT, FilesystemType, FormatKind, FormatSpec,
    FormatState, InvalidMountpoint, LuksParams, MountRole, ResizeSupport, parse_mount_role,
};
pub use layout::{DeviceLayout, DeviceRequest, RaidLevel, VgReserve};
pub use matching::{MatchCriteria, MatchStrategy};
pub use size::{Evaluated, FILL, Quantity, SizeError, SizeExpression};
