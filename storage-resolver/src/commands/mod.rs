// SPDX-License-Identifier: GPL-3.0-only

//! Imperative command lists
//!
//! Commands run grouped by category in a fixed order (ignored disks, clear
//! partitions, automatic partitioning, partitions, RAID, volume groups,
//! logical volumes, BTRFS); within a category they run in script order.

mod autopart;
mod btrfs;
mod clearpart;
mod ignoredisk;
mod logvol;
mod partition;
mod raid;
mod volgroup;

use storage_contracts::StorageEngine;
use storage_types::{
    Command, CommandKind, DeviceId, EFI_MOUNT_OPTIONS, FormatKind, FormatOptions, FormatSpec,
    MountRole, NumberedCommand, parse_mount_role,
};
use tracing::{debug, info};

use crate::context::ResolveContext;
use crate::encryption::{self, EncryptionRequest};
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::{matcher, reclaim};

/// One command variant applied to the working tree.
trait Execute {
    fn execute<E: StorageEngine + ?Sized>(
        &self,
        engine: &mut E,
        ctx: &mut ResolveContext,
        location: &SpecLocation,
    ) -> Result<()>;
}

/// Run a decoded script against `engine`.
pub fn run<E: StorageEngine + ?Sized>(
    engine: &mut E,
    ctx: &mut ResolveContext,
    commands: &[NumberedCommand],
) -> Result<()> {
    for kind in CommandKind::EXECUTION_ORDER {
        let batch: Vec<&NumberedCommand> = commands
            .iter()
            .filter(|numbered| numbered.command.kind() == kind)
            .collect();

        for numbered in &batch {
            let location = SpecLocation::command(numbered.index, kind);
            debug!("running {location}");
            match &numbered.command {
                Command::ClearPart(command) => command.execute(engine, ctx, &location)?,
                Command::IgnoreDisk(command) => command.execute(engine, ctx, &location)?,
                Command::AutoPart(command) => command.execute(engine, ctx, &location)?,
                Command::Partition(command) => command.execute(engine, ctx, &location)?,
                Command::Raid(command) => command.execute(engine, ctx, &location)?,
                Command::VolGroup(command) => command.execute(engine, ctx, &location)?,
                Command::LogVol(command) => command.execute(engine, ctx, &location)?,
                Command::Btrfs(command) => command.execute(engine, ctx, &location)?,
            }
        }

        match kind {
            CommandKind::ClearPart if ctx.usable_disks(&*engine).is_empty() => {
                info!("no usable disks, nothing to do");
                engine.reset().map_err(|source| ResolveError::Io {
                    context: "discarding the cleared partitions".to_string(),
                    source,
                })?;
                return Ok(());
            }
            CommandKind::AutoPart if !batch.is_empty() => {
                info!("automatic partitioning requested, skipping manual layout commands");
                return Ok(());
            }
            _ => {}
        }
    }
    Ok(())
}

/// What a command's mountpoint argument asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    /// `raid.NN`, `pv.NN` or `btrfs.NN`: a member of a later composite.
    Member { kind: FormatKind, name: String },
    Mount(MountRole),
}

impl Role {
    fn parse(target: &str, location: &SpecLocation) -> Result<Self> {
        let member = [
            ("raid.", FormatKind::MdMember),
            ("pv.", FormatKind::LvmPv),
            ("btrfs.", FormatKind::Btrfs),
        ]
        .into_iter()
        .find(|(prefix, _)| target.starts_with(prefix));
        if let Some((_, kind)) = member {
            return Ok(Self::Member {
                kind,
                name: target.to_string(),
            });
        }
        parse_mount_role(target).map(Self::Mount).map_err(|invalid| {
            ResolveError::spec(location.clone(), Violation::InvalidMountpoint(invalid.0))
        })
    }

    fn mountpoint(&self) -> Option<&str> {
        match self {
            Self::Mount(role) => role.mountpoint(),
            Self::Member { .. } => None,
        }
    }

    fn member_name(&self) -> Option<&str> {
        match self {
            Self::Member { name, .. } => Some(name),
            Self::Mount(_) => None,
        }
    }

    /// The format a device with this role gets.
    fn format(
        &self,
        options: &FormatOptions,
        ctx: &ResolveContext,
        location: &SpecLocation,
    ) -> Result<FormatSpec> {
        let kind = match self {
            Self::Member { kind, .. } => *kind,
            Self::Mount(role) => match (role.implied_format(), &options.fs_type) {
                (Some(kind), _) => kind,
                (None, Some(fs_type)) => FormatKind::parse(fs_type).ok_or_else(|| {
                    ResolveError::spec(
                        location.clone(),
                        Violation::UnsupportedFormat(fs_type.clone()),
                    )
                })?,
                (None, None) if role.mountpoint() == Some("/boot") => {
                    ctx.options.default_boot_fs_type
                }
                (None, None) => ctx.options.default_fs_type,
            },
        };
        let mount_options = options
            .fs_options
            .clone()
            .or_else(|| (kind == FormatKind::Efi).then(|| EFI_MOUNT_OPTIONS.to_string()));
        Ok(FormatSpec::new(kind)
            .with_mountpoint(self.mountpoint().map(str::to_string))
            .with_label(options.label.clone())
            .with_mount_options(mount_options)
            .with_profile(options.fs_profile.clone()))
    }
}

/// Disks matching a name or glob; an empty match is an error.
fn matching_disks<E: StorageEngine + ?Sized>(
    engine: &E,
    pattern: &str,
    location: &SpecLocation,
) -> Result<Vec<DeviceId>> {
    let disks = engine.disks();
    let mut found: Vec<DeviceId> = matcher::matches(engine, pattern)
        .into_iter()
        .map(|id| matcher::promote_multipath(engine, id))
        .filter(|id| disks.contains(id))
        .collect();
    found.dedup();
    if found.is_empty() {
        return Err(ResolveError::spec(
            location.clone(),
            Violation::NonexistentDisk(pattern.to_string()),
        ));
    }
    Ok(found)
}

/// Whether new partitions may go on `disk`: it has a partition table or is
/// being cleared. Cleared disks without one get a fresh label here.
fn prepare_disk<E: StorageEngine + ?Sized>(
    engine: &mut E,
    ctx: &ResolveContext,
    disk: DeviceId,
) -> Result<bool> {
    let Some(node) = engine.device(disk) else {
        return Ok(false);
    };
    if !node.kind.is_partitionable() {
        return Ok(false);
    }
    if node.is_partitioned() {
        return Ok(true);
    }
    if !ctx.should_clear(disk) || !engine.children(disk).is_empty() {
        return Ok(false);
    }
    let label = FormatKind::DiskLabel(ctx.options.disklabel);
    engine.format_device(disk, FormatSpec::new(label))?;
    Ok(true)
}

/// A composite member named in a command, through remaps and LUKS mappings.
fn member_device<E: StorageEngine + ?Sized>(
    engine: &E,
    ctx: &ResolveContext,
    spec: &str,
    location: &SpecLocation,
) -> Result<DeviceId> {
    let id = matcher::resolve_devspec(engine, ctx.remapped(spec))
        .ok_or_else(|| ResolveError::unresolved(location.clone(), spec))?;
    encryption::cleartext(engine, id).ok_or_else(|| ResolveError::unresolved(location.clone(), spec))
}

fn device_name<E: StorageEngine + ?Sized>(engine: &E, id: DeviceId) -> String {
    engine
        .device(id)
        .map(|node| node.name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// Free `mountpoint` unless `device` already claims it.
fn reclaim_for<E: StorageEngine + ?Sized>(
    engine: &mut E,
    mountpoint: Option<&str>,
    device: Option<DeviceId>,
) -> Result<()> {
    let Some(mountpoint) = mountpoint else {
        return Ok(());
    };
    match engine.mountpoint_owner(mountpoint) {
        Some(owner) if Some(owner) != device => reclaim::reclaim(engine, mountpoint),
        _ => Ok(()),
    }
}

/// Apply `format` to `device`, through a LUKS layer when encryption was asked for.
fn apply_format<E: StorageEngine + ?Sized>(
    engine: &mut E,
    ctx: &mut ResolveContext,
    device: DeviceId,
    format: FormatSpec,
    encryption: Option<&EncryptionRequest>,
    location: &SpecLocation,
) -> Result<DeviceId> {
    match encryption {
        Some(request) => encryption::wrap(engine, ctx, device, Some(format), request, location),
        None => {
            engine.format_device(device, format)?;
            Ok(device)
        }
    }
}
