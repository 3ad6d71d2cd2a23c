// SPDX-License-Identifier: GPL-3.0-only

//! Declarative configuration to ordered actions
//!
//! Sections are walked in a fixed order: disks, partitions, RAID arrays,
//! volume groups, logical volumes, BTRFS volumes, then filesystem and swap
//! assignment. Within a section entries are visited in name order. Every
//! device built or resolved is remembered by its reference so later sections
//! can stack on top of it.

use std::collections::{BTreeMap, BTreeSet};

use storage_contracts::{DeviceProbe, StorageEngine, StorageError};
use storage_types::{
    Bytes, DeviceId, DeviceKind, DeviceLayout, DeviceRef, DeviceRequest, EFI_MOUNT_OPTIONS,
    EncryptionEntry, FileSystemEntry, FormatKind, FormatSpec, MountRole, RaidLevel, RefKind,
    SizeExpression, StorageConfig, VgReserve, parse_mount_role,
};
use tracing::{debug, info};

use crate::context::{DeferredMount, ResolveContext};
use crate::encryption::{self, EncryptionRequest};
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::size::{self, CONFIG_UNIT, DEFAULT_EXTENT_SIZE, EXTENT_UNIT};
use crate::{matcher, reclaim, resize};

/// Walk `config` and register its actions with `engine`.
pub fn build<E: StorageEngine + ?Sized>(
    engine: &mut E,
    probe: &dyn DeviceProbe,
    ctx: &mut ResolveContext,
    config: &StorageConfig,
) -> Result<()> {
    let mut builder = GraphBuilder {
        mounts: assignments(config)?,
        engine,
        probe,
        ctx,
        config,
        built: BTreeMap::new(),
        kept: BTreeSet::new(),
    };

    builder.disks()?;
    builder.partitions()?;
    builder.raid_arrays()?;
    builder.volume_groups()?;
    builder.logical_volumes()?;
    builder.btrfs_volumes()?;
    builder.file_systems()?;
    builder.swap_devices()
}

/// What a device reference is used for.
struct Assignment<'a> {
    target: &'a str,
    role: MountRole,
}

impl<'a> Assignment<'a> {
    fn mountpoint(&self) -> Option<&'a str> {
        matches!(self.role, MountRole::Path(_)).then_some(self.target)
    }
}

/// Validate every filesystem and swap assignment before anything is built.
fn assignments(config: &StorageConfig) -> Result<BTreeMap<DeviceRef, Assignment<'_>>> {
    let mut assigned = BTreeMap::new();

    for (target, entry) in &config.file_systems {
        let location = SpecLocation::FileSystem(target.clone());
        let role = parse_mount_role(target)
            .map_err(|invalid| ResolveError::spec(location.clone(), Violation::InvalidMountpoint(invalid.0)))?;
        if let Some(fs_type) = &entry.fs_type {
            FormatKind::parse(fs_type).ok_or_else(|| {
                ResolveError::spec(location.clone(), Violation::UnsupportedFormat(fs_type.clone()))
            })?;
        }
        claim(config, &mut assigned, &entry.storage, Assignment { target, role }, location)?;
    }

    for (index, entry) in config.swap_devices.iter().enumerate() {
        let assignment = Assignment {
            target: "swap",
            role: MountRole::Swap,
        };
        claim(
            config,
            &mut assigned,
            &entry.storage,
            assignment,
            SpecLocation::SwapDevice(index),
        )?;
    }

    Ok(assigned)
}

fn claim<'a>(
    config: &StorageConfig,
    assigned: &mut BTreeMap<DeviceRef, Assignment<'a>>,
    reference: &DeviceRef,
    assignment: Assignment<'a>,
    location: SpecLocation,
) -> Result<()> {
    if !config.storage.declares(reference) {
        return Err(ResolveError::unresolved(location, reference));
    }
    if assigned.insert(reference.clone(), assignment).is_some() {
        return Err(ResolveError::spec(
            location,
            Violation::DuplicateFilesystem(reference.clone()),
        ));
    }
    Ok(())
}

struct GraphBuilder<'a, E: ?Sized> {
    engine: &'a mut E,
    probe: &'a dyn DeviceProbe,
    ctx: &'a mut ResolveContext,
    config: &'a StorageConfig,
    mounts: BTreeMap<DeviceRef, Assignment<'a>>,
    /// Devices built or resolved so far.
    built: BTreeMap<DeviceRef, DeviceId>,
    /// Reused devices whose format stays untouched.
    kept: BTreeSet<DeviceRef>,
}

impl<E: StorageEngine + ?Sized> GraphBuilder<'_, E> {
    fn lookup(&self, reference: &DeviceRef, location: &SpecLocation) -> Result<DeviceId> {
        self.built
            .get(reference)
            .copied()
            .ok_or_else(|| ResolveError::unresolved(location.clone(), reference))
    }

    fn expect_kind(
        reference: &DeviceRef,
        expected: RefKind,
        location: &SpecLocation,
    ) -> Result<()> {
        if reference.kind == expected {
            Ok(())
        } else {
            Err(ResolveError::spec(
                location.clone(),
                Violation::WrongReferenceKind {
                    expected,
                    found: reference.clone(),
                },
            ))
        }
    }

    /// Member devices of a composite, LUKS members replaced by their mapping.
    fn members(&self, references: &[DeviceRef], location: &SpecLocation) -> Result<Vec<DeviceId>> {
        references
            .iter()
            .map(|reference| {
                let id = self.lookup(reference, location)?;
                encryption::cleartext(&*self.engine, id)
                    .ok_or_else(|| ResolveError::unresolved(location.clone(), reference))
            })
            .collect()
    }

    fn ensure_unused(&self, name: &str, location: &SpecLocation) -> Result<()> {
        match self.engine.by_name(name) {
            Some(_) => Err(ResolveError::spec(
                location.clone(),
                Violation::DuplicateName(name.to_string()),
            )),
            None => Ok(()),
        }
    }

    fn name_of(&self, id: DeviceId) -> String {
        self.engine
            .device(id)
            .map(|device| device.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Free the mountpoint `reference` is assigned to before it is recreated.
    fn reclaim_for(&mut self, reference: &DeviceRef) -> Result<()> {
        match self.mounts.get(reference).and_then(Assignment::mountpoint) {
            Some(mountpoint) => reclaim::reclaim(&mut *self.engine, mountpoint),
            None => Ok(()),
        }
    }

    fn encrypt(
        &mut self,
        id: DeviceId,
        encryption: Option<&EncryptionEntry>,
        location: &SpecLocation,
    ) -> Result<DeviceId> {
        match encryption {
            Some(entry) => encryption::wrap(
                &mut *self.engine,
                &mut *self.ctx,
                id,
                None,
                &EncryptionRequest::from(entry),
                location,
            ),
            None => Ok(id),
        }
    }

    /// Reuse an existing device, either keeping its format or clearing it.
    fn reuse(
        &mut self,
        reference: &DeviceRef,
        id: DeviceId,
        keep_format: bool,
        resize_to: Option<Bytes>,
        location: &SpecLocation,
    ) -> Result<()> {
        if keep_format {
            if let Some(target) = resize_to {
                resize::resize(&mut *self.engine, id, target, location)?;
            }
            self.kept.insert(reference.clone());
        } else {
            reclaim::remove_existing_format(&mut *self.engine, id)?;
            if let Some(target) = resize_to {
                resize::resize_device_only(&mut *self.engine, id, target, location)?;
            }
        }
        Ok(())
    }

    fn disks(&mut self) -> Result<()> {
        let config = self.config;
        let storage = &config.storage;
        for (name, entry) in &storage.disk {
            let reference = DeviceRef::new(RefKind::Disk, name);
            let location = SpecLocation::from(&reference);
            let found = matcher::resolve(&*self.engine, self.probe, &entry.match_criteria, name)?
                .ok_or_else(|| ResolveError::unresolved(location.clone(), &reference))?;
            let disk = matcher::promote_multipath(&*self.engine, found);

            if entry.clear || entry.initlabel {
                info!("{location}: clearing {}", self.name_of(disk));
                reclaim::destroy_dependents(&mut *self.engine, disk)?;
            }

            let Some(node) = self.engine.device(disk) else {
                return Err(ResolveError::unresolved(location, &reference));
            };
            let targeted = storage
                .partition
                .values()
                .any(|partition| partition.target_device == reference);
            let relabel = entry.clear || entry.initlabel || (targeted && node.format.is_none());
            if targeted && !relabel && !node.is_partitioned() {
                return Err(ResolveError::spec(
                    location,
                    Violation::Unpartitioned(node.name.clone()),
                ));
            }
            if relabel {
                if !node.kind.is_partitionable() {
                    return Err(ResolveError::spec(
                        location,
                        Violation::NotPartitionable(node.name.clone()),
                    ));
                }
                let label = entry.disklabel.unwrap_or(self.ctx.options.disklabel);
                debug!("{location}: new {} disk label on {}", label.as_str(), node.name);
                self.engine
                    .format_device(disk, FormatSpec::new(FormatKind::DiskLabel(label)))?;
            }

            self.built.insert(reference, disk);
        }
        Ok(())
    }

    fn partitions(&mut self) -> Result<()> {
        let config = self.config;
        for (name, entry) in &config.storage.partition {
            let reference = DeviceRef::new(RefKind::Partition, name);
            let location = SpecLocation::from(&reference);
            Self::expect_kind(&entry.target_device, RefKind::Disk, &location)?;
            let disk = self.lookup(&entry.target_device, &location)?;

            let id = if let Some(on_part) = &entry.on_part {
                let device = matcher::resolve_devspec(&*self.engine, on_part)
                    .ok_or_else(|| ResolveError::unresolved(location.clone(), on_part))?;
                let resize_to = self.resize_target(entry.resize, entry.size.as_ref(), &location)?;
                self.reuse(&reference, device, entry.no_format, resize_to, &location)?;
                device
            } else {
                if entry.no_format {
                    return Err(ResolveError::spec(location, Violation::NoFormatWithoutOnPart));
                }
                self.ensure_unused(name, &location)?;
                let expr = entry
                    .size
                    .as_ref()
                    .ok_or_else(|| ResolveError::spec(location.clone(), Violation::SizeRequired))?;
                let (size, grow) = size::resolve(expr, CONFIG_UNIT, &location)?.request();
                let max_size = entry
                    .max_size
                    .as_ref()
                    .map(|max| size::resolve_fixed(max, CONFIG_UNIT, &location))
                    .transpose()?;

                self.reclaim_for(&reference)?;
                let request = DeviceRequest::new(
                    DeviceLayout::Partition {
                        primary: entry.primary,
                    },
                    vec![disk],
                )
                .named(name.clone())
                .with_size(size, grow)
                .with_max_size(max_size);
                self.engine.create_device(request)?
            };

            let id = if self.kept.contains(&reference) {
                id
            } else {
                self.encrypt(id, entry.encryption.as_ref(), &location)?
            };
            self.built.insert(reference, id);
        }
        Ok(())
    }

    fn resize_target(
        &self,
        requested: bool,
        size: Option<&SizeExpression>,
        location: &SpecLocation,
    ) -> Result<Option<Bytes>> {
        if !requested {
            return Ok(None);
        }
        let expr =
            size.ok_or_else(|| ResolveError::spec(location.clone(), Violation::SizeRequired))?;
        size::resolve_fixed(expr, CONFIG_UNIT, location).map(Some)
    }

    fn raid_arrays(&mut self) -> Result<()> {
        let config = self.config;
        for (name, entry) in &config.storage.raid {
            let reference = DeviceRef::new(RefKind::Raid, name);
            let location = SpecLocation::from(&reference);
            let level = RaidLevel::parse(&entry.level).ok_or_else(|| {
                ResolveError::spec(location.clone(), Violation::InvalidRaidLevel(entry.level.clone()))
            })?;
            let members = self.members(&entry.devices, &location)?;

            let id = if entry.use_existing {
                let device = self
                    .engine
                    .by_name(name)
                    .filter(|&id| self.engine.device(id).is_some_and(|d| d.kind == DeviceKind::MdArray))
                    .ok_or_else(|| ResolveError::unresolved(location.clone(), format!("RAID array {name}")))?;
                self.reuse(&reference, device, entry.no_format, None, &location)?;
                device
            } else {
                if members.is_empty() {
                    return Err(ResolveError::spec(location, Violation::NoMembers));
                }
                self.ensure_unused(name, &location)?;
                if entry.spares > 0 && !level.supports_spares() {
                    return Err(ResolveError::spec(
                        location,
                        Violation::SparesUnsupported(level.to_string()),
                    ));
                }
                let active = members.len().saturating_sub(entry.spares);
                if active < level.min_members() {
                    return Err(ResolveError::spec(
                        location,
                        Violation::TooFewMembers {
                            level: level.to_string(),
                            required: level.min_members(),
                            found: active,
                        },
                    ));
                }

                for &member in &members {
                    format_member(&mut *self.engine, member, FormatKind::MdMember)?;
                }
                self.reclaim_for(&reference)?;
                let total = members.len();
                let request = DeviceRequest::new(
                    DeviceLayout::MdArray {
                        level,
                        member_devices: active,
                        total_devices: total,
                    },
                    members,
                )
                .named(name.clone());
                self.engine.create_device(request)?
            };

            let id = if self.kept.contains(&reference) {
                id
            } else {
                self.encrypt(id, entry.encryption.as_ref(), &location)?
            };
            self.built.insert(reference, id);
        }
        Ok(())
    }

    fn volume_groups(&mut self) -> Result<()> {
        let config = self.config;
        for (name, entry) in &config.storage.volgroup {
            let reference = DeviceRef::new(RefKind::Volgroup, name);
            let location = SpecLocation::from(&reference);
            let members = self.members(&entry.devices, &location)?;

            let id = if entry.use_existing {
                self.engine
                    .by_name(name)
                    .filter(|&id| {
                        self.engine
                            .device(id)
                            .is_some_and(|d| d.kind == DeviceKind::VolumeGroup)
                    })
                    .ok_or_else(|| {
                        ResolveError::unresolved(location.clone(), format!("volume group {name}"))
                    })?
            } else {
                if members.is_empty() {
                    return Err(ResolveError::spec(location, Violation::NoMembers));
                }
                self.ensure_unused(name, &location)?;

                let extent_size = match &entry.extent_size {
                    Some(expr) => size::extent_size(
                        size::resolve_fixed(expr, EXTENT_UNIT, &location)?,
                        &location,
                    )?,
                    None => DEFAULT_EXTENT_SIZE,
                };
                let reserve = match (&entry.reserved_space, entry.reserved_percent) {
                    (Some(space), _) => Some(VgReserve::Space(size::resolve_fixed(
                        space,
                        CONFIG_UNIT,
                        &location,
                    )?)),
                    (None, Some(percent)) if percent >= 100 => {
                        return Err(ResolveError::spec(location, Violation::InvalidReserve(percent)));
                    }
                    (None, Some(percent)) => Some(VgReserve::Percent(percent)),
                    (None, None) => None,
                };

                for &member in &members {
                    format_member(&mut *self.engine, member, FormatKind::LvmPv)?;
                }
                let request = DeviceRequest::new(
                    DeviceLayout::VolumeGroup {
                        extent_size,
                        reserve,
                    },
                    members,
                )
                .named(name.clone());
                self.engine.create_device(request)?
            };
            self.built.insert(reference, id);
        }
        Ok(())
    }

    fn logical_volumes(&mut self) -> Result<()> {
        let config = self.config;
        for (name, entry) in &config.storage.logvol {
            let reference = DeviceRef::new(RefKind::Logvol, name);
            let location = SpecLocation::from(&reference);
            Self::expect_kind(&entry.volgroup, RefKind::Volgroup, &location)?;
            let vg = self.lookup(&entry.volgroup, &location)?;
            let (vg_name, extent_size) = match self.engine.device(vg) {
                Some(device) => (device.name.clone(), extent_size_of(device.layout.as_ref())),
                None => return Err(ResolveError::unresolved(location, &entry.volgroup)),
            };
            let full_name = format!("{vg_name}-{name}");

            let id = if entry.use_existing || entry.no_format {
                let device = self
                    .engine
                    .by_name(&full_name)
                    .ok_or_else(|| ResolveError::unresolved(location.clone(), &full_name))?;
                let resize_to = self.resize_target(entry.resize, entry.size.as_ref(), &location)?;
                self.reuse(&reference, device, entry.no_format, resize_to, &location)?;
                device
            } else {
                self.ensure_unused(&full_name, &location)?;
                let percent = entry
                    .percent
                    .map(|percent| size::percent(percent, &location))
                    .transpose()?;
                let (size, grow) = match (&entry.size, percent) {
                    (Some(expr), _) => {
                        let (size, grow) = size::resolve(expr, CONFIG_UNIT, &location)?.request();
                        (size, grow || entry.grow)
                    }
                    (None, Some(_)) => (None, false),
                    (None, None) if entry.grow => (None, true),
                    (None, None) => {
                        return Err(ResolveError::spec(location, Violation::SizeRequired));
                    }
                };
                if percent.is_none() && !grow && size.is_some_and(|size| size < extent_size) {
                    return Err(ResolveError::spec(location, Violation::SmallerThanExtent));
                }
                let max_size = entry
                    .max_size
                    .as_ref()
                    .map(|max| size::resolve_fixed(max, CONFIG_UNIT, &location))
                    .transpose()?;

                self.reclaim_for(&reference)?;
                let request = DeviceRequest::new(DeviceLayout::LogicalVolume { percent }, vec![vg])
                    .named(name.clone())
                    .with_size(size, grow)
                    .with_max_size(max_size);
                self.engine.create_device(request)?
            };

            let id = if self.kept.contains(&reference) {
                id
            } else {
                self.encrypt(id, entry.encryption.as_ref(), &location)?
            };
            self.built.insert(reference, id);
        }
        Ok(())
    }

    fn btrfs_volumes(&mut self) -> Result<()> {
        let config = self.config;
        for (name, entry) in &config.storage.btrfs {
            let reference = DeviceRef::new(RefKind::Btrfs, name);
            let location = SpecLocation::from(&reference);
            let members = self.members(&entry.devices, &location)?;

            let id = if entry.use_existing {
                let device = self
                    .engine
                    .by_name(name)
                    .or_else(|| self.engine.by_label(name))
                    .ok_or_else(|| ResolveError::unresolved(location.clone(), format!("btrfs volume {name}")))?;
                self.kept.insert(reference.clone());
                device
            } else {
                if members.is_empty() {
                    return Err(ResolveError::spec(location, Violation::NoMembers));
                }
                self.ensure_unused(name, &location)?;

                let filesystem = config
                    .file_systems
                    .values()
                    .find(|fs| fs.storage == reference);
                let format = FormatSpec::new(FormatKind::Btrfs)
                    .with_mountpoint(
                        self.mounts
                            .get(&reference)
                            .and_then(Assignment::mountpoint)
                            .map(str::to_string),
                    )
                    .with_label(filesystem.and_then(|fs| fs.label.clone()))
                    .with_mount_options(filesystem.and_then(FileSystemEntry::mount_options))
                    .with_profile(filesystem.and_then(|fs| fs.profile.clone()));

                for &member in &members {
                    format_member(&mut *self.engine, member, FormatKind::Btrfs)?;
                }
                self.reclaim_for(&reference)?;
                let request = DeviceRequest::new(
                    DeviceLayout::Btrfs {
                        data_level: entry.data.clone(),
                        metadata_level: entry.metadata.clone(),
                        subvolume: false,
                    },
                    members,
                )
                .named(name.clone())
                .with_format(Some(format));
                self.engine.create_device(request)?
            };
            self.built.insert(reference, id);
        }
        Ok(())
    }

    fn file_systems(&mut self) -> Result<()> {
        let config = self.config;
        for (target, entry) in &config.file_systems {
            let location = SpecLocation::FileSystem(target.clone());
            let reference = &entry.storage;
            let device = self.lookup(reference, &location)?;
            let (role, mountpoint) = match self.mounts.get(reference) {
                Some(assignment) => (assignment.role.clone(), assignment.mountpoint()),
                None => return Err(ResolveError::unresolved(location, reference)),
            };

            if self.kept.contains(reference) {
                defer_mount(
                    &mut *self.engine,
                    &mut *self.ctx,
                    device,
                    mountpoint,
                    entry.mount_options(),
                )?;
                continue;
            }
            if reference.kind == RefKind::Btrfs {
                continue;
            }

            let kind = self.format_kind(&role, entry, &location)?;
            let options = entry
                .mount_options()
                .or_else(|| (kind == FormatKind::Efi).then(|| EFI_MOUNT_OPTIONS.to_string()));
            let format = FormatSpec::new(kind)
                .with_mountpoint(mountpoint.map(str::to_string))
                .with_label(entry.label.clone())
                .with_mount_options(options)
                .with_profile(entry.profile.clone());

            if let Some(mountpoint) = mountpoint {
                let owner = self.engine.mountpoint_owner(mountpoint);
                if owner.is_some_and(|owner| owner != device) {
                    reclaim::reclaim(&mut *self.engine, mountpoint)?;
                }
            }
            debug!("{location}: {format} on {}", self.name_of(device));
            self.engine.format_device(device, format)?;
        }
        Ok(())
    }

    fn format_kind(
        &self,
        role: &MountRole,
        entry: &FileSystemEntry,
        location: &SpecLocation,
    ) -> Result<FormatKind> {
        if let Some(kind) = role.implied_format() {
            return Ok(kind);
        }
        match &entry.fs_type {
            Some(fs_type) => FormatKind::parse(fs_type).ok_or_else(|| {
                ResolveError::spec(location.clone(), Violation::UnsupportedFormat(fs_type.clone()))
            }),
            None if role.mountpoint() == Some("/boot") => Ok(self.ctx.options.default_boot_fs_type),
            None => Ok(self.ctx.options.default_fs_type),
        }
    }

    fn swap_devices(&mut self) -> Result<()> {
        let config = self.config;
        for (index, entry) in config.swap_devices.iter().enumerate() {
            let location = SpecLocation::SwapDevice(index);
            let device = self.lookup(&entry.storage, &location)?;
            if self.kept.contains(&entry.storage) {
                continue;
            }
            self.engine.format_device(
                device,
                FormatSpec::new(FormatKind::Swap).with_label(entry.label.clone()),
            )?;
        }
        Ok(())
    }
}

/// Give a composite member the format its container expects.
pub(crate) fn format_member<E: StorageEngine + ?Sized>(
    engine: &mut E,
    member: DeviceId,
    kind: FormatKind,
) -> Result<()> {
    let Some(device) = engine.device(member) else {
        return Err(StorageError::not_found(format!("no device {member}")).into());
    };
    let pending_member = device
        .format
        .as_ref()
        .is_some_and(|format| format.spec.kind == kind && !format.exists);
    if pending_member {
        return Ok(());
    }
    if !engine.children(member).is_empty() {
        return Err(StorageError::conflict(format!(
            "{} is still in use and cannot become a {kind} member",
            device.name
        ))
        .into());
    }
    engine.format_device(member, FormatSpec::new(kind))?;
    Ok(())
}

/// Record mount metadata on a reused device that keeps its format.
pub(crate) fn defer_mount<E: StorageEngine + ?Sized>(
    engine: &mut E,
    ctx: &mut ResolveContext,
    device: DeviceId,
    mountpoint: Option<&str>,
    options: Option<String>,
) -> Result<()> {
    engine.set_deferred_mount(device, mountpoint.map(str::to_string), options.clone())?;
    let name = engine
        .device(device)
        .map(|node| node.name.clone())
        .unwrap_or_else(|| device.to_string());
    ctx.record_deferred(DeferredMount {
        device,
        name,
        mountpoint: mountpoint.map(str::to_string),
        options,
    });
    Ok(())
}

/// Physical extent size of a volume group; existing groups use the default.
fn extent_size_of(layout: Option<&DeviceLayout>) -> Bytes {
    match layout {
        Some(DeviceLayout::VolumeGroup { extent_size, .. }) => *extent_size,
        _ => DEFAULT_EXTENT_SIZE,
    }
}
