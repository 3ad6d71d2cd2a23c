// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::StorageEngine;
use storage_types::{
    Bytes, DeviceId, DeviceLayout, DeviceRequest, MIB, MountRole, PartitionCommand,
};
use tracing::debug;

use super::{Execute, Role, apply_format, device_name, prepare_disk, reclaim_for};
use crate::context::ResolveContext;
use crate::encryption::EncryptionRequest;
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::graph::defer_mount;
use crate::size::{self, COMMAND_UNIT, ResolvedSize};
use crate::swap::suggest_swap_size;
use crate::{matcher, reclaim, resize};

/// Size of a partition command without `size`.
const DEFAULT_PARTITION_SIZE: Bytes = 500 * MIB;

impl Execute for PartitionCommand {
    fn execute<E: StorageEngine + ?Sized>(
        &self,
        engine: &mut E,
        ctx: &mut ResolveContext,
        location: &SpecLocation,
    ) -> Result<()> {
        let role = Role::parse(&self.mountpoint, location)?;
        let encryption = EncryptionRequest::from_options(&self.encryption);

        if let Some(on_part) = &self.on_part {
            let device = matcher::resolve_devspec(&*engine, on_part)
                .ok_or_else(|| ResolveError::unresolved(location.clone(), on_part))?;
            if let Some(member) = role.member_name() {
                ctx.set_remap(member, device_name(&*engine, device));
            }
            return reuse(self, engine, ctx, &role, device, encryption.as_ref(), location);
        }

        if self.no_format {
            return Err(ResolveError::spec(
                location.clone(),
                Violation::NoFormatWithoutOnPart,
            ));
        }
        if let Some(member) = role.member_name() {
            if engine.by_name(member).is_some() {
                return Err(ResolveError::spec(
                    location.clone(),
                    Violation::DuplicateName(member.to_string()),
                ));
            }
        }

        let disk = target_disk(self, engine, ctx, location)?;
        let (size, grow) = requested_size(self, ctx, &role, location)?;
        let max_size = self
            .max_size
            .as_ref()
            .map(|max| size::resolve_fixed(max, COMMAND_UNIT, location))
            .transpose()?;
        let format = role.format(&self.format, ctx, location)?;

        reclaim_for(engine, role.mountpoint(), None)?;
        let request = DeviceRequest::new(
            DeviceLayout::Partition {
                primary: self.primary,
            },
            vec![disk],
        )
        .with_alias(role.member_name().map(str::to_string))
        .with_size(size, grow)
        .with_max_size(max_size);

        match &encryption {
            Some(request_encryption) => {
                let id = engine.create_device(request)?;
                apply_format(engine, ctx, id, format, Some(request_encryption), location)?;
            }
            None => {
                let id = engine.create_device(request.with_format(Some(format)))?;
                debug!("{location}: new partition {}", device_name(&*engine, id));
            }
        }
        Ok(())
    }
}

/// Reuse the existing device named by `onpart`.
fn reuse<E: StorageEngine + ?Sized>(
    command: &PartitionCommand,
    engine: &mut E,
    ctx: &mut ResolveContext,
    role: &Role,
    device: DeviceId,
    encryption: Option<&EncryptionRequest>,
    location: &SpecLocation,
) -> Result<()> {
    let target = if command.resize {
        let expr = command
            .size
            .as_ref()
            .ok_or_else(|| ResolveError::spec(location.clone(), Violation::SizeRequired))?;
        Some(size::resolve_fixed(expr, COMMAND_UNIT, location)?)
    } else {
        None
    };

    if command.no_format {
        if let Some(target) = target {
            resize::resize(engine, device, target, location)?;
        }
        if let Some(mountpoint) = role.mountpoint() {
            defer_mount(
                engine,
                ctx,
                device,
                Some(mountpoint),
                command.format.fs_options.clone(),
            )?;
        }
        return Ok(());
    }

    reclaim::remove_existing_format(engine, device)?;
    if let Some(target) = target {
        resize::resize_device_only(engine, device, target, location)?;
    }
    let format = role.format(&command.format, ctx, location)?;
    reclaim_for(engine, role.mountpoint(), Some(device))?;
    apply_format(engine, ctx, device, format, encryption, location)?;
    Ok(())
}

/// The disk named by `ondisk`, or the first usable one.
fn target_disk<E: StorageEngine + ?Sized>(
    command: &PartitionCommand,
    engine: &mut E,
    ctx: &ResolveContext,
    location: &SpecLocation,
) -> Result<DeviceId> {
    let Some(spec) = &command.on_disk else {
        for disk in ctx.usable_disks(&*engine) {
            if prepare_disk(engine, ctx, disk)? {
                return Ok(disk);
            }
        }
        return Err(ResolveError::spec(location.clone(), Violation::NoUsableDisk));
    };

    let found = [spec.clone(), format!("mapper/{spec}")]
        .iter()
        .find_map(|candidate| matcher::resolve_devspec(&*engine, candidate))
        .ok_or_else(|| {
            ResolveError::spec(location.clone(), Violation::NonexistentDisk(spec.clone()))
        })?;
    let disk = matcher::promote_multipath(&*engine, found);
    let Some(node) = engine.device(disk) else {
        return Err(ResolveError::unresolved(location.clone(), spec));
    };
    let name = node.name.clone();
    if !node.kind.is_partitionable() || node.protected {
        return Err(ResolveError::spec(
            location.clone(),
            Violation::NotPartitionable(name),
        ));
    }
    if !prepare_disk(engine, ctx, disk)? {
        return Err(ResolveError::spec(
            location.clone(),
            Violation::Unpartitioned(name),
        ));
    }
    Ok(disk)
}

fn requested_size(
    command: &PartitionCommand,
    ctx: &ResolveContext,
    role: &Role,
    location: &SpecLocation,
) -> Result<(Option<Bytes>, bool)> {
    let swap = *role == Role::Mount(MountRole::Swap);
    if swap && (command.recommended || command.hibernation) {
        let size = suggest_swap_size(ctx.options.total_memory, command.hibernation);
        return Ok((Some(size), false));
    }
    match &command.size {
        Some(expr) => match size::resolve(expr, COMMAND_UNIT, location)? {
            ResolvedSize::Fixed(bytes) => Ok((Some(bytes), command.grow)),
            ResolvedSize::Grow => Ok((None, true)),
        },
        None => Ok((Some(DEFAULT_PARTITION_SIZE), command.grow)),
    }
}

#[cfg(test)]
mod tests {
    use storage_sys::{Inventory, InventoryDevice, SimulatedTree};
    use storage_types::{
        ActionKind, CommandKind, DeviceKind, DiskLabelType, EncryptionOptions, FilesystemType,
        FormatKind, FormatOptions, GIB, SizeExpression,
    };

    use super::*;

    fn lab() -> SimulatedTree {
        let mut sda = InventoryDevice::new("sda", DeviceKind::Disk, 40 * GIB);
        sda.format = Some(FormatKind::DiskLabel(DiskLabelType::Gpt));
        let mut sda1 = InventoryDevice::new("sda1", DeviceKind::Partition, 10 * GIB);
        sda1.parents = vec!["sda".to_string()];
        sda1.format = Some(FormatKind::Filesystem(FilesystemType::Ext4));
        sda1.partition_number = Some(1);
        let sdb = InventoryDevice::new("sdb", DeviceKind::Disk, 40 * GIB);

        let mut tree = SimulatedTree::from_inventory(Inventory {
            devices: vec![sda, sda1, sdb],
        });
        tree.reset().unwrap();
        tree
    }

    fn here() -> SpecLocation {
        SpecLocation::command(1, CommandKind::Partition)
    }

    fn part(mountpoint: &str) -> PartitionCommand {
        PartitionCommand {
            mountpoint: mountpoint.to_string(),
            ..PartitionCommand::default()
        }
    }

    #[test]
    fn boot_and_efi_get_their_formats() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        part("/boot/efi").execute(&mut tree, &mut ctx, &here()).unwrap();
        part("/boot").execute(&mut tree, &mut ctx, &here()).unwrap();

        let efi = tree.mountpoint_owner("/boot/efi").unwrap();
        let efi = tree.device(efi).unwrap();
        assert_eq!(efi.format_kind(), Some(FormatKind::Efi));
        assert_eq!(efi.size, DEFAULT_PARTITION_SIZE);
        assert_eq!(
            efi.format.as_ref().unwrap().spec.mount_options.as_deref(),
            Some(storage_types::EFI_MOUNT_OPTIONS)
        );
        assert!(tree.mountpoint_owner("/boot").is_some());
    }

    #[test]
    fn recommended_swap_follows_memory() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        ctx.options.total_memory = 4 * GIB;
        let command = PartitionCommand {
            hibernation: true,
            ..part("swap")
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        let swap = tree
            .devices()
            .iter()
            .find(|d| d.format_kind() == Some(FormatKind::Swap))
            .unwrap();
        assert_eq!(swap.size, 8 * GIB);
    }

    #[test]
    fn member_roles_alias_the_partition() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = PartitionCommand {
            size: Some(SizeExpression::Fill),
            on_disk: Some("sda".to_string()),
            ..part("pv.01")
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();
        let pv = tree.by_name("pv.01").unwrap();
        let node = tree.device(pv).unwrap();
        assert_eq!(node.name, "sda2");
        assert!(node.grow);
        assert_eq!(node.format_kind(), Some(FormatKind::LvmPv));

        let error = command.execute(&mut tree, &mut ctx, &here()).unwrap_err();
        assert_eq!(
            error.violation(),
            Some(&Violation::DuplicateName("pv.01".to_string()))
        );
    }

    #[test]
    fn onpart_reuses_and_reformats() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = PartitionCommand {
            on_part: Some("sda1".to_string()),
            format: FormatOptions {
                fs_type: Some("xfs".to_string()),
                ..FormatOptions::default()
            },
            ..part("/srv")
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        let kinds: Vec<ActionKind> = tree.actions().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, [ActionKind::DestroyFormat, ActionKind::CreateFormat]);
        assert_eq!(tree.mountpoint_owner("/srv"), tree.by_name("sda1"));
    }

    #[test]
    fn noformat_only_records_the_mount() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = PartitionCommand {
            on_part: Some("/dev/sda1".to_string()),
            no_format: true,
            ..part("/home")
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();
        assert!(tree.actions().is_empty());
        assert_eq!(ctx.deferred_mounts().len(), 1);

        let error = PartitionCommand {
            no_format: true,
            ..part("/home")
        }
        .execute(&mut tree, &mut ctx, &here())
        .unwrap_err();
        assert_eq!(error.violation(), Some(&Violation::NoFormatWithoutOnPart));
    }

    #[test]
    fn ondisk_must_be_usable() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();

        let missing = PartitionCommand {
            on_disk: Some("sdz".to_string()),
            ..part("/")
        };
        assert_eq!(
            missing.execute(&mut tree, &mut ctx, &here()).unwrap_err().violation(),
            Some(&Violation::NonexistentDisk("sdz".to_string()))
        );

        let unlabelled = PartitionCommand {
            on_disk: Some("sdb".to_string()),
            ..part("/")
        };
        assert_eq!(
            unlabelled.execute(&mut tree, &mut ctx, &here()).unwrap_err().violation(),
            Some(&Violation::Unpartitioned("sdb".to_string()))
        );
        assert!(tree.actions().is_empty());
    }

    #[test]
    fn encrypted_partitions_move_the_format_to_the_mapping() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = PartitionCommand {
            size: Some(SizeExpression::scalar(2048u64, "MiB")),
            encryption: EncryptionOptions {
                encrypted: true,
                passphrase: Some("pw".to_string()),
                ..EncryptionOptions::default()
            },
            ..part("/")
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        let root = tree.mountpoint_owner("/").unwrap();
        let root = tree.device(root).unwrap();
        assert_eq!(root.kind, DeviceKind::Luks);
        assert_eq!(ctx.passphrase(), Some("pw"));
    }
}
