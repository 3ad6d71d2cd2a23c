// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::StorageEngine;
use storage_types::{
    Bytes, DeviceId, DeviceKind, DeviceLayout, DeviceRequest, LogVolCommand, MountRole,
};
use tracing::debug;

use super::{Execute, Role, apply_format, device_name, reclaim_for};
use crate::context::ResolveContext;
use crate::encryption::EncryptionRequest;
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::graph::defer_mount;
use crate::size::{self, COMMAND_UNIT, DEFAULT_EXTENT_SIZE, ResolvedSize};
use crate::swap::suggest_swap_size;
use crate::{reclaim, resize};

impl Execute for LogVolCommand {
    fn execute<E: StorageEngine + ?Sized>(
        &self,
        engine: &mut E,
        ctx: &mut ResolveContext,
        location: &SpecLocation,
    ) -> Result<()> {
        let role = Role::parse(&self.mountpoint, location)?;
        let encryption = EncryptionRequest::from_options(&self.encryption);
        let (vg, vg_name, extent_size) = volume_group(self, &*engine, ctx, location)?;

        if self.no_format || self.use_existing {
            if self.name.is_empty() {
                return Err(ResolveError::spec(location.clone(), Violation::NameRequired));
            }
            let full_name = format!("{vg_name}-{}", self.name);
            let lv = engine
                .by_name(&full_name)
                .ok_or_else(|| ResolveError::unresolved(location.clone(), &full_name))?;
            let target = resize_target(self, location)?;

            if self.no_format {
                if let Some(target) = target {
                    resize::resize(engine, lv, target, location)?;
                }
                if let Some(mountpoint) = role.mountpoint() {
                    defer_mount(
                        engine,
                        ctx,
                        lv,
                        Some(mountpoint),
                        self.format.fs_options.clone(),
                    )?;
                }
                return Ok(());
            }

            reclaim::remove_existing_format(engine, lv)?;
            if let Some(target) = target {
                resize::resize_device_only(engine, lv, target, location)?;
            }
            let format = role.format(&self.format, ctx, location)?;
            reclaim_for(engine, role.mountpoint(), Some(lv))?;
            apply_format(engine, ctx, lv, format, encryption.as_ref(), location)?;
            return Ok(());
        }

        if !self.name.is_empty() {
            let full_name = format!("{vg_name}-{}", self.name);
            if engine.by_name(&full_name).is_some() {
                return Err(ResolveError::spec(
                    location.clone(),
                    Violation::DuplicateName(full_name),
                ));
            }
        }
        let percent = self
            .percent
            .map(|percent| size::percent(percent, location))
            .transpose()?;
        let (size, grow) = requested_size(self, ctx, &role, percent, location)?;
        if percent.is_none() && !grow && size.is_some_and(|size| size < extent_size) {
            return Err(ResolveError::spec(
                location.clone(),
                Violation::SmallerThanExtent,
            ));
        }
        let max_size = self
            .max_size
            .as_ref()
            .map(|max| size::resolve_fixed(max, COMMAND_UNIT, location))
            .transpose()?;
        let format = role.format(&self.format, ctx, location)?;

        reclaim_for(engine, role.mountpoint(), None)?;
        let mut request = DeviceRequest::new(DeviceLayout::LogicalVolume { percent }, vec![vg])
            .with_size(size, grow)
            .with_max_size(max_size);
        if !self.name.is_empty() {
            request = request.named(self.name.clone());
        }

        match &encryption {
            Some(_) => {
                let lv = engine.create_device(request)?;
                apply_format(engine, ctx, lv, format, encryption.as_ref(), location)?;
            }
            None => {
                let lv = engine.create_device(request.with_format(Some(format)))?;
                debug!("{location}: new logical volume {}", device_name(&*engine, lv));
            }
        }
        Ok(())
    }
}

/// The target volume group, its name and its extent size.
fn volume_group<E: StorageEngine + ?Sized>(
    command: &LogVolCommand,
    engine: &E,
    ctx: &ResolveContext,
    location: &SpecLocation,
) -> Result<(DeviceId, String, Bytes)> {
    let node = engine
        .by_name(ctx.remapped(&command.vg_name))
        .and_then(|id| engine.device(id))
        .filter(|node| node.kind == DeviceKind::VolumeGroup)
        .ok_or_else(|| {
            ResolveError::unresolved(location.clone(), format!("volume group {}", command.vg_name))
        })?;
    let extent_size = match &node.layout {
        Some(DeviceLayout::VolumeGroup { extent_size, .. }) => *extent_size,
        _ => DEFAULT_EXTENT_SIZE,
    };
    Ok((node.id, node.name.clone(), extent_size))
}

fn resize_target(command: &LogVolCommand, location: &SpecLocation) -> Result<Option<Bytes>> {
    if !command.resize {
        return Ok(None);
    }
    let expr = command
        .size
        .as_ref()
        .ok_or_else(|| ResolveError::spec(location.clone(), Violation::SizeRequired))?;
    size::resolve_fixed(expr, COMMAND_UNIT, location).map(Some)
}

fn requested_size(
    command: &LogVolCommand,
    ctx: &ResolveContext,
    role: &Role,
    percent: Option<u8>,
    location: &SpecLocation,
) -> Result<(Option<Bytes>, bool)> {
    let swap = *role == Role::Mount(MountRole::Swap);
    if swap && (command.recommended || command.hibernation) {
        let size = suggest_swap_size(ctx.options.total_memory, command.hibernation);
        return Ok((Some(size), false));
    }
    match (&command.size, percent) {
        (Some(expr), _) => match size::resolve(expr, COMMAND_UNIT, location)? {
            ResolvedSize::Fixed(bytes) => Ok((Some(bytes), command.grow)),
            ResolvedSize::Grow => Ok((None, true)),
        },
        (None, Some(_)) => Ok((None, false)),
        (None, None) if command.grow => Ok((None, true)),
        (None, None) => Err(ResolveError::spec(location.clone(), Violation::SizeRequired)),
    }
}

#[cfg(test)]
mod tests {
    use storage_sys::{Inventory, InventoryDevice, SimulatedTree};
    use storage_types::{
        ActionKind, CommandKind, DiskLabelType, FilesystemType, FormatKind, GIB, MIB,
        SizeExpression,
    };

    use super::*;

    fn lab() -> SimulatedTree {
        let mut sda = InventoryDevice::new("sda", DeviceKind::Disk, 40 * GIB);
        sda.format = Some(FormatKind::DiskLabel(DiskLabelType::Gpt));
        let mut sda1 = InventoryDevice::new("sda1", DeviceKind::Partition, 30 * GIB);
        sda1.parents = vec!["sda".to_string()];
        sda1.partition_number = Some(1);
        sda1.format = Some(FormatKind::LvmPv);
        let mut vg = InventoryDevice::new("vg0", DeviceKind::VolumeGroup, 30 * GIB);
        vg.parents = vec!["sda1".to_string()];
        let mut home = InventoryDevice::new("vg0-home", DeviceKind::LogicalVolume, 10 * GIB);
        home.parents = vec!["vg0".to_string()];
        home.format = Some(FormatKind::Filesystem(FilesystemType::Ext4));

        let mut tree = SimulatedTree::from_inventory(Inventory {
            devices: vec![sda, sda1, vg, home],
        });
        tree.reset().unwrap();
        tree
    }

    fn here() -> SpecLocation {
        SpecLocation::command(1, CommandKind::LogVol)
    }

    fn logvol(mountpoint: &str, name: &str) -> LogVolCommand {
        LogVolCommand {
            mountpoint: mountpoint.to_string(),
            name: name.to_string(),
            vg_name: "vg0".to_string(),
            ..LogVolCommand::default()
        }
    }

    #[test]
    fn percent_volumes_in_an_existing_group() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = LogVolCommand {
            percent: Some(50),
            ..logvol("/", "root")
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        let root = tree.by_name("vg0-root").unwrap();
        let node = tree.device(root).unwrap();
        assert_eq!(node.layout, Some(DeviceLayout::LogicalVolume { percent: Some(50) }));
        assert_eq!(tree.mountpoint_owner("/"), Some(root));
    }

    #[test]
    fn size_rules() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();

        let error = logvol("/srv", "srv")
            .execute(&mut tree, &mut ctx, &here())
            .unwrap_err();
        assert_eq!(error.violation(), Some(&Violation::SizeRequired));

        let error = LogVolCommand {
            size: Some(SizeExpression::scalar(2u64, "MiB")),
            ..logvol("/srv", "srv")
        }
        .execute(&mut tree, &mut ctx, &here())
        .unwrap_err();
        assert_eq!(error.violation(), Some(&Violation::SmallerThanExtent));

        LogVolCommand {
            size: Some(SizeExpression::scalar(2u64, "MiB")),
            grow: true,
            ..logvol("/srv", "srv")
        }
        .execute(&mut tree, &mut ctx, &here())
        .unwrap();
        let srv = tree.by_name("vg0-srv").unwrap();
        assert_eq!(tree.device(srv).unwrap().size, 2 * MIB);
    }

    #[test]
    fn name_reuse_is_rejected() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let error = LogVolCommand {
            grow: true,
            ..logvol("/home", "home")
        }
        .execute(&mut tree, &mut ctx, &here())
        .unwrap_err();
        assert_eq!(
            error.violation(),
            Some(&Violation::DuplicateName("vg0-home".to_string()))
        );
    }

    #[test]
    fn existing_volumes_are_resized_and_kept() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = LogVolCommand {
            no_format: true,
            resize: true,
            size: Some(SizeExpression::scalar(12u64, "GiB")),
            ..logvol("/home", "home")
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        let kinds: Vec<ActionKind> = tree.actions().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, [ActionKind::ResizeDevice, ActionKind::ResizeFormat]);
        assert_eq!(tree.mountpoint_owner("/home"), tree.by_name("vg0-home"));
    }

    #[test]
    fn unknown_volume_groups() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = LogVolCommand {
            vg_name: "vg9".to_string(),
            grow: true,
            ..logvol("/", "root")
        };
        assert!(matches!(
            command.execute(&mut tree, &mut ctx, &here()),
            Err(ResolveError::UnresolvedParent { .. })
        ));
    }
}
