// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::StorageEngine;
use storage_types::{
    BtrfsCommand, DeviceKind, DeviceLayout, DeviceRequest, FormatKind, FormatSpec, MountRole,
};
use tracing::debug;

use super::{Execute, Role, device_name, member_device, reclaim_for};
use crate::context::ResolveContext;
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::graph::{defer_mount, format_member};

impl Execute for BtrfsCommand {
    fn execute<E: StorageEngine + ?Sized>(
        &self,
        engine: &mut E,
        ctx: &mut ResolveContext,
        location: &SpecLocation,
    ) -> Result<()> {
        let mountpoint = match Role::parse(&self.mountpoint, location)? {
            Role::Mount(MountRole::Path(path)) => Some(path),
            Role::Mount(MountRole::Unmounted) => None,
            _ => {
                return Err(ResolveError::spec(
                    location.clone(),
                    Violation::InvalidMountpoint(self.mountpoint.clone()),
                ));
            }
        };
        let members = self
            .devices
            .iter()
            .map(|spec| member_device(&*engine, &*ctx, spec, location))
            .collect::<Result<Vec<_>>>()?;
        let name = if self.subvol {
            self.name.clone()
        } else {
            self.label.clone()
        };

        if self.use_existing {
            let volume = name
                .as_deref()
                .and_then(|name| engine.by_name(name).or_else(|| engine.by_label(name)))
                .ok_or_else(|| {
                    ResolveError::unresolved(
                        location.clone(),
                        format!("btrfs volume {}", name.as_deref().unwrap_or("(unnamed)")),
                    )
                })?;
            if let Some(mountpoint) = &mountpoint {
                defer_mount(engine, ctx, volume, Some(mountpoint.as_str()), None)?;
            }
            return Ok(());
        }

        if members.is_empty() {
            return Err(ResolveError::spec(location.clone(), Violation::NoMembers));
        }
        if let Some(name) = &name {
            if engine.by_name(name).is_some() {
                return Err(ResolveError::spec(
                    location.clone(),
                    Violation::DuplicateName(name.clone()),
                ));
            }
        }

        let format = FormatSpec::new(FormatKind::Btrfs)
            .with_mountpoint(mountpoint.clone())
            .with_label(self.label.clone());
        let request = if self.subvol {
            let Some(subvolume) = name else {
                return Err(ResolveError::spec(location.clone(), Violation::NameRequired));
            };
            let [parent] = members.as_slice() else {
                return Err(ResolveError::spec(
                    location.clone(),
                    Violation::InvalidCommand(
                        "a subvolume needs exactly one parent volume".to_string(),
                    ),
                ));
            };
            let parent_is_volume = engine
                .device(*parent)
                .is_some_and(|node| node.kind == DeviceKind::Btrfs);
            if !parent_is_volume {
                return Err(ResolveError::unresolved(
                    location.clone(),
                    format!("btrfs volume {}", self.devices.join(" ")),
                ));
            }
            DeviceRequest::new(
                DeviceLayout::Btrfs {
                    data_level: None,
                    metadata_level: None,
                    subvolume: true,
                },
                vec![*parent],
            )
            .named(subvolume)
        } else {
            for &member in &members {
                format_member(engine, member, FormatKind::Btrfs)?;
            }
            let request = DeviceRequest::new(
                DeviceLayout::Btrfs {
                    data_level: self.data_level.clone(),
                    metadata_level: self.metadata_level.clone(),
                    subvolume: false,
                },
                members,
            );
            match name {
                Some(name) => request.named(name),
                None => request,
            }
        };

        reclaim_for(engine, mountpoint.as_deref(), None)?;
        let volume = engine.create_device(request.with_format(Some(format)))?;
        debug!("{location}: new btrfs device {}", device_name(&*engine, volume));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use storage_sys::{Inventory, InventoryDevice, SimulatedTree};
    use storage_types::{CommandKind, DiskLabelType, GIB};

    use super::*;

    fn lab() -> SimulatedTree {
        let mut devices = Vec::new();
        for disk in ["sda", "sdb"] {
            let mut node = InventoryDevice::new(disk, DeviceKind::Disk, 20 * GIB);
            node.format = Some(FormatKind::DiskLabel(DiskLabelType::Gpt));
            let mut part =
                InventoryDevice::new(&format!("{disk}1"), DeviceKind::Partition, 10 * GIB);
            part.parents = vec![disk.to_string()];
            part.partition_number = Some(1);
            devices.extend([node, part]);
        }
        let mut tree = SimulatedTree::from_inventory(Inventory { devices });
        tree.reset().unwrap();
        tree
    }

    fn here() -> SpecLocation {
        SpecLocation::command(1, CommandKind::Btrfs)
    }

    #[test]
    fn volume_then_subvolume() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        ctx.set_remap("btrfs.01", "sda1");
        ctx.set_remap("btrfs.02", "sdb1");

        let volume = BtrfsCommand {
            mountpoint: "none".to_string(),
            label: Some("fedora".to_string()),
            devices: vec!["btrfs.01".to_string(), "btrfs.02".to_string()],
            data_level: Some("raid1".to_string()),
            ..BtrfsCommand::default()
        };
        volume.execute(&mut tree, &mut ctx, &here()).unwrap();
        let fedora = tree.by_name("fedora").unwrap();
        assert_eq!(tree.device(fedora).unwrap().parents.len(), 2);

        let home = BtrfsCommand {
            mountpoint: "/home".to_string(),
            name: Some("home".to_string()),
            devices: vec!["fedora".to_string()],
            subvol: true,
            ..BtrfsCommand::default()
        };
        home.execute(&mut tree, &mut ctx, &here()).unwrap();
        let home = tree.by_name("home").unwrap();
        assert_eq!(tree.mountpoint_owner("/home"), Some(home));
        assert_eq!(tree.device(home).unwrap().parents, vec![fedora]);
    }

    #[test]
    fn volumes_need_members_and_a_valid_mountpoint() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let error = BtrfsCommand {
            mountpoint: "/".to_string(),
            ..BtrfsCommand::default()
        }
        .execute(&mut tree, &mut ctx, &here())
        .unwrap_err();
        assert_eq!(error.violation(), Some(&Violation::NoMembers));

        let error = BtrfsCommand {
            mountpoint: "swap".to_string(),
            devices: vec!["sda1".to_string()],
            ..BtrfsCommand::default()
        }
        .execute(&mut tree, &mut ctx, &here())
        .unwrap_err();
        assert!(matches!(
            error.violation(),
            Some(Violation::InvalidMountpoint(_))
        ));
        assert!(tree.actions().is_empty());
    }
}
