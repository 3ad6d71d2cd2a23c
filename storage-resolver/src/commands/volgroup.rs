// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::StorageEngine;
use storage_types::{
    Bytes, DeviceKind, DeviceLayout, DeviceRequest, FormatKind, KIB, VgReserve, VolGroupCommand,
};
use tracing::debug;

use super::{Execute, device_name, member_device};
use crate::context::ResolveContext;
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::graph::format_member;
use crate::size::{self, COMMAND_UNIT, DEFAULT_EXTENT_SIZE};

impl Execute for VolGroupCommand {
    fn execute<E: StorageEngine + ?Sized>(
        &self,
        engine: &mut E,
        ctx: &mut ResolveContext,
        location: &SpecLocation,
    ) -> Result<()> {
        let members = self
            .physical_volumes
            .iter()
            .map(|spec| member_device(&*engine, &*ctx, spec, location))
            .collect::<Result<Vec<_>>>()?;

        if self.no_format || self.use_existing {
            if self.name.is_empty() {
                return Err(ResolveError::spec(location.clone(), Violation::NameRequired));
            }
            let exists = engine.by_name(&self.name).is_some_and(|id| {
                engine
                    .device(id)
                    .is_some_and(|node| node.kind == DeviceKind::VolumeGroup)
            });
            if !exists {
                return Err(ResolveError::unresolved(
                    location.clone(),
                    format!("volume group {}", self.name),
                ));
            }
            return Ok(());
        }

        if members.is_empty() {
            return Err(ResolveError::spec(location.clone(), Violation::NoMembers));
        }
        if !self.name.is_empty() && engine.by_name(&self.name).is_some() {
            return Err(ResolveError::spec(
                location.clone(),
                Violation::DuplicateName(self.name.clone()),
            ));
        }
        let extent_size = match self.pe_size {
            Some(kib) => size::extent_size(Bytes::from(kib) * KIB, location)?,
            None => DEFAULT_EXTENT_SIZE,
        };
        let reserve = match (&self.reserved_space, self.reserved_percent) {
            (Some(space), _) => Some(VgReserve::Space(size::resolve_fixed(
                space,
                COMMAND_UNIT,
                location,
            )?)),
            (None, Some(percent)) if percent >= 100 => {
                return Err(ResolveError::spec(
                    location.clone(),
                    Violation::InvalidReserve(percent),
                ));
            }
            (None, Some(percent)) => Some(VgReserve::Percent(percent)),
            (None, None) => None,
        };

        for &member in &members {
            format_member(engine, member, FormatKind::LvmPv)?;
        }
        let mut request = DeviceRequest::new(
            DeviceLayout::VolumeGroup {
                extent_size,
                reserve,
            },
            members,
        );
        if !self.name.is_empty() {
            request = request.named(self.name.clone());
        }
        let vg = engine.create_device(request)?;
        let name = device_name(&*engine, vg);
        debug!("{location}: new volume group {name}");
        if !self.name.is_empty() {
            ctx.set_remap(self.name.clone(), name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use storage_sys::{Inventory, InventoryDevice, SimulatedTree};
    use storage_types::{CommandKind, DiskLabelType, GIB, MIB};

    use super::*;

    fn lab() -> SimulatedTree {
        let mut sda = InventoryDevice::new("sda", DeviceKind::Disk, 40 * GIB);
        sda.format = Some(FormatKind::DiskLabel(DiskLabelType::Gpt));
        let mut sda1 = InventoryDevice::new("sda1", DeviceKind::Partition, 20 * GIB);
        sda1.parents = vec!["sda".to_string()];
        sda1.partition_number = Some(1);
        let mut sda2 = InventoryDevice::new("sda2", DeviceKind::Partition, 10 * GIB);
        sda2.parents = vec!["sda".to_string()];
        sda2.partition_number = Some(2);
        sda2.format = Some(FormatKind::LvmPv);
        let mut old = InventoryDevice::new("old", DeviceKind::VolumeGroup, 10 * GIB);
        old.parents = vec!["sda2".to_string()];

        let mut tree = SimulatedTree::from_inventory(Inventory {
            devices: vec![sda, sda1, sda2, old],
        });
        tree.reset().unwrap();
        tree
    }

    fn here() -> SpecLocation {
        SpecLocation::command(1, CommandKind::VolGroup)
    }

    fn volgroup(name: &str, members: &[&str]) -> VolGroupCommand {
        VolGroupCommand {
            name: name.to_string(),
            physical_volumes: members.iter().map(|m| m.to_string()).collect(),
            ..VolGroupCommand::default()
        }
    }

    #[test]
    fn members_become_physical_volumes() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        ctx.set_remap("pv.01", "sda1");
        let command = VolGroupCommand {
            pe_size: Some(32 * 1024),
            ..volgroup("vg0", &["pv.01"])
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        let vg = tree.by_name("vg0").unwrap();
        let node = tree.device(vg).unwrap();
        assert_eq!(
            node.layout,
            Some(DeviceLayout::VolumeGroup {
                extent_size: 32 * MIB,
                reserve: None,
            })
        );
        let pv = tree.by_name("sda1").unwrap();
        assert_eq!(tree.device(pv).unwrap().format_kind(), Some(FormatKind::LvmPv));
        assert_eq!(ctx.remapped("vg0"), "vg0");
    }

    #[test]
    fn invalid_extent_and_reserve() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let error = VolGroupCommand {
            pe_size: Some(3000),
            ..volgroup("vg0", &["sda1"])
        }
        .execute(&mut tree, &mut ctx, &here())
        .unwrap_err();
        assert!(matches!(
            error.violation(),
            Some(Violation::InvalidExtentSize(_))
        ));

        let error = VolGroupCommand {
            reserved_percent: Some(100),
            ..volgroup("vg0", &["sda1"])
        }
        .execute(&mut tree, &mut ctx, &here())
        .unwrap_err();
        assert_eq!(error.violation(), Some(&Violation::InvalidReserve(100)));
        assert!(tree.actions().is_empty());
    }

    #[test]
    fn names_and_existing_groups() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();

        let error = volgroup("old", &["sda1"])
            .execute(&mut tree, &mut ctx, &here())
            .unwrap_err();
        assert_eq!(
            error.violation(),
            Some(&Violation::DuplicateName("old".to_string()))
        );

        let reuse = VolGroupCommand {
            use_existing: true,
            ..volgroup("old", &[])
        };
        reuse.execute(&mut tree, &mut ctx, &here()).unwrap();

        let missing = VolGroupCommand {
            no_format: true,
            ..volgroup("nope", &[])
        };
        assert!(matches!(
            missing.execute(&mut tree, &mut ctx, &here()),
            Err(ResolveError::UnresolvedParent { .. })
        ));

        let error = volgroup("vg1", &[])
            .execute(&mut tree, &mut ctx, &here())
            .unwrap_err();
        assert_eq!(error.violation(), Some(&Violation::NoMembers));
        assert!(tree.actions().is_empty());
    }
}
