// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::StorageEngine;
use storage_types::{
    ClearPartCommand, ClearPartType, DeviceId, DeviceKind, FormatKind, FormatSpec,
};
use tracing::{info, warn};

use super::{Execute, device_name, matching_disks};
use crate::context::{ClearSelection, ResolveContext};
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::{matcher, reclaim};

impl Execute for ClearPartCommand {
    fn execute<E: StorageEngine + ?Sized>(
        &self,
        engine: &mut E,
        ctx: &mut ResolveContext,
        location: &SpecLocation,
    ) -> Result<()> {
        let mut drives = Vec::new();
        for pattern in &self.drives {
            drives.extend(matching_disks(&*engine, pattern, location)?);
        }
        ctx.set_clear_selection(ClearSelection {
            kind: self.kind,
            drives,
            init_all: self.init_all,
        });

        match self.kind {
            ClearPartType::None => Ok(()),
            ClearPartType::List => {
                for spec in &self.devices {
                    let device = matcher::resolve_devspec(&*engine, spec).ok_or_else(|| {
                        ResolveError::spec(
                            location.clone(),
                            Violation::NonexistentDisk(spec.clone()),
                        )
                    })?;
                    if !on_usable_disks(&*engine, ctx, device) {
                        warn!(
                            "{location}: not clearing {}, it sits on an ignored or protected disk",
                            device_name(&*engine, device)
                        );
                        continue;
                    }
                    info!("{location}: clearing {}", device_name(&*engine, device));
                    reclaim::destroy_tree(engine, device)?;
                }
                Ok(())
            }
            ClearPartType::All | ClearPartType::Linux => {
                let disks: Vec<DeviceId> = ctx
                    .usable_disks(&*engine)
                    .into_iter()
                    .filter(|&disk| ctx.should_clear(disk))
                    .collect();
                for disk in disks {
                    clear_disk(self, engine, ctx, disk, location)?;
                }
                Ok(())
            }
        }
    }
}

/// Whether every disk below `id` may be used.
fn on_usable_disks<E: StorageEngine + ?Sized>(
    engine: &E,
    ctx: &ResolveContext,
    id: DeviceId,
) -> bool {
    let mut pending = vec![id];
    while let Some(current) = pending.pop() {
        let Some(node) = engine.device(current) else {
            continue;
        };
        if matches!(node.kind, DeviceKind::Disk | DeviceKind::Multipath) {
            if !ctx.is_usable_disk(node) {
                return false;
            }
            continue;
        }
        pending.extend(node.parents.iter().copied());
    }
    true
}

fn clear_disk<E: StorageEngine + ?Sized>(
    command: &ClearPartCommand,
    engine: &mut E,
    ctx: &ResolveContext,
    disk: DeviceId,
    location: &SpecLocation,
) -> Result<()> {
    let linux_only = command.kind == ClearPartType::Linux;
    let doomed: Vec<DeviceId> = engine
        .children(disk)
        .into_iter()
        .filter(|&child| {
            !linux_only
                || engine
                    .device(child)
                    .and_then(|node| node.format_kind())
                    .is_some_and(|kind| kind.is_linux_native())
        })
        .collect();
    if !doomed.is_empty() {
        info!(
            "{location}: clearing {} device(s) on {}",
            doomed.len(),
            device_name(&*engine, disk)
        );
    }
    for device in doomed {
        reclaim::destroy_tree(engine, device)?;
    }

    let Some(node) = engine.device(disk) else {
        return Ok(());
    };
    let emptied = engine.children(disk).is_empty();
    let relabel = node.kind.is_partitionable()
        && emptied
        && (command.init_all || command.kind == ClearPartType::All || node.format.is_none());
    if relabel {
        let label = command.disklabel.unwrap_or(ctx.options.disklabel);
        engine.format_device(disk, FormatSpec::new(FormatKind::DiskLabel(label)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use storage_sys::{Inventory, InventoryDevice, SimulatedTree};
    use storage_types::{
        ActionKind, CommandKind, DeviceKind, DiskLabelType, FilesystemType, GIB,
    };

    use super::*;

    fn lab() -> SimulatedTree {
        let mut sda = InventoryDevice::new("sda", DeviceKind::Disk, 40 * GIB);
        sda.format = Some(FormatKind::DiskLabel(DiskLabelType::Gpt));
        let mut sda1 = InventoryDevice::new("sda1", DeviceKind::Partition, 10 * GIB);
        sda1.parents = vec!["sda".to_string()];
        sda1.format = Some(FormatKind::Filesystem(FilesystemType::Ntfs));
        sda1.partition_number = Some(1);
        let mut sda2 = InventoryDevice::new("sda2", DeviceKind::Partition, 10 * GIB);
        sda2.parents = vec!["sda".to_string()];
        sda2.format = Some(FormatKind::Filesystem(FilesystemType::Ext4));
        sda2.partition_number = Some(2);
        let sdb = InventoryDevice::new("sdb", DeviceKind::Disk, 40 * GIB);

        let mut tree = SimulatedTree::from_inventory(Inventory {
            devices: vec![sda, sda1, sda2, sdb],
        });
        tree.reset().unwrap();
        tree
    }

    fn here() -> SpecLocation {
        SpecLocation::command(1, CommandKind::ClearPart)
    }

    fn summary(tree: &SimulatedTree) -> Vec<String> {
        tree.actions()
            .iter()
            .map(|action| format!("{} {}", action.kind, action.target))
            .collect()
    }

    #[test]
    fn clearing_everything_relabels_the_disks() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = ClearPartCommand {
            kind: ClearPartType::All,
            ..ClearPartCommand::default()
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        assert_eq!(
            summary(&tree),
            [
                "destroy device sda1",
                "destroy device sda2",
                "destroy format sda",
                "create format sda",
                "create format sdb",
            ]
        );
        let sdb = tree.by_name("sdb").unwrap();
        assert!(ctx.should_clear(sdb));
    }

    #[test]
    fn linux_clearing_keeps_foreign_partitions() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = ClearPartCommand {
            kind: ClearPartType::Linux,
            drives: vec!["sda".to_string()],
            ..ClearPartCommand::default()
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        assert_eq!(summary(&tree), ["destroy device sda2"]);
        assert!(tree.by_name("sda1").is_some());
        let sdb = tree.by_name("sdb").unwrap();
        assert!(!ctx.should_clear(sdb));
    }

    #[test]
    fn listed_devices_are_destroyed() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let command = ClearPartCommand {
            kind: ClearPartType::List,
            devices: vec!["/dev/sda1".to_string()],
            ..ClearPartCommand::default()
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        let kinds: Vec<ActionKind> = tree.actions().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, [ActionKind::Destroy]);
        assert!(tree.by_name("sda1").is_none());

        let command = ClearPartCommand {
            kind: ClearPartType::List,
            devices: vec!["sdz9".to_string()],
            ..ClearPartCommand::default()
        };
        let error = command.execute(&mut tree, &mut ctx, &here()).unwrap_err();
        assert_eq!(
            error.violation(),
            Some(&Violation::NonexistentDisk("sdz9".to_string()))
        );
    }

    #[test]
    fn listed_devices_on_ignored_disks_are_kept() {
        let mut tree = lab();
        let mut ctx = ResolveContext::default();
        let sda = tree.by_name("sda").unwrap();
        ctx.ignore_disk(sda);
        let command = ClearPartCommand {
            kind: ClearPartType::List,
            devices: vec!["sda1".to_string()],
            ..ClearPartCommand::default()
        };
        command.execute(&mut tree, &mut ctx, &here()).unwrap();

        assert!(tree.actions().is_empty());
        assert!(tree.by_name("sda1").is_some());
    }
}
