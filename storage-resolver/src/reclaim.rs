// SPDX-License-Identifier: GPL-3.0-only

//! Freeing devices and mountpoints for new requests

use storage_contracts::StorageEngine;
use storage_types::{ActionKind, DeviceId, StorageAction};
use tracing::{debug, info};

use crate::error::Result;

/// Destroy every device stacked on top of `id`, leaves first.
pub fn destroy_dependents<E: StorageEngine + ?Sized>(engine: &mut E, id: DeviceId) -> Result<()> {
    loop {
        let dependents = engine.dependents(id);
        let Some(&leaf) = dependents
            .iter()
            .find(|&&candidate| engine.children(candidate).is_empty())
        else {
            return Ok(());
        };
        debug!("destroying dependent device {leaf}");
        engine.destroy_device(leaf)?;
    }
}

/// Destroy `id` together with everything stacked on top of it.
pub fn destroy_tree<E: StorageEngine + ?Sized>(engine: &mut E, id: DeviceId) -> Result<()> {
    destroy_dependents(engine, id)?;
    engine.destroy_device(id)?;
    Ok(())
}

/// Make `mountpoint` available: the device currently claiming it is destroyed
/// along with its dependents. No-op when nothing claims it.
pub fn reclaim<E: StorageEngine + ?Sized>(engine: &mut E, mountpoint: &str) -> Result<()> {
    let Some(owner) = engine.mountpoint_owner(mountpoint) else {
        return Ok(());
    };
    if let Some(device) = engine.device(owner) {
        info!("reclaiming {mountpoint} from {}", device.name);
    }
    destroy_tree(engine, owner)
}

/// Drop dependents of a reused device and schedule removal of its format.
pub fn remove_existing_format<E: StorageEngine + ?Sized>(
    engine: &mut E,
    id: DeviceId,
) -> Result<()> {
    destroy_dependents(engine, id)?;
    let Some(device) = engine.device(id) else {
        return Ok(());
    };
    if device.format.is_none() {
        return Ok(());
    }
    let target = device.alias.clone().unwrap_or_else(|| device.name.clone());
    engine.register_action(StorageAction::new(ActionKind::DestroyFormat, id, target))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_sys::{Inventory, InventoryDevice, SimulatedTree};
    use storage_types::{DeviceKind, DiskLabelType, FilesystemType, FormatKind, GIB};

    fn tree() -> SimulatedTree {
        let mut sda = InventoryDevice::new("sda", DeviceKind::Disk, 40 * GIB);
        sda.format = Some(FormatKind::DiskLabel(DiskLabelType::Gpt));
        let mut sda1 = InventoryDevice::new("sda1", DeviceKind::Partition, 20 * GIB);
        sda1.parents = vec!["sda".to_string()];
        sda1.format = Some(FormatKind::LvmPv);
        let mut vg = InventoryDevice::new("vg0", DeviceKind::VolumeGroup, 20 * GIB);
        vg.parents = vec!["sda1".to_string()];
        let mut root = InventoryDevice::new("vg0-root", DeviceKind::LogicalVolume, 10 * GIB);
        root.parents = vec!["vg0".to_string()];
        root.format = Some(FormatKind::Filesystem(FilesystemType::Ext4));
        root.mountpoint = Some("/".to_string());
        let mut home = InventoryDevice::new("vg0-home", DeviceKind::LogicalVolume, 10 * GIB);
        home.parents = vec!["vg0".to_string()];
        home.format = Some(FormatKind::Filesystem(FilesystemType::Xfs));
        home.mountpoint = Some("/home".to_string());

        let mut tree = SimulatedTree::from_inventory(Inventory {
            devices: vec![sda, sda1, vg, root, home],
        });
        tree.reset().unwrap();
        tree
    }

    fn destroyed(tree: &SimulatedTree) -> Vec<String> {
        tree.actions()
            .iter()
            .filter(|action| action.kind == ActionKind::Destroy)
            .map(|action| action.target.clone())
            .collect()
    }

    #[test]
    fn reclaiming_a_mountpoint_destroys_its_owner() {
        let mut tree = tree();
        reclaim(&mut tree, "/home").unwrap();
        assert_eq!(destroyed(&tree), ["vg0-home"]);
        assert_eq!(tree.mountpoint_owner("/home"), None);
        assert!(tree.by_name("vg0-root").is_some());
    }

    #[test]
    fn unclaimed_mountpoints_are_left_alone() {
        let mut tree = tree();
        reclaim(&mut tree, "/srv").unwrap();
        assert!(tree.actions().is_empty());
    }

    #[test]
    fn dependents_go_leaves_first() {
        let mut tree = tree();
        let pv = tree.by_name("sda1").unwrap();
        destroy_tree(&mut tree, pv).unwrap();
        assert_eq!(destroyed(&tree), ["vg0-root", "vg0-home", "vg0", "sda1"]);
    }

    #[test]
    fn reused_device_loses_dependents_and_format() {
        let mut tree = tree();
        let pv = tree.by_name("sda1").unwrap();
        remove_existing_format(&mut tree, pv).unwrap();

        let last = tree.actions().last().unwrap();
        assert_eq!(last.kind, ActionKind::DestroyFormat);
        assert_eq!(last.target, "sda1");
        assert!(tree.device(pv).unwrap().format.is_none());
        assert!(tree.by_name("vg0").is_none());
    }
}
