// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::path::Path;

use storage_types::{
    DeviceId, DeviceKind, DeviceNode, DeviceRequest, FormatKind, FormatSpec, StorageAction,
};

use crate::StorageError;

/// Low-level storage engine holding the working device tree and the ordered
/// list of pending actions.
///
/// Lookups are provided on top of [`StorageEngine::devices`]; devices marked
/// `hidden` are invisible to them.
pub trait StorageEngine {
    /// Drop all pending actions and rebuild the working tree from the system.
    fn reset(&mut self) -> Result<(), StorageError>;

    /// Release external resources (activated containers, mounts).
    fn shutdown(&mut self) -> Result<(), StorageError>;

    /// Working tree in kernel enumeration order.
    fn devices(&self) -> &[DeviceNode];

    /// Pending actions in registration order.
    fn actions(&self) -> &[StorageAction];

    /// Add a requested device to the tree and register its `Create` action.
    fn create_device(&mut self, request: DeviceRequest) -> Result<DeviceId, StorageError>;

    /// Remove a device from the tree. The device must not have children.
    ///
    /// Devices created earlier in the same pass are dropped together with
    /// their pending actions; existing devices get a `Destroy` action.
    fn destroy_device(&mut self, id: DeviceId) -> Result<(), StorageError>;

    /// Schedule a new format for a device (`CreateFormat`, preceded by
    /// `DestroyFormat` when an existing format is replaced).
    fn format_device(&mut self, id: DeviceId, format: FormatSpec) -> Result<(), StorageError>;

    /// Register an action built by the caller (resizes, explicit format removal).
    fn register_action(&mut self, action: StorageAction) -> Result<(), StorageError>;

    /// Record mount metadata on an existing device without scheduling any action.
    fn set_deferred_mount(
        &mut self,
        id: DeviceId,
        mountpoint: Option<String>,
        options: Option<String>,
    ) -> Result<(), StorageError>;

    /// Execute all pending actions in order.
    fn do_it(&mut self) -> Result<(), StorageError>;

    /// Mount a device's format at `target`.
    fn mount(&mut self, id: DeviceId, target: &Path) -> Result<(), StorageError>;

    fn device(&self, id: DeviceId) -> Option<&DeviceNode> {
        self.devices().iter().find(|device| device.id == id)
    }

    fn visible(&self) -> Box<dyn Iterator<Item = &DeviceNode> + '_> {
        Box::new(self.devices().iter().filter(|device| !device.hidden))
    }

    /// Lookup by kernel name or symbolic alias.
    fn by_name(&self, name: &str) -> Option<DeviceId> {
        self.visible()
            .find(|device| device.answers_to(name))
            .map(|device| device.id)
    }

    /// Lookup by device or format UUID.
    fn by_uuid(&self, uuid: &str) -> Option<DeviceId> {
        self.visible()
            .find(|device| {
                device.uuid.as_deref() == Some(uuid) || device.format_uuid() == Some(uuid)
            })
            .map(|device| device.id)
    }

    fn by_label(&self, label: &str) -> Option<DeviceId> {
        self.visible()
            .find(|device| device.format_label() == Some(label))
            .map(|device| device.id)
    }

    /// Lookup by device node path or any of its symlinks.
    fn by_path(&self, path: &str) -> Option<DeviceId> {
        self.visible()
            .find(|device| device.path() == path || device.paths.iter().any(|p| p == path))
            .map(|device| device.id)
    }

    fn by_sysfs_path(&self, sysfs_path: &str) -> Option<DeviceId> {
        self.visible()
            .find(|device| device.sysfs_path.as_deref() == Some(sysfs_path))
            .map(|device| device.id)
    }

    /// The `position`-th (1-indexed) physical disk in enumeration order.
    ///
    /// Virtual devices are never counted; incomplete devices only with
    /// `allow_incomplete`.
    fn by_physical_position(&self, position: u32, allow_incomplete: bool) -> Option<DeviceId> {
        let index = usize::try_from(position.checked_sub(1)?).ok()?;
        self.visible()
            .filter(|device| device.is_physical_disk())
            .filter(|device| allow_incomplete || !device.incomplete)
            .nth(index)
            .map(|device| device.id)
    }

    /// Disks, including multipath devices.
    fn disks(&self) -> Vec<DeviceId> {
        self.visible()
            .filter(|device| matches!(device.kind, DeviceKind::Disk | DeviceKind::Multipath))
            .filter(|device| device.format_kind() != Some(FormatKind::MultipathMember))
            .map(|device| device.id)
            .collect()
    }

    /// Direct children, in tree order.
    fn children(&self, id: DeviceId) -> Vec<DeviceId> {
        self.devices()
            .iter()
            .filter(|device| device.parents.contains(&id))
            .map(|device| device.id)
            .collect()
    }

    /// All transitive descendants, in tree order.
    fn dependents(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut found = BTreeSet::new();
        let mut queue = vec![id];
        while let Some(current) = queue.pop() {
            for child in self.children(current) {
                if found.insert(child) {
                    queue.push(child);
                }
            }
        }
        self.devices()
            .iter()
            .map(|device| device.id)
            .filter(|candidate| found.contains(candidate))
            .collect()
    }

    /// Device whose format claims `mountpoint`.
    fn mountpoint_owner(&self, mountpoint: &str) -> Option<DeviceId> {
        self.devices()
            .iter()
            .find(|device| device.mountpoint() == Some(mountpoint))
            .map(|device| device.id)
    }
}
