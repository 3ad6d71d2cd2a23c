// SPDX-License-Identifier: GPL-3.0-only

//! In-memory working device tree
//!
//! `SimulatedTree` implements the storage engine contract on top of a device
//! inventory. Requested devices join the tree immediately and their actions
//! are queued; `do_it` allocates space for grow requests and hands every
//! action to the configured committer in registration order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use storage_contracts::{ActionCommitter, StorageEngine, StorageError, StorageErrorKind};
use storage_types::{
    ActionKind, ActionParams, Bytes, DeviceId, DeviceKind, DeviceLayout, DeviceNode,
    DeviceRequest, FormatSpec, FormatState, MIB, StorageAction, VgReserve,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocation::{self, DISK_RESERVE, GrowRequest};
use crate::discovery;
use crate::inventory::Inventory;

/// Where the tree is (re)built from on reset.
#[derive(Debug, Clone)]
pub enum TreeSource {
    Inventory(Inventory),
    /// Live discovery through `lsblk`.
    System,
}

impl TreeSource {
    fn load(&self) -> Result<Vec<DeviceNode>, StorageError> {
        let inventory = match self {
            Self::Inventory(inventory) => inventory.clone(),
            Self::System => discovery::discover()?,
        };
        Ok(inventory.to_nodes()?)
    }
}

/// Committer that leaves the system untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCommitter;

impl ActionCommitter for NoopCommitter {
    fn commit(&mut self, _action: &StorageAction, _tree: &[DeviceNode]) -> Result<(), StorageError> {
        Ok(())
    }

    fn mount(&mut self, _device: &DeviceNode, _target: &Path) -> Result<(), StorageError> {
        Ok(())
    }
}

pub struct SimulatedTree<C = NoopCommitter> {
    source: TreeSource,
    devices: Vec<DeviceNode>,
    actions: Vec<StorageAction>,
    next_id: u32,
    committer: C,
    mounted: Vec<(DeviceId, PathBuf)>,
    /// Tree as left by the last successful `do_it`; later resets start here.
    committed: Option<Vec<DeviceNode>>,
}

impl SimulatedTree<NoopCommitter> {
    pub fn new(source: TreeSource) -> Self {
        Self {
            source,
            devices: Vec::new(),
            actions: Vec::new(),
            next_id: 0,
            committer: NoopCommitter,
            mounted: Vec::new(),
            committed: None,
        }
    }

    pub fn from_inventory(inventory: Inventory) -> Self {
        Self::new(TreeSource::Inventory(inventory))
    }
}

impl<C: ActionCommitter> SimulatedTree<C> {
    pub fn with_committer<D: ActionCommitter>(self, committer: D) -> SimulatedTree<D> {
        SimulatedTree {
            source: self.source,
            devices: self.devices,
            actions: self.actions,
            next_id: self.next_id,
            committer,
            mounted: self.mounted,
            committed: self.committed,
        }
    }

    pub fn committer(&self) -> &C {
        &self.committer
    }

    pub fn mounted(&self) -> &[(DeviceId, PathBuf)] {
        &self.mounted
    }

    fn node(&self, id: DeviceId) -> Result<&DeviceNode, StorageError> {
        self.devices
            .iter()
            .find(|device| device.id == id)
            .ok_or_else(|| StorageError::not_found(format!("no device {id} in the working tree")))
    }

    fn node_mut(&mut self, id: DeviceId) -> Result<&mut DeviceNode, StorageError> {
        self.devices
            .iter_mut()
            .find(|device| device.id == id)
            .ok_or_else(|| StorageError::not_found(format!("no device {id} in the working tree")))
    }

    fn display_name(node: &DeviceNode) -> String {
        node.alias.clone().unwrap_or_else(|| node.name.clone())
    }

    fn name_taken(&self, name: &str) -> bool {
        self.devices.iter().any(|device| device.answers_to(name))
    }

    fn next_partition_number(&self, parent: DeviceId) -> u32 {
        self.devices
            .iter()
            .filter(|device| device.parents.contains(&parent) && device.kind == DeviceKind::Partition)
            .filter_map(|device| device.partition_number)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn next_free_name(&self, prefix: &str) -> String {
        (0..)
            .map(|n| format!("{prefix}{n}"))
            .find(|candidate| !self.name_taken(candidate))
            .unwrap_or_else(|| prefix.to_string())
    }

    /// First free offset after existing partitions, end of the usable area and
    /// space already promised to fixed-size pending partitions.
    fn partition_space(&self, disk: &DeviceNode) -> (Bytes, Bytes, Bytes) {
        let mut cursor = DISK_RESERVE;
        let mut promised = 0;
        for child in self
            .devices
            .iter()
            .filter(|device| device.parents.contains(&disk.id) && device.kind == DeviceKind::Partition)
        {
            if child.exists {
                let end = child.start.unwrap_or(cursor) + child.size;
                cursor = cursor.max(allocation::align_up(end, MIB));
            } else if !child.grow {
                promised += child.size;
            }
        }
        (cursor, disk.size.saturating_sub(DISK_RESERVE), promised)
    }

    fn partition_name(&self, disk: &DeviceNode, number: u32) -> String {
        if disk.name.ends_with(|c: char| c.is_ascii_digit()) {
            format!("{}p{number}", disk.name)
        } else {
            format!("{}{number}", disk.name)
        }
    }

    fn build_node(&mut self, request: &DeviceRequest) -> Result<DeviceNode, StorageError> {
        let parents = request
            .parents
            .iter()
            .map(|&parent| self.node(parent).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        let id = DeviceId(self.next_id);
        let kind = request.kind();

        let (name, alias, path) = match &request.layout {
            DeviceLayout::Partition { .. } => {
                let [disk] = parents.as_slice() else {
                    return Err(StorageError::invalid_input(
                        "a partition needs exactly one parent disk",
                    ));
                };
                if !disk.kind.is_partitionable() {
                    return Err(StorageError::invalid_input(format!(
                        "{} cannot hold partitions",
                        disk.name
                    )));
                }
                if !disk.is_partitioned() {
                    return Err(StorageError::invalid_input(format!(
                        "{} has no partition table",
                        disk.name
                    )));
                }

                if let Some(size) = request.size.filter(|_| !request.grow) {
                    let (cursor, end, promised) = self.partition_space(disk);
                    let available = end.saturating_sub(cursor).saturating_sub(promised);
                    if size > available {
                        return Err(StorageError::conflict(format!(
                            "not enough free space on {} for {}",
                            disk.name,
                            storage_types::bytes_to_pretty(size, false)
                        )));
                    }
                }

                let number = self.next_partition_number(disk.id);
                let name = self.partition_name(disk, number);
                let alias = request.alias.clone().or_else(|| request.name.clone());
                let path = format!("/dev/{name}");
                (name, alias, path)
            }
            DeviceLayout::LogicalVolume { .. } => {
                let [vg] = parents.as_slice() else {
                    return Err(StorageError::invalid_input(
                        "a logical volume needs exactly one volume group",
                    ));
                };
                if vg.kind != DeviceKind::VolumeGroup {
                    return Err(StorageError::invalid_input(format!(
                        "{} is not a volume group",
                        vg.name
                    )));
                }
                let lv = match &request.name {
                    Some(name) => name.clone(),
                    None => self.next_free_name(&format!("{}-lvol", vg.name))
                        [vg.name.len() + 1..]
                        .to_string(),
                };
                let name = format!("{}-{lv}", vg.name);
                let path = format!("/dev/mapper/{name}");
                (name, request.alias.clone(), path)
            }
            DeviceLayout::VolumeGroup { .. } => {
                let name = request.name.clone().unwrap_or_else(|| self.next_free_name("vg"));
                let path = format!("/dev/{name}");
                (name, request.alias.clone(), path)
            }
            DeviceLayout::MdArray { .. } => {
                let name = request.name.clone().unwrap_or_else(|| self.next_free_name("md"));
                let path = format!("/dev/md/{name}");
                (name, request.alias.clone(), path)
            }
            DeviceLayout::Btrfs { .. } => {
                let name = request
                    .name
                    .clone()
                    .unwrap_or_else(|| self.next_free_name("btrfs"));
                let path = parents
                    .first()
                    .map(DeviceNode::path)
                    .unwrap_or_else(|| format!("/dev/{name}"));
                (name, request.alias.clone(), path)
            }
            DeviceLayout::Luks => {
                let name = request
                    .name
                    .clone()
                    .unwrap_or_else(|| self.next_free_name("luks"));
                let path = format!("/dev/mapper/{name}");
                (name, request.alias.clone(), path)
            }
        };

        if self.name_taken(&name) {
            return Err(StorageError::conflict(format!(
                "device name {name} is already in use"
            )));
        }
        if let Some(alias) = alias.as_deref().filter(|alias| self.name_taken(alias)) {
            return Err(StorageError::conflict(format!(
                "device name {alias} is already in use"
            )));
        }

        let mut node = DeviceNode::new(id, name, kind);
        node.alias = alias;
        node.exists = false;
        node.size = request.size.unwrap_or(0);
        node.grow = request.grow;
        node.max_size = request.max_size;
        node.parents = request.parents.clone();
        node.paths = vec![path];
        node.layout = Some(request.layout.clone());
        if kind == DeviceKind::Partition {
            node.partition_number = parents
                .first()
                .map(|disk| self.next_partition_number(disk.id));
        }
        Ok(node)
    }

    /// Give every pending device a concrete size (and partitions an offset).
    fn allocate(&mut self) -> Result<(), StorageError> {
        let order: Vec<DeviceId> = self.devices.iter().map(|device| device.id).collect();
        let mut partitioned = Vec::new();
        let mut volume_groups = Vec::new();

        for id in order {
            let node = self.node(id)?.clone();
            if node.exists {
                continue;
            }
            let parent_sizes: Vec<Bytes> = node
                .parents
                .iter()
                .map(|&parent| self.node(parent).map(|p| p.size))
                .collect::<Result<_, _>>()?;

            match &node.layout {
                Some(DeviceLayout::Partition { .. }) => {
                    let disk = node.parents[0];
                    if !partitioned.contains(&disk) {
                        self.allocate_partitions(disk)?;
                        partitioned.push(disk);
                    }
                }
                Some(DeviceLayout::LogicalVolume { .. }) => {
                    let vg = node.parents[0];
                    if !volume_groups.contains(&vg) {
                        self.allocate_logical_volumes(vg)?;
                        volume_groups.push(vg);
                    }
                }
                Some(DeviceLayout::VolumeGroup { reserve, .. }) => {
                    let total: Bytes = parent_sizes.iter().sum();
                    let held = match reserve {
                        Some(VgReserve::Space(space)) => *space,
                        Some(VgReserve::Percent(percent)) => total * Bytes::from(*percent) / 100,
                        None => 0,
                    };
                    self.node_mut(id)?.size = total.saturating_sub(held);
                }
                Some(DeviceLayout::MdArray {
                    level,
                    member_devices,
                    ..
                }) => {
                    self.node_mut(id)?.size =
                        allocation::md_array_size(*level, &parent_sizes, *member_devices);
                }
                Some(DeviceLayout::Btrfs { .. }) | Some(DeviceLayout::Luks) => {
                    self.node_mut(id)?.size = parent_sizes.iter().sum();
                }
                None => {}
            }

            let node = self.node(id)?;
            if node.size == 0 {
                return Err(StorageError::conflict(format!(
                    "no space left to allocate {}",
                    Self::display_name(node)
                )));
            }
        }
        Ok(())
    }

    fn allocate_partitions(&mut self, disk_id: DeviceId) -> Result<(), StorageError> {
        let disk = self.node(disk_id)?.clone();
        let (mut cursor, end, promised) = self.partition_space(&disk);

        let pending: Vec<DeviceNode> = self
            .devices
            .iter()
            .filter(|device| {
                device.parents.contains(&disk_id)
                    && device.kind == DeviceKind::Partition
                    && !device.exists
            })
            .cloned()
            .collect();

        let free = end.saturating_sub(cursor).saturating_sub(promised);
        let growing: Vec<GrowRequest> = pending
            .iter()
            .filter(|device| device.grow)
            .map(|device| GrowRequest {
                base: device.size,
                max: device.max_size,
            })
            .collect();
        let mut grown = allocation::distribute(free, &growing, MIB).into_iter();

        for device in pending {
            let size = if device.grow {
                grown.next().unwrap_or(device.size)
            } else {
                device.size
            };
            if cursor + size > end {
                return Err(StorageError::conflict(format!(
                    "not enough free space on {} for {}",
                    disk.name,
                    Self::display_name(&device)
                )));
            }
            let node = self.node_mut(device.id)?;
            node.size = size;
            node.start = Some(cursor);
            debug!(
                "allocated {} at {} on {}",
                node.name,
                storage_types::bytes_to_pretty(size, true),
                disk.name
            );
            cursor = allocation::align_up(cursor + size, MIB);
        }
        Ok(())
    }

    fn allocate_logical_volumes(&mut self, vg_id: DeviceId) -> Result<(), StorageError> {
        let vg = self.node(vg_id)?.clone();
        let extent = match &vg.layout {
            Some(DeviceLayout::VolumeGroup { extent_size, .. }) => *extent_size,
            _ => 4 * MIB,
        };

        let volumes: Vec<DeviceNode> = self
            .devices
            .iter()
            .filter(|device| device.parents.contains(&vg_id))
            .cloned()
            .collect();

        let mut used: Bytes = volumes
            .iter()
            .filter(|device| device.exists)
            .map(|device| device.size)
            .sum();
        let mut fixed = BTreeMap::new();
        for device in volumes.iter().filter(|device| !device.exists) {
            let percent = match &device.layout {
                Some(DeviceLayout::LogicalVolume { percent }) => *percent,
                _ => None,
            };
            let size = match percent {
                Some(percent) => allocation::align_down(vg.size * Bytes::from(percent) / 100, extent),
                None if device.grow => continue,
                None => allocation::align_up(device.size, extent),
            };
            used += size;
            fixed.insert(device.id, size);
        }

        if used > vg.size {
            return Err(StorageError::conflict(format!(
                "volume group {} is too small for its logical volumes",
                vg.name
            )));
        }

        let growing: Vec<&DeviceNode> = volumes
            .iter()
            .filter(|device| !device.exists && !fixed.contains_key(&device.id))
            .collect();
        let requests: Vec<GrowRequest> = growing
            .iter()
            .map(|device| GrowRequest {
                base: allocation::align_up(device.size, extent),
                max: device.max_size,
            })
            .collect();
        let grown = allocation::distribute(vg.size - used, &requests, extent);

        for (device, size) in growing.iter().zip(grown) {
            fixed.insert(device.id, size);
        }
        for (id, size) in fixed {
            self.node_mut(id)?.size = size;
        }
        Ok(())
    }

    /// Apply the effect of a committed action to the tree.
    fn settle(&mut self, action: &StorageAction) -> Result<(), StorageError> {
        match action.kind {
            ActionKind::Create => {
                let node = self.node_mut(action.device)?;
                node.exists = true;
                if matches!(node.kind, DeviceKind::MdArray | DeviceKind::VolumeGroup) {
                    node.uuid = Some(Uuid::new_v4().to_string());
                }
            }
            ActionKind::CreateFormat => {
                let node = self.node_mut(action.device)?;
                if let Some(format) = node.format.as_mut() {
                    format.exists = true;
                    format.uuid = Some(Uuid::new_v4().to_string());
                }
            }
            ActionKind::Destroy
            | ActionKind::DestroyFormat
            | ActionKind::ResizeDevice
            | ActionKind::ResizeFormat => {}
        }
        Ok(())
    }
}

impl<C: ActionCommitter> StorageEngine for SimulatedTree<C> {
    fn reset(&mut self) -> Result<(), StorageError> {
        self.devices = match &self.committed {
            Some(devices) => devices.clone(),
            None => self.source.load()?,
        };
        self.actions.clear();
        self.next_id = self
            .devices
            .iter()
            .map(|device| device.id.0 + 1)
            .max()
            .unwrap_or(0);
        debug!("working tree reset with {} devices", self.devices.len());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), StorageError> {
        if !self.mounted.is_empty() {
            debug!("releasing {} mounts", self.mounted.len());
        }
        self.mounted.clear();
        Ok(())
    }

    fn devices(&self) -> &[DeviceNode] {
        &self.devices
    }

    fn actions(&self) -> &[StorageAction] {
        &self.actions
    }

    fn create_device(&mut self, mut request: DeviceRequest) -> Result<DeviceId, StorageError> {
        let format = request.format.take();
        let mut node = self.build_node(&request)?;
        let id = node.id;
        let parents = request
            .parents
            .iter()
            .filter_map(|&parent| self.node(parent).ok().map(|p| p.name.clone()))
            .collect();

        let target = Self::display_name(&node);
        node.format = format.clone().map(FormatState::planned);
        self.next_id += 1;
        self.devices.push(node);

        self.actions.push(
            StorageAction::new(ActionKind::Create, id, target.clone())
                .with_parents(parents)
                .with_params(ActionParams::Device {
                    request: Box::new(request),
                }),
        );
        if let Some(format) = format {
            self.actions.push(
                StorageAction::new(ActionKind::CreateFormat, id, target)
                    .with_params(ActionParams::Format { format }),
            );
        }
        Ok(id)
    }

    fn destroy_device(&mut self, id: DeviceId) -> Result<(), StorageError> {
        let node = self.node(id)?.clone();
        let children = self.children(id);
        if !children.is_empty() {
            return Err(StorageError::conflict(format!(
                "{} still has {} dependent device(s)",
                node.name,
                children.len()
            )));
        }

        if node.exists && node.protected {
            return Err(StorageError::new(
                StorageErrorKind::PermissionDenied,
                format!("{} is protected", node.name),
            ));
        }

        self.actions.retain(|action| action.device != id);
        self.devices.retain(|device| device.id != id);

        if node.exists {
            let target = Self::display_name(&node);
            self.actions.push(
                StorageAction::new(ActionKind::Destroy, id, target).with_params(
                    ActionParams::Removed {
                        node: Box::new(node),
                    },
                ),
            );
        } else {
            debug!("cancelled pending request {}", node.name);
        }
        Ok(())
    }

    fn format_device(&mut self, id: DeviceId, format: FormatSpec) -> Result<(), StorageError> {
        let node = self.node(id)?.clone();
        let target = Self::display_name(&node);

        if node.exists && node.protected {
            return Err(StorageError::new(
                StorageErrorKind::PermissionDenied,
                format!("{} is protected", node.name),
            ));
        }

        if matches!(format.kind, storage_types::FormatKind::DiskLabel(_))
            && !self.children(id).is_empty()
        {
            return Err(StorageError::conflict(format!(
                "{} still has partitions",
                node.name
            )));
        }

        match &node.format {
            Some(current) if current.exists => {
                self.actions.push(StorageAction::new(
                    ActionKind::DestroyFormat,
                    id,
                    target.clone(),
                ));
            }
            Some(_) => {
                self.actions.retain(|action| {
                    !(action.device == id && action.kind == ActionKind::CreateFormat)
                });
            }
            None => {}
        }

        self.node_mut(id)?.format = Some(FormatState::planned(format.clone()));
        self.actions.push(
            StorageAction::new(ActionKind::CreateFormat, id, target)
                .with_params(ActionParams::Format { format }),
        );
        Ok(())
    }

    fn register_action(&mut self, action: StorageAction) -> Result<(), StorageError> {
        let node = self.node_mut(action.device)?;
        match (&action.kind, &action.params) {
            (ActionKind::ResizeDevice, ActionParams::Resize { to, .. }) => node.size = *to,
            (ActionKind::ResizeFormat, ActionParams::Resize { .. }) => {}
            (ActionKind::DestroyFormat, _) => node.format = None,
            (ActionKind::CreateFormat, ActionParams::Format { format }) => {
                node.format = Some(FormatState::planned(format.clone()));
            }
            (kind, _) => {
                return Err(StorageError::invalid_input(format!(
                    "cannot register a {kind} action directly"
                )));
            }
        }
        self.actions.push(action);
        Ok(())
    }

    fn set_deferred_mount(
        &mut self,
        id: DeviceId,
        mountpoint: Option<String>,
        options: Option<String>,
    ) -> Result<(), StorageError> {
        let node = self.node_mut(id)?;
        let name = node.name.clone();
        let format = node.format.as_mut().ok_or_else(|| {
            StorageError::invalid_input(format!("{name} has no format to mount"))
        })?;
        format.spec.mountpoint = mountpoint.filter(|mp| !mp.is_empty());
        format.spec.mount_options = options.filter(|opts| !opts.is_empty());
        Ok(())
    }

    fn do_it(&mut self) -> Result<(), StorageError> {
        self.allocate()?;

        let actions = std::mem::take(&mut self.actions);
        for (position, action) in actions.iter().enumerate() {
            if let Err(error) = self.committer.commit(action, &self.devices) {
                warn!("commit failed at '{action}': {error}");
                self.actions = actions[position..].to_vec();
                return Err(error);
            }
            self.settle(action)?;
            info!("{action}");
        }
        self.committed = Some(self.devices.clone());
        Ok(())
    }

    fn mount(&mut self, id: DeviceId, target: &Path) -> Result<(), StorageError> {
        let node = self.node(id)?.clone();
        if !node.format_kind().is_some_and(|kind| kind.is_mountable()) {
            return Err(StorageError::invalid_input(format!(
                "{} has no mountable format",
                node.name
            )));
        }
        self.committer.mount(&node, target)?;
        info!("mounted {} at {}", node.path(), target.display());
        self.mounted.push((id, target.to_path_buf()));
        Ok(())
    }
}
