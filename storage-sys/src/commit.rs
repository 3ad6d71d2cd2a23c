// SPDX-License-Identifier: GPL-3.0-only

//! Committing actions through the system storage tools
//!
//! Every action maps to one or more tool invocations (parted, mkfs.*,
//! lvm, mdadm, cryptsetup, btrfs). In dry-run mode the invocations are
//! only rendered and collected.

use std::path::Path;

use storage_contracts::{ActionCommitter, StorageError};
use storage_types::{
    ActionKind, ActionParams, Bytes, DeviceId, DeviceKind, DeviceLayout, DeviceNode, FilesystemType,
    FormatKind, FormatSpec, KIB, StorageAction,
};
use tracing::info;

use crate::cmd::{self, ToolCommand};
use crate::{Result, SysError};

/// Scratch directory for short-lived mounts (btrfs subvolume creation).
const SCRATCH_MOUNT: &str = "/run/storage-plan";

#[derive(Debug, Default)]
pub struct CommandCommitter {
    dry_run: bool,
    commands: Vec<String>,
}

impl CommandCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            commands: Vec::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Rendered invocations, in execution order.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    fn execute(&mut self, tools: Vec<ToolCommand>) -> Result<()> {
        for tool in tools {
            let outcome = cmd::run(&tool, self.dry_run)?;
            if outcome.executed {
                info!("ran {}", outcome.command);
            }
            self.commands.push(outcome.command);
        }
        Ok(())
    }
}

fn lookup(tree: &[DeviceNode], id: DeviceId) -> Result<&DeviceNode> {
    tree.iter()
        .find(|device| device.id == id)
        .ok_or_else(|| SysError::DeviceNotFound(id.to_string()))
}

fn parents<'a>(tree: &'a [DeviceNode], node: &DeviceNode) -> Result<Vec<&'a DeviceNode>> {
    node.parents.iter().map(|&id| lookup(tree, id)).collect()
}

fn partition_number(node: &DeviceNode) -> Result<String> {
    node.partition_number
        .map(|number| number.to_string())
        .ok_or_else(|| SysError::OperationFailed(format!("{} has no partition number", node.name)))
}

/// Volume group and logical volume names of an LV node named `<vg>-<lv>`.
fn lv_names<'a>(node: &'a DeviceNode, vg: &'a DeviceNode) -> (&'a str, &'a str) {
    let lv = node
        .name
        .strip_prefix(vg.name.as_str())
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(&node.name);
    (vg.name.as_str(), lv)
}

fn create_device(node: &DeviceNode, tree: &[DeviceNode], action: &StorageAction) -> Result<Vec<ToolCommand>> {
    let parents = parents(tree, node)?;
    let member_paths: Vec<String> = parents.iter().map(|parent| parent.path()).collect();
    let first = parents
        .first()
        .ok_or_else(|| SysError::OperationFailed(format!("{} has no parent device", node.name)))?;

    let tools = match &node.layout {
        Some(DeviceLayout::Partition { primary }) => {
            let start = node.start.unwrap_or(0);
            let end = start + node.size - 1;
            let part_name = match (&node.alias, primary) {
                (Some(alias), _) => alias.clone(),
                (None, true) => "primary".to_string(),
                (None, false) => node.name.clone(),
            };
            vec![ToolCommand::new("parted").args([
                "--script".to_string(),
                first.path(),
                "unit".to_string(),
                "B".to_string(),
                "mkpart".to_string(),
                part_name,
                format!("{start}"),
                format!("{end}"),
            ])]
        }
        Some(DeviceLayout::VolumeGroup { extent_size, .. }) => {
            vec![ToolCommand::new("vgcreate")
                .arg("-s")
                .arg(format!("{}K", extent_size / KIB))
                .arg(node.name.clone())
                .args(member_paths)]
        }
        Some(DeviceLayout::LogicalVolume { percent }) => {
            let (vg, lv) = lv_names(node, first);
            let sizing = match percent {
                Some(percent) => ["-l".to_string(), format!("{percent}%VG")],
                None => ["-L".to_string(), format!("{}B", node.size)],
            };
            vec![ToolCommand::new("lvcreate")
                .arg("-y")
                .args(sizing)
                .arg("-n")
                .arg(lv)
                .arg(vg)]
        }
        Some(DeviceLayout::MdArray {
            level,
            member_devices,
            total_devices,
        }) => {
            let mut tool = ToolCommand::new("mdadm")
                .arg("--create")
                .arg(node.path())
                .arg("--run")
                .arg(format!("--level={}", level.as_str()))
                .arg(format!("--raid-devices={member_devices}"));
            if total_devices > member_devices {
                tool = tool.arg(format!("--spare-devices={}", total_devices - member_devices));
            }
            vec![tool.args(member_paths)]
        }
        Some(DeviceLayout::Btrfs {
            subvolume: true, ..
        }) => {
            let scratch = format!("{SCRATCH_MOUNT}/{}", first.name);
            vec![
                ToolCommand::new("mkdir").args(["-p".to_string(), scratch.clone()]),
                ToolCommand::new("mount").args([first.path(), scratch.clone()]),
                ToolCommand::new("btrfs").args([
                    "subvolume".to_string(),
                    "create".to_string(),
                    format!("{scratch}/{}", node.name),
                ]),
                ToolCommand::new("umount").arg(scratch),
            ]
        }
        Some(DeviceLayout::Btrfs {
            data_level,
            metadata_level,
            ..
        }) => {
            let mut tool = ToolCommand::new("mkfs.btrfs").arg("-f");
            let label = node
                .format_label()
                .map(str::to_string)
                .or_else(|| node.alias.clone())
                .unwrap_or_else(|| node.name.clone());
            tool = tool.args(["-L".to_string(), label]);
            if let Some(level) = data_level {
                tool = tool.args(["-d".to_string(), level.clone()]);
            }
            if let Some(level) = metadata_level {
                tool = tool.args(["-m".to_string(), level.clone()]);
            }
            vec![tool.args(member_paths)]
        }
        Some(DeviceLayout::Luks) => {
            let passphrase = first
                .format
                .as_ref()
                .and_then(|format| format.spec.luks.as_ref())
                .and_then(|luks| luks.passphrase.clone())
                .unwrap_or_default();
            vec![ToolCommand::new("cryptsetup")
                .args(["open", "--key-file=-"])
                .arg(first.path())
                .arg(node.name.clone())
                .stdin(passphrase)]
        }
        None => {
            return Err(SysError::OperationFailed(format!(
                "'{action}' carries no device layout"
            )));
        }
    };
    Ok(tools)
}

fn partition_flag(kind: FormatKind) -> Option<&'static str> {
    match kind {
        FormatKind::BiosBoot => Some("bios_grub"),
        FormatKind::Efi => Some("esp"),
        FormatKind::PrepBoot => Some("prep"),
        FormatKind::LvmPv => Some("lvm"),
        FormatKind::MdMember => Some("raid"),
        _ => None,
    }
}

fn mkfs(fs: FilesystemType, spec: &FormatSpec, path: String) -> ToolCommand {
    let label = spec.label.clone();
    let (program, force, label_flag) = match fs {
        FilesystemType::Ext2 => ("mkfs.ext2", Some("-F"), "-L"),
        FilesystemType::Ext3 => ("mkfs.ext3", Some("-F"), "-L"),
        FilesystemType::Ext4 => ("mkfs.ext4", Some("-F"), "-L"),
        FilesystemType::Xfs => ("mkfs.xfs", Some("-f"), "-L"),
        FilesystemType::Vfat => ("mkfs.vfat", None, "-n"),
        FilesystemType::Ntfs => ("mkfs.ntfs", Some("-f"), "-L"),
        FilesystemType::Exfat => ("mkfs.exfat", None, "-n"),
        FilesystemType::F2fs => ("mkfs.f2fs", Some("-f"), "-l"),
        FilesystemType::Hfs => ("mkfs.hfs", None, "-v"),
        FilesystemType::HfsPlus => ("mkfs.hfsplus", None, "-v"),
    };

    let mut tool = ToolCommand::new(program);
    if let Some(force) = force {
        tool = tool.arg(force);
    }
    if let Some(label) = label {
        tool = tool.args([label_flag.to_string(), label]);
    }
    if let (Some(profile), FilesystemType::Ext2 | FilesystemType::Ext3 | FilesystemType::Ext4) =
        (&spec.profile, fs)
    {
        tool = tool.args(["-T".to_string(), profile.clone()]);
    }
    tool.arg(path)
}

fn create_format(node: &DeviceNode, tree: &[DeviceNode], spec: &FormatSpec) -> Result<Vec<ToolCommand>> {
    let path = node.path();
    let mut tools = Vec::new();

    let flag = partition_flag(spec.kind).filter(|_| node.kind == DeviceKind::Partition);
    if let Some(flag) = flag {
        let disk = parents(tree, node)?
            .first()
            .map(|disk| disk.path())
            .ok_or_else(|| SysError::OperationFailed(format!("{} has no disk", node.name)))?;
        tools.push(ToolCommand::new("parted").args([
            "--script".to_string(),
            disk,
            "set".to_string(),
            partition_number(node)?,
            flag.to_string(),
            "on".to_string(),
        ]));
    }

    match spec.kind {
        FormatKind::Filesystem(fs) => tools.push(mkfs(fs, spec, path)),
        FormatKind::Efi => {
            let mut tool = ToolCommand::new("mkfs.vfat").args(["-F", "32"]);
            if let Some(label) = &spec.label {
                tool = tool.args(["-n".to_string(), label.clone()]);
            }
            tools.push(tool.arg(path));
        }
        FormatKind::Swap => {
            let mut tool = ToolCommand::new("mkswap");
            if let Some(label) = &spec.label {
                tool = tool.args(["-L".to_string(), label.clone()]);
            }
            tools.push(tool.arg(path));
        }
        FormatKind::LvmPv => tools.push(ToolCommand::new("pvcreate").args(["-y".to_string(), path])),
        FormatKind::Luks => {
            let luks = spec.luks.clone().unwrap_or_default();
            let mut tool = ToolCommand::new("cryptsetup").args(["luksFormat", "--batch-mode"]);
            if let Some(cipher) = luks.cipher {
                tool = tool.arg(format!("--cipher={cipher}"));
            }
            tools.push(
                tool.arg("--key-file=-")
                    .arg(path)
                    .stdin(luks.passphrase.unwrap_or_default()),
            );
        }
        FormatKind::DiskLabel(label) => tools.push(ToolCommand::new("parted").args([
            "--script".to_string(),
            path,
            "mklabel".to_string(),
            label.as_str().to_string(),
        ])),
        // Members and boot stubs are written by their owning device or need only the flag.
        FormatKind::BiosBoot
        | FormatKind::PrepBoot
        | FormatKind::AppleBoot
        | FormatKind::MdMember
        | FormatKind::Btrfs
        | FormatKind::MultipathMember => {}
    }
    Ok(tools)
}

fn destroy_device(node: &DeviceNode, tree: &[DeviceNode]) -> Result<Vec<ToolCommand>> {
    let tool = match node.kind {
        DeviceKind::Partition => {
            let disk = parents(tree, node)?
                .first()
                .map(|disk| disk.path())
                .ok_or_else(|| SysError::OperationFailed(format!("{} has no disk", node.name)))?;
            ToolCommand::new("parted").args([
                "--script".to_string(),
                disk,
                "rm".to_string(),
                partition_number(node)?,
            ])
        }
        DeviceKind::LogicalVolume => ToolCommand::new("lvremove").args(["-y".to_string(), node.path()]),
        DeviceKind::VolumeGroup => ToolCommand::new("vgremove").args(["-y".to_string(), node.name.clone()]),
        DeviceKind::MdArray => ToolCommand::new("mdadm").args(["--stop".to_string(), node.path()]),
        DeviceKind::Luks => ToolCommand::new("cryptsetup").args(["close".to_string(), node.name.clone()]),
        DeviceKind::Btrfs => ToolCommand::new("wipefs").args(["-a".to_string(), node.path()]),
        kind => {
            return Err(SysError::OperationFailed(format!(
                "cannot destroy {kind} device {}",
                node.name
            )));
        }
    };
    Ok(vec![tool])
}

fn resize_device(node: &DeviceNode, tree: &[DeviceNode], to: Bytes) -> Result<Vec<ToolCommand>> {
    let tool = match node.kind {
        DeviceKind::Partition => {
            let disk = parents(tree, node)?
                .first()
                .map(|disk| disk.path())
                .ok_or_else(|| SysError::OperationFailed(format!("{} has no disk", node.name)))?;
            let end = node.start.unwrap_or(0) + to - 1;
            ToolCommand::new("parted").args([
                "--script".to_string(),
                disk,
                "unit".to_string(),
                "B".to_string(),
                "resizepart".to_string(),
                partition_number(node)?,
                format!("{end}"),
            ])
        }
        DeviceKind::LogicalVolume => ToolCommand::new("lvresize").args([
            "-y".to_string(),
            "-L".to_string(),
            format!("{to}B"),
            node.path(),
        ]),
        kind => {
            return Err(SysError::OperationFailed(format!(
                "cannot resize {kind} device {}",
                node.name
            )));
        }
    };
    Ok(vec![tool])
}

fn resize_format(node: &DeviceNode, to: Bytes) -> Result<Vec<ToolCommand>> {
    let path = node.path();
    let tool = match node.format_kind() {
        Some(FormatKind::Filesystem(
            FilesystemType::Ext2 | FilesystemType::Ext3 | FilesystemType::Ext4,
        )) => ToolCommand::new("resize2fs").args([path, format!("{}K", to / KIB)]),
        Some(FormatKind::Filesystem(FilesystemType::Xfs)) => {
            ToolCommand::new("xfs_growfs").arg(path)
        }
        Some(FormatKind::Filesystem(FilesystemType::Ntfs)) => {
            ToolCommand::new("ntfsresize").args(["-f".to_string(), "-s".to_string(), format!("{to}"), path])
        }
        Some(FormatKind::Btrfs) => ToolCommand::new("btrfs").args([
            "filesystem".to_string(),
            "resize".to_string(),
            format!("{to}"),
            path,
        ]),
        other => {
            return Err(SysError::OperationFailed(format!(
                "cannot resize {} on {}",
                other.map(|kind| kind.name()).unwrap_or("an unformatted device"),
                node.name
            )));
        }
    };
    Ok(vec![tool])
}

impl CommandCommitter {
    fn tools_for(&self, action: &StorageAction, tree: &[DeviceNode]) -> Result<Vec<ToolCommand>> {
        match (&action.kind, &action.params) {
            (ActionKind::Destroy, ActionParams::Removed { node }) => destroy_device(node, tree),
            (ActionKind::Destroy, _) => Err(SysError::OperationFailed(format!(
                "'{action}' lost its device snapshot"
            ))),
            (ActionKind::Create, _) => create_device(lookup(tree, action.device)?, tree, action),
            (ActionKind::CreateFormat, ActionParams::Format { format }) => {
                create_format(lookup(tree, action.device)?, tree, format)
            }
            (ActionKind::DestroyFormat, _) => Ok(vec![
                ToolCommand::new("wipefs").args(["-a".to_string(), lookup(tree, action.device)?.path()]),
            ]),
            (ActionKind::ResizeDevice, ActionParams::Resize { to, .. }) => {
                resize_device(lookup(tree, action.device)?, tree, *to)
            }
            (ActionKind::ResizeFormat, ActionParams::Resize { to, .. }) => {
                resize_format(lookup(tree, action.device)?, *to)
            }
            _ => Err(SysError::OperationFailed(format!(
                "'{action}' has mismatched parameters"
            ))),
        }
    }
}

impl ActionCommitter for CommandCommitter {
    fn commit(&mut self, action: &StorageAction, tree: &[DeviceNode]) -> std::result::Result<(), StorageError> {
        let tools = self.tools_for(action, tree)?;
        self.execute(tools)?;
        Ok(())
    }

    fn mount(&mut self, device: &DeviceNode, target: &Path) -> std::result::Result<(), StorageError> {
        if !self.dry_run {
            std::fs::create_dir_all(target).map_err(SysError::from)?;
        }
        let mut tool = ToolCommand::new("mount");
        if let Some(options) = device
            .format
            .as_ref()
            .and_then(|format| format.spec.mount_options.clone())
        {
            tool = tool.args(["-o".to_string(), options]);
        }
        let tool = tool.arg(device.path()).arg(target.display().to_string());
        self.execute(vec![tool])?;
        Ok(())
    }
}
