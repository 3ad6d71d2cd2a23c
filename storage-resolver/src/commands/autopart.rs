// SPDX-License-Identifier: GPL-3.0-only

//! Automatic partitioning over every usable disk

use storage_contracts::StorageEngine;
use storage_types::{
    AutoPartCommand, AutoPartScheme, Bytes, DeviceId, DeviceLayout, DeviceRequest, FormatKind,
    FormatSpec, GIB,
};
use tracing::info;

use super::{Execute, apply_format, device_name, prepare_disk, reclaim_for};
use crate::context::ResolveContext;
use crate::encryption::{self, EncryptionRequest};
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::graph::format_member;
use crate::size::DEFAULT_EXTENT_SIZE;
use crate::swap::suggest_swap_size;

const BOOT_SIZE: Bytes = GIB;

impl Execute for AutoPartCommand {
    fn execute<E: StorageEngine + ?Sized>(
        &self,
        engine: &mut E,
        ctx: &mut ResolveContext,
        location: &SpecLocation,
    ) -> Result<()> {
        let mut disks = Vec::new();
        for disk in ctx.usable_disks(&*engine) {
            if prepare_disk(engine, ctx, disk)? {
                disks.push(disk);
            }
        }
        let Some(&first) = disks.first() else {
            return Err(ResolveError::spec(location.clone(), Violation::NoUsableDisk));
        };
        let fs_kind = match &self.fs_type {
            Some(fs_type) => FormatKind::parse(fs_type).ok_or_else(|| {
                ResolveError::spec(location.clone(), Violation::UnsupportedFormat(fs_type.clone()))
            })?,
            None => ctx.options.default_fs_type,
        };
        let encryption = EncryptionRequest::from_options(&self.encryption);
        let swap_size = suggest_swap_size(ctx.options.total_memory, false);
        info!(
            "{location}: {:?} layout over {} disk(s)",
            self.scheme,
            disks.len()
        );

        for mountpoint in ["/", "/boot", "/home"] {
            reclaim_for(engine, Some(mountpoint), None)?;
        }

        let boot = FormatSpec::new(ctx.options.default_boot_fs_type)
            .with_mountpoint(Some("/boot".to_string()));
        engine.create_device(partition(first, Some(BOOT_SIZE)).with_format(Some(boot)))?;

        let root = FormatSpec::new(fs_kind).with_mountpoint(Some("/".to_string()));
        let swap = FormatSpec::new(FormatKind::Swap);
        match self.scheme {
            AutoPartScheme::Plain => {
                engine.create_device(partition(first, Some(swap_size)).with_format(Some(swap)))?;
                let id = engine.create_device(partition(first, None))?;
                apply_format(engine, ctx, id, root, encryption.as_ref(), location)?;
            }
            AutoPartScheme::Lvm => {
                let members = members(engine, ctx, &disks, encryption.as_ref(), location)?;
                for &member in &members {
                    format_member(engine, member, FormatKind::LvmPv)?;
                }
                let vg = engine.create_device(DeviceRequest::new(
                    DeviceLayout::VolumeGroup {
                        extent_size: DEFAULT_EXTENT_SIZE,
                        reserve: None,
                    },
                    members,
                ))?;
                let volume = |name: &str, size: Option<Bytes>, format: FormatSpec| {
                    DeviceRequest::new(DeviceLayout::LogicalVolume { percent: None }, vec![vg])
                        .named(name)
                        .with_size(size, size.is_none())
                        .with_format(Some(format))
                };
                engine.create_device(volume("swap", Some(swap_size), swap))?;
                engine.create_device(volume("root", None, root))?;
                info!("{location}: volume group {}", device_name(&*engine, vg));
            }
            AutoPartScheme::Btrfs => {
                engine.create_device(partition(first, Some(swap_size)).with_format(Some(swap)))?;
                let members = members(engine, ctx, &disks, encryption.as_ref(), location)?;
                for &member in &members {
                    format_member(engine, member, FormatKind::Btrfs)?;
                }
                let volume = engine.create_device(
                    DeviceRequest::new(
                        DeviceLayout::Btrfs {
                            data_level: None,
                            metadata_level: None,
                            subvolume: false,
                        },
                        members,
                    )
                    .with_format(Some(FormatSpec::new(FormatKind::Btrfs))),
                )?;
                for (name, mountpoint) in [("root", "/"), ("home", "/home")] {
                    let format = FormatSpec::new(FormatKind::Btrfs)
                        .with_mountpoint(Some(mountpoint.to_string()));
                    engine.create_device(
                        DeviceRequest::new(
                            DeviceLayout::Btrfs {
                                data_level: None,
                                metadata_level: None,
                                subvolume: true,
                            },
                            vec![volume],
                        )
                        .named(name)
                        .with_format(Some(format)),
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Partition on `disk`; without a size it grows into the free space.
fn partition(disk: DeviceId, size: Option<Bytes>) -> DeviceRequest {
    DeviceRequest::new(DeviceLayout::Partition { primary: false }, vec![disk])
        .with_size(size, size.is_none())
}

/// One growing member partition per disk, behind LUKS when encrypting.
fn members<E: StorageEngine + ?Sized>(
    engine: &mut E,
    ctx: &mut ResolveContext,
    disks: &[DeviceId],
    encryption: Option<&EncryptionRequest>,
    location: &SpecLocation,
) -> Result<Vec<DeviceId>> {
    disks
        .iter()
        .map(|&disk| {
            let id = engine.create_device(partition(disk, None))?;
            match encryption {
                Some(request) => encryption::wrap(engine, ctx, id, None, request, location),
                None => Ok(id),
            }
        })
        .collect()
}
