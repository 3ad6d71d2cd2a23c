// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::StorageEngine;
use storage_types::{DeviceKind, DeviceLayout, DeviceRequest, FormatKind, RaidCommand, RaidLevel};
use tracing::debug;

use super::{Execute, Role, apply_format, device_name, member_device, reclaim_for};
use crate::context::ResolveContext;
use crate::encryption::EncryptionRequest;
use crate::error::{ResolveError, Result, SpecLocation, Violation};
use crate::graph::{defer_mount, format_member};
use crate::reclaim;

impl Execute for RaidCommand {
    fn execute<E: StorageEngine + ?Sized>(
        &self,
        engine: &mut E,
        ctx: &mut ResolveContext,
        location: &SpecLocation,
    ) -> Result<()> {
        let role = Role::parse(&self.mountpoint, location)?;
        let encryption = EncryptionRequest::from_options(&self.encryption);

        if self.no_format || self.use_existing {
            let name = self
                .device
                .as_deref()
                .ok_or_else(|| ResolveError::spec(location.clone(), Violation::NameRequired))?;
            let array = engine
                .by_name(name)
                .filter(|&id| {
                    engine
                        .device(id)
                        .is_some_and(|node| node.kind == DeviceKind::MdArray)
                })
                .ok_or_else(|| {
                    ResolveError::unresolved(location.clone(), format!("RAID array {name}"))
                })?;
            if let Some(member) = role.member_name() {
                ctx.set_remap(member, name);
            }

            if self.no_format {
                if let Some(mountpoint) = role.mountpoint() {
                    defer_mount(
                        engine,
                        ctx,
                        array,
                        Some(mountpoint),
                        self.format.fs_options.clone(),
                    )?;
                }
                return Ok(());
            }

            reclaim::remove_existing_format(engine, array)?;
            let format = role.format(&self.format, ctx, location)?;
            reclaim_for(engine, role.mountpoint(), Some(array))?;
            apply_format(engine, ctx, array, format, encryption.as_ref(), location)?;
            return Ok(());
        }

        let level_text = self.level.clone().unwrap_or_default();
        let level = RaidLevel::parse(&level_text).ok_or_else(|| {
            ResolveError::spec(location.clone(), Violation::InvalidRaidLevel(level_text.clone()))
        })?;
        let members = self
            .members
            .iter()
            .map(|spec| member_device(&*engine, &*ctx, spec, location))
            .collect::<Result<Vec<_>>>()?;
        if members.is_empty() {
            return Err(ResolveError::spec(location.clone(), Violation::NoMembers));
        }
        if let Some(name) = &self.device {
            if engine.by_name(name).is_some() {
                return Err(ResolveError::spec(
                    location.clone(),
                    Violation::DuplicateName(name.clone()),
                ));
            }
        }
        if self.spares > 0 && !level.supports_spares() {
            return Err(ResolveError::spec(
                location.clone(),
                Violation::SparesUnsupported(level.to_string()),
            ));
        }
        let active = members.len().saturating_sub(self.spares);
        if active < level.min_members() {
            return Err(ResolveError::spec(
                location.clone(),
                Violation::TooFewMembers {
                    level: level.to_string(),
                    required: level.min_members(),
                    found: active,
                },
            ));
        }

        for &member in &members {
            format_member(engine, member, FormatKind::MdMember)?;
        }
        let format = role.format(&self.format, ctx, location)?;
        reclaim_for(engine, role.mountpoint(), None)?;

        let total = members.len();
        let mut request = DeviceRequest::new(
            DeviceLayout::MdArray {
                level,
                member_devices: active,
                total_devices: total,
            },
            members,
        );
        if let Some(name) = &self.device {
            request = request.named(name.clone());
        }
        let array = engine.create_device(request)?;
        let name = device_name(&*engine, array);
        debug!("{location}: new {level} array {name}");
        if let Some(member) = role.member_name() {
            ctx.set_remap(member, name);
        }
        apply_format(engine, ctx, array, format, encryption.as_ref(), location)?;
        Ok(())
    }
}
