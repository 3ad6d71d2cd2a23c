// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::StorageEngine;
use storage_types::IgnoreDiskCommand;
use tracing::debug;

use super::{Execute, device_name, matching_disks};
use crate::context::ResolveContext;
use crate::error::{Result, SpecLocation};

impl Execute for IgnoreDiskCommand {
    fn execute<E: StorageEngine + ?Sized>(
        &self,
        engine: &mut E,
        ctx: &mut ResolveContext,
        location: &SpecLocation,
    ) -> Result<()> {
        for pattern in &self.drives {
            for disk in matching_disks(&*engine, pattern, location)? {
                debug!("{location}: ignoring {}", device_name(&*engine, disk));
                ctx.ignore_disk(disk);
            }
        }
        for pattern in &self.only_use {
            for disk in matching_disks(&*engine, pattern, location)? {
                ctx.restrict_to(disk);
            }
        }
        Ok(())
    }
}
