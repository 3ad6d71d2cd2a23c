// SPDX-License-Identifier: GPL-3.0-only

//! Resizing existing partitions and logical volumes

use storage_contracts::StorageEngine;
use storage_types::{
    ActionKind, ActionParams, Bytes, DeviceId, DeviceKind, ResizeSupport, StorageAction,
    bytes_to_pretty,
};
use tracing::info;

use crate::error::{ResolveError, Result, SpecLocation};

/// Register the actions resizing `id` (and its format) to `target` bytes.
///
/// Shrinking resizes the format first, growing resizes the device first. A
/// target equal to the current size counts as growing.
pub fn resize<E: StorageEngine + ?Sized>(
    engine: &mut E,
    id: DeviceId,
    target: Bytes,
    location: &SpecLocation,
) -> Result<()> {
    let device = engine
        .device(id)
        .ok_or_else(|| ResolveError::unresolved(location.clone(), id))?
        .clone();
    let reject = |reason: String| ResolveError::InvalidResizeTarget {
        location: location.clone(),
        device: device.name.clone(),
        target,
        reason,
    };

    if target == 0 {
        return Err(reject("the target size must be positive".to_string()));
    }
    if !matches!(device.kind, DeviceKind::Partition | DeviceKind::LogicalVolume) {
        return Err(reject(format!("a {} cannot be resized", device.kind)));
    }
    let shrinking = target < device.size;
    if let Some(format) = &device.format {
        match format.spec.kind.resize_support() {
            ResizeSupport::Unsupported => {
                return Err(reject(format!(
                    "{} formats cannot be resized",
                    format.spec.kind
                )));
            }
            ResizeSupport::GrowOnly if shrinking => {
                return Err(reject(format!("{} cannot be shrunk", format.spec.kind)));
            }
            _ => {}
        }
        if let Some(min_size) = format.min_size.filter(|&min| target < min) {
            return Err(reject(format!(
                "the format needs at least {}",
                bytes_to_pretty(min_size, false)
            )));
        }
    }

    info!(
        "{location}: resizing {} from {} to {}",
        device.name,
        bytes_to_pretty(device.size, false),
        bytes_to_pretty(target, false)
    );
    let action = |kind| {
        StorageAction::new(kind, id, device.name.clone()).with_params(ActionParams::Resize {
            from: device.size,
            to: target,
        })
    };
    let order = match (device.format.is_some(), shrinking) {
        (false, _) => vec![ActionKind::ResizeDevice],
        (true, true) => vec![ActionKind::ResizeFormat, ActionKind::ResizeDevice],
        (true, false) => vec![ActionKind::ResizeDevice, ActionKind::ResizeFormat],
    };
    for kind in order {
        engine.register_action(action(kind))?;
    }
    Ok(())
}

/// Resize only the device, for reused devices whose format is replaced anyway.
pub fn resize_device_only<E: StorageEngine + ?Sized>(
    engine: &mut E,
    id: DeviceId,
    target: Bytes,
    location: &SpecLocation,
) -> Result<()> {
    let device = engine
        .device(id)
        .ok_or_else(|| ResolveError::unresolved(location.clone(), id))?
        .clone();
    if target == 0 || !matches!(device.kind, DeviceKind::Partition | DeviceKind::LogicalVolume) {
        return Err(ResolveError::InvalidResizeTarget {
            location: location.clone(),
            device: device.name,
            target,
            reason: "only partitions and logical volumes can be resized to a positive size"
                .to_string(),
        });
    }
    if target != device.size {
        engine.register_action(
            StorageAction::new(ActionKind::ResizeDevice, id, device.name.clone()).with_params(
                ActionParams::Resize {
                    from: device.size,
                    to: target,
                },
            ),
        )?;
    }
    Ok(())
}
