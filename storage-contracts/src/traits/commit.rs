// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use storage_types::{DeviceNode, StorageAction};

use crate::StorageError;

/// Carries out committed actions on the system.
pub trait ActionCommitter {
    /// Apply one action. `tree` is the working tree after the action's
    /// device has been allocated.
    fn commit(&mut self, action: &StorageAction, tree: &[DeviceNode]) -> Result<(), StorageError>;

    fn mount(&mut self, device: &DeviceNode, target: &Path) -> Result<(), StorageError>;
}
