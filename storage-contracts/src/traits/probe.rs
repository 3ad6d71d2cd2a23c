// SPDX-License-Identifier: GPL-3.0-only

use crate::StorageError;

/// External program locating a device for the `script` match strategy.
pub trait DeviceProbe {
    /// Run `script` with the symbolic device name as its only argument and
    /// return the device path printed on its first output line.
    fn probe(&self, script: &str, name: &str) -> Result<String, StorageError>;
}
