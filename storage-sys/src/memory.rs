// SPDX-License-Identifier: GPL-3.0-only

use procfs::{Current, Meminfo};
use storage_types::Bytes;

use crate::{Result, SysError};

/// Installed memory, from `/proc/meminfo`.
pub fn total_memory() -> Result<Bytes> {
    let meminfo = Meminfo::current().map_err(|error| SysError::Parse {
        tool: "/proc/meminfo".to_string(),
        reason: error.to_string(),
    })?;
    Ok(Bytes::from(meminfo.mem_total))
}
