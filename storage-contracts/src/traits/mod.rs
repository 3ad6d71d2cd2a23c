// SPDX-License-Identifier: GPL-3.0-only

pub mod commit;
pub mod engine;
pub mod probe;

pub use commit::ActionCommitter;
pub use engine::StorageEngine;
pub use probe::DeviceProbe;
