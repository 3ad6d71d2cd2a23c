// SPDX-License-Identifier: GPL-3.0-only

//! System side of the storage resolver
//!
//! This crate provides the pieces that touch (or stand in for) the machine:
//! - Device inventories and live discovery through `lsblk`
//! - The simulated working tree implementing the engine contract
//! - Space allocation for pending devices
//! - Committing actions through parted, mkfs, lvm, mdadm and cryptsetup
//! - Match-script probing and memory queries
//!
//! Committing for real requires root; dry runs only render the commands.

pub mod allocation;
pub mod cmd;
pub mod commit;
pub mod discovery;
pub mod error;
pub mod inventory;
pub mod memory;
pub mod probe;
pub mod tree;

pub use commit::CommandCommitter;
pub use discovery::discover;
pub use error::{Result, SysError};
pub use inventory::{Inventory, InventoryDevice};
pub use memory::total_memory;
pub use probe::ScriptProbe;
pub use tree::{NoopCommitter, SimulatedTree, TreeSource};
