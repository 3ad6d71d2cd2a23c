// SPDX-License-Identifier: GPL-3.0-only

//! Explicit resolver state
//!
//! `ResolveOptions` carries the site configuration (defaults, escrow
//! certificates, installed memory). `ResolveContext` adds the state that lives
//! for one pass: the run passphrase, the LUKS name counter, the symbolic-name
//! remap table, ignored disks and the clear-partitions selection.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use storage_contracts::StorageEngine;
use storage_types::{
    Bytes, ClearPartType, DeviceId, DeviceNode, DiskLabelType, FilesystemType, FormatKind, GIB,
};

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Disk label written to disks that get a fresh partition table.
    pub disklabel: DiskLabelType,
    pub default_fs_type: FormatKind,
    pub default_boot_fs_type: FormatKind,
    /// Escrow certificate contents keyed by URL.
    pub escrow_certificates: BTreeMap<String, String>,
    /// Installed memory, for swap sizing.
    pub total_memory: Bytes,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            disklabel: DiskLabelType::Gpt,
            default_fs_type: FormatKind::Filesystem(FilesystemType::Ext4),
            default_boot_fs_type: FormatKind::Filesystem(FilesystemType::Ext4),
            escrow_certificates: BTreeMap::new(),
            total_memory: 2 * GIB,
        }
    }
}

/// Mount metadata recorded on a reused device instead of a format action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredMount {
    pub device: DeviceId,
    pub name: String,
    pub mountpoint: Option<String>,
    pub options: Option<String>,
}

/// Disks selected by a clear-partitions command.
#[derive(Debug, Clone, Default)]
pub struct ClearSelection {
    pub kind: ClearPartType,
    /// Empty means every usable disk.
    pub drives: Vec<DeviceId>,
    pub init_all: bool,
}

#[derive(Debug, Default)]
pub struct ResolveContext {
    pub options: ResolveOptions,
    passphrase: Option<String>,
    luks_counter: u32,
    remap: BTreeMap<String, String>,
    ignored: BTreeSet<DeviceId>,
    only_use: BTreeSet<DeviceId>,
    clear: Option<ClearSelection>,
    deferred: Vec<DeferredMount>,
}

impl ResolveContext {
    pub fn new(options: ResolveOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Forget everything accumulated by a previous pass.
    pub fn begin_pass(&mut self) {
        self.passphrase = None;
        self.luks_counter = 0;
        self.remap.clear();
        self.ignored.clear();
        self.only_use.clear();
        self.clear = None;
        self.deferred.clear();
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }

    /// The first passphrase seen becomes the run passphrase.
    pub fn adopt_passphrase(&mut self, passphrase: Option<&str>) {
        if self.passphrase.is_none() {
            self.passphrase = passphrase.filter(|p| !p.is_empty()).map(str::to_string);
        }
    }

    /// Escrow certificate for `url`; an absent or unknown URL means no escrow.
    pub fn escrow_certificate(&self, url: Option<&str>) -> Option<String> {
        self.options.escrow_certificates.get(url?).cloned()
    }

    /// Next free `luks<N>` name.
    pub fn next_luks_name<E: StorageEngine + ?Sized>(&mut self, engine: &E) -> String {
        loop {
            let name = format!("luks{}", self.luks_counter);
            self.luks_counter += 1;
            if !engine.devices().iter().any(|device| device.answers_to(&name)) {
                return name;
            }
        }
    }

    /// Name a symbolic member name stands for (`pv.01` → `sda2`).
    pub fn remapped<'a>(&'a self, name: &'a str) -> &'a str {
        self.remap.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn set_remap(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.remap.insert(from.into(), to.into());
    }

    pub fn ignore_disk(&mut self, id: DeviceId) {
        self.ignored.insert(id);
    }

    pub fn restrict_to(&mut self, id: DeviceId) {
        self.only_use.insert(id);
    }

    /// Whether a disk may be used: visible, unprotected and not ignored.
    pub fn is_usable_disk(&self, disk: &DeviceNode) -> bool {
        !disk.hidden
            && !disk.protected
            && !self.ignored.contains(&disk.id)
            && (self.only_use.is_empty() || self.only_use.contains(&disk.id))
    }

    pub fn usable_disks<E: StorageEngine + ?Sized>(&self, engine: &E) -> Vec<DeviceId> {
        engine
            .disks()
            .into_iter()
            .filter(|&id| engine.device(id).is_some_and(|disk| self.is_usable_disk(disk)))
            .collect()
    }

    pub fn set_clear_selection(&mut self, selection: ClearSelection) {
        self.clear = Some(selection);
    }

    /// Whether clear-partitions applies to `disk`.
    pub fn should_clear(&self, disk: DeviceId) -> bool {
        self.clear.as_ref().is_some_and(|clear| {
            clear.kind != ClearPartType::None
                && (clear.drives.is_empty() || clear.drives.contains(&disk))
        })
    }

    pub fn record_deferred(&mut self, mount: DeferredMount) {
        self.deferred.retain(|existing| existing.device != mount.device);
        self.deferred.push(mount);
    }

    pub fn deferred_mounts(&self) -> &[DeferredMount] {
        &self.deferred
    }
}
