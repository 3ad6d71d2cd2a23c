// SPDX-License-Identifier: GPL-3.0-only

//! Locating declared disks and command device specs in the working tree

use storage_contracts::{DeviceProbe, StorageEngine, StorageError, StorageErrorKind};
use storage_types::{DeviceId, DeviceKind, FormatKind, MatchCriteria, MatchStrategy};
use tracing::{debug, info};

use crate::error::{ResolveError, Result};

const BY_ID_DIR: &str = "/dev/disk/by-id";

/// Probe used when no match script helper is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl DeviceProbe for NoProbe {
    fn probe(&self, script: &str, _name: &str) -> std::result::Result<String, StorageError> {
        Err(StorageError::new(
            StorageErrorKind::Unavailable,
            format!("no probe helper configured to run match script {script:?}"),
        ))
    }
}

/// Resolve a disk by the highest-priority criterion present.
///
/// Incomplete devices are never returned unless `allow_incomplete` is set.
pub fn resolve<E: StorageEngine + ?Sized>(
    engine: &E,
    probe: &dyn DeviceProbe,
    criteria: &MatchCriteria,
    symbolic_name: &str,
) -> Result<Option<DeviceId>> {
    let strategy = criteria.strategy(symbolic_name);
    let found = match strategy {
        MatchStrategy::Id(id) => engine.by_path(&format!("{BY_ID_DIR}/{id}")),
        MatchStrategy::Label(label) => engine.by_label(label),
        MatchStrategy::Name(name) => engine.by_name(name),
        MatchStrategy::Path(path) => engine.by_path(path),
        MatchStrategy::SysfsPath(sysfs_path) => engine.by_sysfs_path(sysfs_path),
        MatchStrategy::Uuid(uuid) => engine.by_uuid(uuid),
        MatchStrategy::Script(script) => {
            let output = probe
                .probe(script, symbolic_name)
                .map_err(|source| ResolveError::Io {
                    context: format!("match script for disk {symbolic_name}"),
                    source,
                })?;
            let path = if output.starts_with('/') {
                output
            } else {
                format!("/dev/{output}")
            };
            engine.by_path(&path)
        }
        MatchStrategy::PhysicalPos(position) => {
            engine.by_physical_position(position, criteria.allow_incomplete)
        }
    };

    let found = found.filter(|&id| {
        criteria.allow_incomplete || engine.device(id).is_some_and(|device| !device.incomplete)
    });
    debug!("{strategy:?} for disk {symbolic_name} matched {found:?}");
    Ok(found)
}

/// Multipath members stand for the multipath device assembled on top of them.
pub fn promote_multipath<E: StorageEngine + ?Sized>(engine: &E, id: DeviceId) -> DeviceId {
    let is_member = engine
        .device(id)
        .is_some_and(|device| device.format_kind() == Some(FormatKind::MultipathMember));
    if !is_member {
        return id;
    }
    let promoted = engine.children(id).into_iter().find(|&child| {
        engine
            .device(child)
            .is_some_and(|device| device.kind == DeviceKind::Multipath)
    });
    match promoted {
        Some(mpath) => {
            info!("promoting multipath member {id} to {mpath}");
            mpath
        }
        None => id,
    }
}

/// Resolve a kickstart-style device spec (`sda2`, `/dev/sda2`, `LABEL=x`,
/// `UUID=x`, `mapper/x`).
pub fn resolve_devspec<E: StorageEngine + ?Sized>(engine: &E, spec: &str) -> Option<DeviceId> {
    let spec = spec.trim();
    if let Some(label) = spec.strip_prefix("LABEL=") {
        return engine.by_label(label);
    }
    if let Some(uuid) = spec.strip_prefix("UUID=") {
        return engine.by_uuid(&uuid.to_ascii_lowercase());
    }

    let name = spec.strip_prefix("/dev/").unwrap_or(spec);
    if let Some(mapped) = name.strip_prefix("mapper/") {
        return engine
            .by_name(mapped)
            .or_else(|| engine.by_path(&format!("/dev/mapper/{mapped}")));
    }
    engine
        .by_name(name)
        .or_else(|| engine.by_path(&format!("/dev/{name}")))
}

/// Devices whose name matches a shell-style glob (`sd*`, `vd[ab]`), in tree
/// order; specs without wildcards fall back to [`resolve_devspec`].
pub fn matches<E: StorageEngine + ?Sized>(engine: &E, pattern: &str) -> Vec<DeviceId> {
    let pattern = pattern.trim();
    let bare = pattern.strip_prefix("/dev/").unwrap_or(pattern);
    if !bare.contains(['*', '?', '[']) {
        return resolve_devspec(engine, pattern).into_iter().collect();
    }
    engine
        .visible()
        .filter(|device| glob_match(bare, &device.name))
        .map(|device| device.id)
        .collect()
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_at(&pattern, &text)
}

fn glob_at(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => (0..=text.len()).any(|skip| glob_at(&pattern[1..], &text[skip..])),
        Some('?') => !text.is_empty() && glob_at(&pattern[1..], &text[1..]),
        Some('[') => {
            // An unclosed bracket is an ordinary character.
            let Some(close) = class_end(pattern) else {
                return text.first() == Some(&'[') && glob_at(&pattern[1..], &text[1..]);
            };
            let Some(&c) = text.first() else {
                return false;
            };
            let (negate, class) = match pattern[1] {
                '!' | '^' => (true, &pattern[2..close]),
                _ => (false, &pattern[1..close]),
            };
            class_contains(class, c) != negate && glob_at(&pattern[close + 1..], &text[1..])
        }
        Some(&literal) => text.first() == Some(&literal) && glob_at(&pattern[1..], &text[1..]),
    }
}

/// Index of the `]` closing the class opened at `pattern[0]`. A `]` right
/// after the opening bracket (or its negation) is a member, not the end.
fn class_end(pattern: &[char]) -> Option<usize> {
    let mut first = 1;
    if matches!(pattern.get(first), Some('!' | '^')) {
        first += 1;
    }
    pattern
        .iter()
        .skip(first + 1)
        .position(|&c| c == ']')
        .map(|offset| offset + first + 1)
}

fn class_contains(class: &[char], c: char) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= c && c <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}
