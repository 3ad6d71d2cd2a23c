// SPDX-License-Identifier: GPL-3.0-only

//! Space allocation for requested devices
//!
//! Fixed-size requests take their size; grow requests start from their base
//! size and share what is left equally, each capped by its maximum size.

use storage_types::{Bytes, MIB, RaidLevel};

/// Offset of the first partition and size of the trailing reserve (GPT backup header).
pub const DISK_RESERVE: Bytes = MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowRequest {
    pub base: Bytes,
    pub max: Option<Bytes>,
}

pub fn align_down(value: Bytes, alignment: Bytes) -> Bytes {
    if alignment == 0 {
        value
    } else {
        value - value % alignment
    }
}

pub fn align_up(value: Bytes, alignment: Bytes) -> Bytes {
    if alignment == 0 || value % alignment == 0 {
        value
    } else {
        value + (alignment - value % alignment)
    }
}

/// Split `free` among grow requests in `alignment` steps.
pub fn distribute(free: Bytes, requests: &[GrowRequest], alignment: Bytes) -> Vec<Bytes> {
    let mut sizes: Vec<Bytes> = requests
        .iter()
        .map(|request| match request.max {
            Some(max) => request.base.min(max),
            None => request.base,
        })
        .collect();
    let mut remaining = free.saturating_sub(sizes.iter().sum());
    let mut active: Vec<usize> = (0..requests.len())
        .filter(|&i| requests[i].max.is_none_or(|max| sizes[i] < max))
        .collect();

    while !active.is_empty() {
        let share = align_down(remaining / active.len() as Bytes, alignment);
        if share == 0 {
            break;
        }

        let mut capped = false;
        active.retain(|&i| {
            let room = requests[i].max.map_or(share, |max| max - sizes[i]);
            let grant = share.min(room);
            sizes[i] += grant;
            remaining -= grant;
            let open = grant == share && requests[i].max.is_none_or(|max| sizes[i] < max);
            capped |= !open;
            open
        });

        if !capped {
            break;
        }
    }

    sizes
}

/// Usable size of an md array built from `members` of which `active` are not spares.
pub fn md_array_size(level: RaidLevel, members: &[Bytes], active: usize) -> Bytes {
    let active_members = &members[..active.min(members.len())];
    let smallest = active_members.iter().copied().min().unwrap_or(0);
    let count = active_members.len() as Bytes;
    match level {
        RaidLevel::Linear | RaidLevel::Raid0 => active_members.iter().sum(),
        RaidLevel::Raid1 => smallest,
        RaidLevel::Raid4 | RaidLevel::Raid5 => smallest * count.saturating_sub(1),
        RaidLevel::Raid6 => smallest * count.saturating_sub(2),
        RaidLevel::Raid10 => smallest * count / 2,
    }
}
