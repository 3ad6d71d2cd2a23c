// SPDX-License-Identifier: GPL-3.0-only

//! Recommended swap sizes

use storage_types::{Bytes, GIB};

/// Swap size recommended for `memory` bytes of RAM.
///
/// With `hibernation`, room for a memory image is added on systems with at
/// most 64 GiB.
pub fn suggest_swap_size(memory: Bytes, hibernation: bool) -> Bytes {
    let base = if memory < 2 * GIB {
        2 * memory
    } else if memory < 8 * GIB {
        memory
    } else if memory < 64 * GIB {
        memory / 2
    } else {
        4 * GIB
    };

    if hibernation && memory <= 64 * GIB {
        base + memory
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_with_memory() {
        assert_eq!(suggest_swap_size(GIB, false), 2 * GIB);
        assert_eq!(suggest_swap_size(4 * GIB, false), 4 * GIB);
        assert_eq!(suggest_swap_size(16 * GIB, false), 8 * GIB);
        assert_eq!(suggest_swap_size(128 * GIB, false), 4 * GIB);
    }

    #[test]
    fn hibernation_adds_a_memory_image() {
        assert_eq!(suggest_swap_size(4 * GIB, true), 8 * GIB);
        assert_eq!(suggest_swap_size(128 * GIB, true), 4 * GIB);
    }
}
