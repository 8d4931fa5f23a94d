//! Upside-down remap: channel `i`'s value goes to `table[i].target`,
//! reflected around the position range when the entry says so.

use crate::config::{MirrorEntry, POSITION_MAX};

pub fn mirror_pose(table: &[MirrorEntry], pose: &[u16], out: &mut [u16]) {
    for (entry, &v) in table.iter().zip(pose) {
        if let Some(dst) = out.get_mut(entry.target as usize) {
            *dst = if entry.reflect { POSITION_MAX - v.min(POSITION_MAX) } else { v };
        }
    }
}
