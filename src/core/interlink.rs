//! Interlink maintenance
//!
//! Each header records, per level, the number of the most recent ancestor
//! whose hash met that level's target. A child copies its parent's vector and
//! overwrites every level the parent itself qualifies for.

use crate::core::{Header, Interlink, LevelTargets, INTERLINK_LEVELS};
use crate::types::Hash;

/// Interlink a child of `parent` must carry
pub fn next_interlink(parent: &Header, levels: &LevelTargets) -> Interlink {
    derive_interlink(parent, &parent.hash(), levels)
}

/// Same as [`next_interlink`] with the parent hash already known
pub fn derive_interlink(parent: &Header, parent_hash: &Hash, levels: &LevelTargets) -> Interlink {
    let mut interlink = parent.interlink;
    for level in 0..INTERLINK_LEVELS {
        if levels.qualifies(parent_hash, level) {
            interlink.0[level] = parent.number;
        }
    }
    interlink
}
