//! Proof-of-work targets and the per-level superblock target table

use crate::core::INTERLINK_LEVELS;
use crate::types::Hash;
use crate::{Error, Result};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents a 256-bit proof-of-work target (big-endian)
///
/// A hash meets the target when it is strictly below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target(pub [u8; 32]);

impl Target {
    /// The easiest possible target (2^256 - 1)
    pub const MAX: Target = Target([0xFF; 32]);

    /// Create a new Target from big-endian bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the target as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create a target with a specific number of leading zero bits
    pub fn from_difficulty_bits(leading_zeros: u32) -> Self {
        if leading_zeros >= 256 {
            return Self([0u8; 32]);
        }

        let mut bytes = [0xFFu8; 32];
        let zero_bytes = (leading_zeros / 8) as usize;
        let remaining_bits = leading_zeros % 8;

        for byte in bytes.iter_mut().take(zero_bytes) {
            *byte = 0;
        }
        if zero_bytes < 32 && remaining_bits > 0 {
            bytes[zero_bytes] = 0xFF >> remaining_bits;
        }

        Self(bytes)
    }

    /// Number of leading zero bits, a rough difficulty level
    pub fn difficulty_level(&self) -> u32 {
        let mut zeros = 0;
        for &byte in &self.0 {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    /// Check if a hash meets this target (is strictly below it)
    #[inline]
    pub fn is_met_by(&self, hash: &Hash) -> bool {
        hash.0 < self.0
    }

    /// Target as a big unsigned integer
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Shift the target right, making it `2^bits` times harder to meet
    pub fn harder_by(&self, bits: u32) -> Self {
        let shifted = self.to_biguint() >> bits;
        let bytes = shifted.to_bytes_be();
        let mut target = [0u8; 32];
        if !shifted.is_zero() {
            target[32 - bytes.len()..].copy_from_slice(&bytes);
        }
        Self(target)
    }

    /// Whether no hash can meet this target
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| Error::config(format!("Invalid target hex: {}", e)))?;
        let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            Error::config(format!("Expected 32 target bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Target::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Superblock target table
///
/// `level_target(i) = base >> (i * level_shift)`. Level 0 is the base
/// proof-of-work target every block must meet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTargets {
    targets: [Target; INTERLINK_LEVELS],
    level_shift: u32,
}

impl LevelTargets {
    /// Build the table from a base target and a per-level shift
    pub fn new(base: Target, level_shift: u32) -> Result<Self> {
        if level_shift == 0 {
            return Err(Error::config("Level shift must be at least 1"));
        }

        let mut targets = [base; INTERLINK_LEVELS];
        for (level, target) in targets.iter_mut().enumerate() {
            *target = base.harder_by(level as u32 * level_shift);
        }

        if targets[INTERLINK_LEVELS - 1].is_zero() {
            return Err(Error::config(format!(
                "Top interlink level is unreachable with base difficulty {} and level shift {}",
                base.difficulty_level(),
                level_shift
            )));
        }

        Ok(Self {
            targets,
            level_shift,
        })
    }

    /// Build the table from a difficulty expressed in leading zero bits
    pub fn from_difficulty_bits(difficulty: u32, level_shift: u32) -> Result<Self> {
        if difficulty >= 256 {
            return Err(Error::config("Difficulty must be below 256 bits"));
        }
        Self::new(Target::from_difficulty_bits(difficulty), level_shift)
    }

    /// The level-0 proof-of-work target
    pub fn base(&self) -> Target {
        self.targets[0]
    }

    /// Shift applied per level
    pub fn level_shift(&self) -> u32 {
        self.level_shift
    }

    /// Target for `level`; levels past the table reuse the top target
    pub fn level_target(&self, level: usize) -> Target {
        self.targets[level.min(INTERLINK_LEVELS - 1)]
    }

    /// Whether `hash` qualifies as a level-`level` superblock
    pub fn qualifies(&self, hash: &Hash, level: usize) -> bool {
        level < INTERLINK_LEVELS && self.targets[level].is_met_by(hash)
    }

    /// Highest level `hash` satisfies, or `None` if it misses the base target
    pub fn level_of(&self, hash: &Hash) -> Option<usize> {
        self.targets.iter().rposition(|target| target.is_met_by(hash))
    }
}
