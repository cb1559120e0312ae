//! Consensus engines
//!
//! An [`Engine`] decides whether a header may extend its parent and whether
//! the header's seal is valid. The node picks one engine at construction time
//! and shares it between the validator, the miner and the sync code.

pub mod pow;

pub use pow::ProofOfWork;

use crate::core::{Block, Header, LevelTargets};
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Header and seal verification capability
pub trait Engine: Send + Sync + fmt::Debug {
    /// Engine name for logging
    fn name(&self) -> &'static str;

    /// Check that `header` is a valid child of `parent`, seal included
    fn verify_header(&self, header: &Header, parent: &Block) -> Result<(), ValidationError>;

    /// Check the header's seal on its own
    fn verify_seal(&self, header: &Header) -> Result<(), ValidationError>;

    /// Superblock target table used for interlinks
    fn levels(&self) -> &LevelTargets;
}

/// Available engine kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Hash below the level-0 target
    #[default]
    ProofOfWork,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::ProofOfWork => write!(f, "proof-of-work"),
        }
    }
}

/// Build the engine selected by `kind`
pub fn build_engine(kind: EngineKind, levels: LevelTargets) -> Arc<dyn Engine> {
    match kind {
        EngineKind::ProofOfWork => Arc::new(ProofOfWork::new(levels)),
    }
}
