//! # warden-catalog: Right catalog
//!
//! The catalog holds every right the engine knows about: preset operation
//! rights, attribute get/set rights, and combo rights that bundle other
//! rights. It is loaded from TOML definition files at startup, immutable
//! afterwards, and rebuilt wholesale by an explicit reload when extension
//! rights are installed.
//!
//! ## Example
//!
//! ```
//! use warden_catalog::RightCatalog;
//! use warden_types::TargetType;
//!
//! let catalog = RightCatalog::core().unwrap();
//! let right = catalog.lookup("resetPassword").unwrap();
//! assert!(right.applicable_to(TargetType::Account));
//!
//! // Combo rights expand to their leaf rights, duplicates removed.
//! let leaves = catalog.expand_name("domainAdminRights").unwrap();
//! assert!(leaves.iter().all(|r| !r.is_combo()));
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub mod loader;
pub mod right;

pub use right::{AttrDirection, AttrScope, Right, RightKind};

/// Errors raised while loading or querying the catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// An unknown right name was requested.
    #[error("no such right: {0}")]
    NoSuchRight(String),

    /// A combo right reaches itself through its members. Fatal at load.
    #[error("invalid combo right {right}: membership cycle through {via}")]
    InvalidComboRight { right: String, via: String },

    /// A combo names a member that is not defined anywhere.
    #[error("combo right {combo} references unknown right {member}")]
    UnknownMember { combo: String, member: String },

    /// A definition is structurally invalid.
    #[error("invalid right definition: {0}")]
    InvalidDefinition(String),

    /// A definition uses an unknown target-type code.
    #[error(transparent)]
    UnknownCode(#[from] warden_types::UnknownCode),

    #[error("cannot read right definitions: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed right definition file: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// The core right definitions shipped with the engine.
const CORE_RIGHTS: &str = include_str!("../defs/warden-rights.toml");

/// Immutable table of all known rights.
///
/// # Thread Safety
///
/// The catalog is read-only after construction and is shared behind an
/// `Arc`. A reload builds a fresh catalog and swaps the `Arc`; in-flight
/// evaluations keep the snapshot they started with.
#[derive(Debug, Clone)]
pub struct RightCatalog {
    rights: BTreeMap<String, Arc<Right>>,
}

impl RightCatalog {
    /// Loads the built-in core rights.
    pub fn core() -> Result<Self> {
        let mut defs = BTreeMap::new();
        loader::parse_doc(CORE_RIGHTS, &mut defs)?;
        Ok(Self {
            rights: loader::link(defs)?,
        })
    }

    /// Loads every `.toml` definition file in a directory.
    ///
    /// This is also the reload entry point: calling it again on the same
    /// directory produces an equivalent catalog (idempotent), which the
    /// owner swaps in atomically.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let defs = loader::read_dir(dir.as_ref())?;
        Ok(Self {
            rights: loader::link(defs)?,
        })
    }

    /// Looks a right up by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<Right>> {
        self.rights
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NoSuchRight(name.to_string()))
    }

    /// All rights, optionally filtered to those applicable to one target
    /// type. Sorted by name.
    pub fn all_rights(&self, target_type: Option<warden_types::TargetType>) -> Vec<Arc<Right>> {
        self.rights
            .values()
            .filter(|right| target_type.is_none_or(|tt| right.applicable_to(tt)))
            .cloned()
            .collect()
    }

    /// Expands a right into its leaf preset/attr rights.
    ///
    /// Preset and attr rights expand to themselves. Combo rights expand
    /// depth-first in member declaration order with duplicates removed,
    /// so repeated expansion of the same right yields the same list.
    pub fn expand(&self, right: &Right) -> Result<Vec<Arc<Right>>> {
        let mut leaves = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        self.expand_into(right, &mut leaves, &mut seen)?;
        Ok(leaves)
    }

    /// [`expand`](Self::expand), starting from a right name.
    pub fn expand_name(&self, name: &str) -> Result<Vec<Arc<Right>>> {
        let right = self.lookup(name)?;
        self.expand(&right)
    }

    fn expand_into(
        &self,
        right: &Right,
        leaves: &mut Vec<Arc<Right>>,
        seen: &mut std::collections::BTreeSet<String>,
    ) -> Result<()> {
        if right.is_combo() {
            for member in &right.members {
                let member = self.lookup(member).map_err(|_| {
                    // Load-time linking makes this unreachable for catalogs
                    // built through the loader; kept for hand-built tables.
                    CatalogError::UnknownMember {
                        combo: right.name.clone(),
                        member: member.clone(),
                    }
                })?;
                self.expand_into(&member, leaves, seen)?;
            }
        } else if seen.insert(right.name.clone()) {
            leaves.push(self.lookup(&right.name)?);
        }
        Ok(())
    }
}
