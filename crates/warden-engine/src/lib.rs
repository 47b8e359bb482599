//! # warden-engine: The rights engine
//!
//! Warden answers two questions for every administrative or data-access
//! operation against the directory: may this grantee perform this right on
//! this target, and which attributes of the target may it read or write --
//! and it explains *why*, reporting the decisive grant for audit trails
//! and delegated-admin consoles.
//!
//! ## Precedence
//!
//! 1. A suspended or shut-down domain denies everything, before any grant.
//! 2. The first ancestor-chain level with a matching grant decides; closer
//!    levels beat farther ones regardless of polarity.
//! 3. Within a level, an individual grantee beats a group grantee beats
//!    the pseudo-grantees.
//! 4. At equal specificity, deny beats allow.
//! 5. No matching grant anywhere means deny, with no via-grant.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_catalog::RightCatalog;
//! use warden_directory::{AttributeRegistry, Directory, Entry};
//! use warden_engine::{AccessManager, AclAccessManager};
//! use warden_types::{GranteeType, RightModifier, TargetType};
//!
//! let directory = Arc::new(Directory::new());
//! directory.insert(Entry::new(TargetType::Domain, "d-1", "example.com")).unwrap();
//! directory.insert(
//!     Entry::new(TargetType::Account, "u-admin", "admin@example.com")
//!         .in_domain("example.com")
//!         .admin_account(),
//! ).unwrap();
//! directory.insert(
//!     Entry::new(TargetType::Account, "u-alice", "alice@example.com")
//!         .in_domain("example.com"),
//! ).unwrap();
//!
//! let manager = AclAccessManager::new(
//!     directory,
//!     RightCatalog::core().unwrap(),
//!     AttributeRegistry::core().unwrap(),
//! );
//!
//! manager.grant_right(
//!     None,
//!     TargetType::Account,
//!     Some("alice@example.com"),
//!     GranteeType::User,
//!     Some("admin@example.com"),
//!     "resetPassword",
//!     RightModifier::None,
//! ).unwrap();
//!
//! assert!(manager
//!     .can_do("admin@example.com", TargetType::Account,
//!             Some("alice@example.com"), "resetPassword", true)
//!     .unwrap());
//! ```

use warden_catalog::CatalogError;
use warden_directory::{ConstraintViolation, DirectoryError};
use warden_grants::GrantError;
use warden_types::{DomainStatus, TargetType};

pub mod effective;
pub mod evaluator;
pub mod manager;

pub use effective::{AllEffectiveRights, EffectiveAttr, EffectiveRights, RightsByTargetType};
pub use evaluator::{AllowedAttrs, Decision, Evaluator, ViaGrant};
pub use manager::{
    AccessManager, AclAccessManager, GlobalAdminAccessManager, GrantInfo, GrantQuery,
    build_access_manager,
};

/// Errors surfaced by the engine.
///
/// A clean rights denial is **not** an error: `can_do` answers `Ok(false)`.
/// Errors abort the calling operation -- failed resolution, an invalid
/// request, the domain-status gate, or a rejected attribute value.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The requested right is not in the catalog.
    #[error("no such right: {0}")]
    NoSuchRight(String),

    /// The target id/name does not resolve.
    #[error("no such {target_type} target: {key}")]
    NoSuchTarget { target_type: TargetType, key: String },

    /// The request itself is malformed: missing target identity, grantee
    /// type not valid for the right, right not grantable on the target.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The target's domain is suspended or shut down. Fatal to the
    /// calling operation, unlike an ordinary rights denial.
    #[error("permission denied: domain {domain} is {status:?}")]
    PermDenied {
        domain: String,
        status: DomainStatus,
    },

    /// A grantor tried to delegate a right it does not hold.
    #[error("permission denied: {grantor} cannot grant {right}")]
    PermDeniedGrant { grantor: String, right: String },

    /// An attribute value was rejected by the schema or a stored
    /// constraint.
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),

    /// The active strategy does not implement this operation.
    #[error("operation not supported by this access manager: {0}")]
    NotSupported(&'static str),

    /// A concurrent writer updated the same grant list first; re-read and
    /// retry.
    #[error("concurrent grant update on {target}; retry")]
    Conflict { target: String },

    /// Right-definition loading failed.
    #[error("right catalog error: {0}")]
    Catalog(CatalogError),

    /// The directory failed below the resolution layer.
    #[error("directory error: {0}")]
    Directory(DirectoryError),

    #[error("internal error: {0}")]
    Internal(&'static str),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<CatalogError> for EngineError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NoSuchRight(name) => EngineError::NoSuchRight(name),
            other => EngineError::Catalog(other),
        }
    }
}

impl From<DirectoryError> for EngineError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NoSuchTarget { target_type, key } => {
                EngineError::NoSuchTarget { target_type, key }
            }
            DirectoryError::MissingTargetIdentity(target_type) => EngineError::InvalidRequest(
                format!("target type {target_type} requires a target identity"),
            ),
            DirectoryError::MissingDomain(target_type) => EngineError::InvalidRequest(format!(
                "target type {target_type} requires a domain for creation-time checks"
            )),
            DirectoryError::VersionConflict { id, .. } => EngineError::Conflict {
                target: id.to_string(),
            },
            other => EngineError::Directory(other),
        }
    }
}

impl From<GrantError> for EngineError {
    fn from(err: GrantError) -> Self {
        match err {
            GrantError::Directory(inner) => inner.into(),
            GrantError::Malformed(raw) => {
                EngineError::InvalidRequest(format!("malformed grant: {raw}"))
            }
        }
    }
}
