//! Right definitions.
//!
//! A right is the unit of delegation: a named operation (preset right), a
//! named set of readable or writable attributes (attr right), or a bundle
//! of other rights (combo right).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use warden_types::TargetType;

/// Which way an attribute right moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrDirection {
    /// Read attribute values.
    Get,
    /// Write attribute values.
    Set,
}

/// The kind of a right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RightKind {
    /// A named operation, e.g. `resetPassword`.
    #[serde(rename = "preset")]
    Preset,
    /// Permission to read a set of attributes.
    #[serde(rename = "getAttrs")]
    GetAttrs,
    /// Permission to write a set of attributes.
    #[serde(rename = "setAttrs")]
    SetAttrs,
    /// Shorthand for a list of other rights.
    #[serde(rename = "combo")]
    Combo,
}

impl RightKind {
    pub fn is_attr(self) -> bool {
        matches!(self, RightKind::GetAttrs | RightKind::SetAttrs)
    }

    /// Whether a grant of this kind can satisfy a request in `direction`.
    ///
    /// A set-attrs grant also covers get-attrs requests: being allowed to
    /// write an attribute implies being allowed to read it. The converse
    /// does not hold.
    pub fn suits(self, direction: AttrDirection) -> bool {
        match self {
            RightKind::GetAttrs => direction == AttrDirection::Get,
            RightKind::SetAttrs => true,
            RightKind::Preset | RightKind::Combo => false,
        }
    }

    /// The direction an attr right grants in, if it is one.
    pub fn direction(self) -> Option<AttrDirection> {
        match self {
            RightKind::GetAttrs => Some(AttrDirection::Get),
            RightKind::SetAttrs => Some(AttrDirection::Set),
            RightKind::Preset | RightKind::Combo => None,
        }
    }
}

/// The attribute coverage of an attr right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrScope {
    /// Every attribute defined for the target type.
    All,
    /// An explicit attribute set.
    Named(BTreeSet<String>),
}

impl AttrScope {
    pub fn is_all(&self) -> bool {
        matches!(self, AttrScope::All)
    }

    /// Whether this scope covers the named attribute.
    pub fn covers(&self, attr: &str) -> bool {
        match self {
            AttrScope::All => true,
            AttrScope::Named(attrs) => attrs.contains(attr),
        }
    }
}

/// A single right in the catalog.
///
/// Rights are immutable once loaded. Combo members are stored by name and
/// resolved through the catalog, which guarantees at load time that every
/// member exists and that no combo cycle exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Right {
    /// Unique right name, e.g. `resetPassword`.
    pub name: String,
    /// One-line description for admin tooling.
    pub desc: String,
    /// Preset, attr, or combo.
    pub kind: RightKind,
    /// Target types the right executes on. For combos this is the union
    /// of the members' target types, computed at load.
    pub target_types: BTreeSet<TargetType>,
    /// Attribute coverage. Only meaningful for attr rights.
    pub attrs: AttrScope,
    /// Member right names. Only non-empty for combo rights.
    pub members: Vec<String>,
    /// User rights may be granted to any grantee type and checked without
    /// admin vetting; admin rights require a delegated-admin grantee.
    pub user_right: bool,
}

impl Right {
    /// Whether the right can be exercised on a target of this type.
    pub fn applicable_to(&self, target_type: TargetType) -> bool {
        self.target_types.contains(&target_type)
    }

    /// Whether a grant of this right may be placed on an entry of this
    /// type.
    ///
    /// Beyond the types the right executes on, grants may sit on any
    /// scope entries of an applicable type inherit from: admin groups for
    /// group-able types, the domain for domained types, and the global
    /// config for everything.
    pub fn grantable_on(&self, target_type: TargetType) -> bool {
        if self.applicable_to(target_type) {
            return true;
        }
        match target_type {
            TargetType::GlobalConfig => true,
            TargetType::Domain | TargetType::DistributionList => {
                self.target_types.iter().any(|t| t.is_domained())
            }
            _ => false,
        }
    }

    pub fn is_preset(&self) -> bool {
        self.kind == RightKind::Preset
    }

    pub fn is_attr(&self) -> bool {
        self.kind.is_attr()
    }

    pub fn is_combo(&self) -> bool {
        self.kind == RightKind::Combo
    }

    /// Formats the grantable target types for error messages.
    pub fn report_grantable_types(&self) -> String {
        let mut types: Vec<&str> = TargetType::ALL
            .into_iter()
            .filter(|tt| self.grantable_on(*tt))
            .map(TargetType::code)
            .collect();
        types.sort_unstable();
        types.join(", ")
    }
}
