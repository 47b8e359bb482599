//! # warden-types: Core types for `Warden`
//!
//! This crate contains shared types used across the `Warden` rights engine:
//! - Entry identity ([`EntryId`])
//! - Target classification ([`TargetType`])
//! - Grantee classification ([`GranteeType`], [`GranteeClass`])
//! - Grant polarity ([`RightModifier`])
//! - Domain availability ([`DomainStatus`])
//!
//! The string codes carried by [`TargetType`], [`GranteeType`] and
//! [`RightModifier`] are the stable, externally documented identifiers used
//! in stored grants, right-definition files, and admin tooling. Changing a
//! code is a wire-format break.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Entry identity
// ============================================================================

/// Unique identifier of a directory entry.
///
/// Ids are opaque strings assigned by the directory (UUIDs in practice).
/// Grants reference grantees and targets by id, never by name, so renames
/// do not invalidate grants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Target types
// ============================================================================

/// Raised when a stable wire code does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} code: {code}")]
pub struct UnknownCode {
    /// Which vocabulary the code failed to parse into.
    pub kind: &'static str,
    /// The offending code.
    pub code: String,
}

/// The category of directory entry a grant is issued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TargetType {
    /// A user mailbox account.
    Account,
    /// A calendar resource (room, equipment). Shares most account behavior.
    CalResource,
    /// A distribution list; also serves as an admin-delegate group.
    DistributionList,
    /// A class of service.
    Cos,
    /// A domain.
    Domain,
    /// A server node.
    Server,
    /// An XMPP component.
    XmppComponent,
    /// The singleton global configuration root.
    GlobalConfig,
}

impl TargetType {
    /// All target types, in display order.
    pub const ALL: [TargetType; 8] = [
        TargetType::Account,
        TargetType::CalResource,
        TargetType::DistributionList,
        TargetType::Cos,
        TargetType::Domain,
        TargetType::Server,
        TargetType::XmppComponent,
        TargetType::GlobalConfig,
    ];

    /// The stable wire code for this target type.
    pub fn code(self) -> &'static str {
        match self {
            TargetType::Account => "account",
            TargetType::CalResource => "calresource",
            TargetType::DistributionList => "dl",
            TargetType::Cos => "cos",
            TargetType::Domain => "domain",
            TargetType::Server => "server",
            TargetType::XmppComponent => "xmppcomponent",
            TargetType::GlobalConfig => "global",
        }
    }

    /// Whether resolving a target of this type requires an identifier.
    ///
    /// The global config is a singleton; everything else is looked up by
    /// id or name.
    pub fn needs_target_identity(self) -> bool {
        !matches!(self, TargetType::GlobalConfig)
    }

    /// Whether entries of this type live inside a domain.
    pub fn is_domained(self) -> bool {
        matches!(
            self,
            TargetType::Account | TargetType::CalResource | TargetType::DistributionList
        )
    }
}

impl Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for TargetType {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetType::ALL
            .into_iter()
            .find(|t| t.code() == s)
            .ok_or_else(|| UnknownCode {
                kind: "target type",
                code: s.to_string(),
            })
    }
}

impl TryFrom<String> for TargetType {
    type Error = UnknownCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetType> for String {
    fn from(value: TargetType) -> Self {
        value.code().to_string()
    }
}

// ============================================================================
// Grantee types
// ============================================================================

/// How specific a grantee match is.
///
/// When an entry carries several applicable grants at the same
/// ancestor-chain level, the decision is taken class by class: a grant
/// matching the principal individually beats one matching through group
/// membership, which beats domain/cos membership, which beats the
/// catch-all authenticated classes, which beat public.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GranteeClass {
    /// The principal itself (user, guest, or access-key grantee).
    Individual,
    /// An admin-delegate group the principal belongs to.
    Group,
    /// Everyone in a named domain or class of service.
    Membership,
    /// Any authenticated admin, or any authenticated user.
    Authenticated,
    /// Anyone, authenticated or not.
    Public,
}

impl GranteeClass {
    /// All classes, most specific first. Evaluation walks this order.
    pub const ORDERED: [GranteeClass; 5] = [
        GranteeClass::Individual,
        GranteeClass::Group,
        GranteeClass::Membership,
        GranteeClass::Authenticated,
        GranteeClass::Public,
    ];
}

/// The kind of principal a grant is issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GranteeType {
    /// A single account.
    User,
    /// An admin-delegate group (distribution list with the admin flag).
    Group,
    /// Every account in a domain.
    Domain,
    /// Every account assigned a class of service.
    Cos,
    /// Every delegated or global admin account.
    AllAdmins,
    /// Every authenticated account.
    AuthUser,
    /// An external guest identified by email and password.
    Guest,
    /// An external party identified by an access key.
    Key,
    /// Anyone.
    Public,
}

impl GranteeType {
    /// All grantee types, in display order.
    pub const ALL: [GranteeType; 9] = [
        GranteeType::User,
        GranteeType::Group,
        GranteeType::Domain,
        GranteeType::Cos,
        GranteeType::AllAdmins,
        GranteeType::AuthUser,
        GranteeType::Guest,
        GranteeType::Key,
        GranteeType::Public,
    ];

    /// The stable wire code for this grantee type.
    pub fn code(self) -> &'static str {
        match self {
            GranteeType::User => "usr",
            GranteeType::Group => "grp",
            GranteeType::Domain => "dom",
            GranteeType::Cos => "cos",
            GranteeType::AllAdmins => "adm",
            GranteeType::AuthUser => "all",
            GranteeType::Guest => "gst",
            GranteeType::Key => "key",
            GranteeType::Public => "pub",
        }
    }

    /// Whether grants of admin rights may name this grantee type.
    ///
    /// Admin rights are only honored for grantees that can be vetted as
    /// delegated admins; user rights accept every grantee type.
    pub fn allowed_for_admin_rights(self) -> bool {
        matches!(
            self,
            GranteeType::User | GranteeType::Group | GranteeType::AllAdmins
        )
    }

    /// Whether this grantee type names an entry (and therefore carries a
    /// grantee id in stored grants). Pseudo-grantees match by who the
    /// principal is, not by id.
    pub fn needs_grantee_identity(self) -> bool {
        !matches!(
            self,
            GranteeType::AllAdmins | GranteeType::AuthUser | GranteeType::Public
        )
    }

    /// Whether grants to this grantee type carry a secret (guest password
    /// or access key) in their stored form.
    pub fn carries_secret(self) -> bool {
        matches!(self, GranteeType::Guest | GranteeType::Key)
    }

    /// The specificity class this grantee type matches at.
    pub fn class(self) -> GranteeClass {
        match self {
            GranteeType::User | GranteeType::Guest | GranteeType::Key => GranteeClass::Individual,
            GranteeType::Group => GranteeClass::Group,
            GranteeType::Domain | GranteeType::Cos => GranteeClass::Membership,
            GranteeType::AllAdmins | GranteeType::AuthUser => GranteeClass::Authenticated,
            GranteeType::Public => GranteeClass::Public,
        }
    }
}

impl Display for GranteeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for GranteeType {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GranteeType::ALL
            .into_iter()
            .find(|g| g.code() == s)
            .ok_or_else(|| UnknownCode {
                kind: "grantee type",
                code: s.to_string(),
            })
    }
}

impl TryFrom<String> for GranteeType {
    type Error = UnknownCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GranteeType> for String {
    fn from(value: GranteeType) -> Self {
        value.code().to_string()
    }
}

// ============================================================================
// Right modifiers
// ============================================================================

/// Polarity and scope modifier on a grant.
///
/// Encoded on the wire as a prefix to the right name: no prefix for an
/// ordinary allow, `-` for a deny, `*` for an allow that also reaches
/// entries in descendant sub-domains (only meaningful on domain targets).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RightModifier {
    /// Plain allow.
    #[default]
    None,
    /// Negative grant. Beats an allow of equal specificity.
    Deny,
    /// Allow that also applies to entries in sub-domains of the target.
    SubDomain,
}

impl RightModifier {
    /// The wire prefix for this modifier.
    pub fn prefix(self) -> &'static str {
        match self {
            RightModifier::None => "",
            RightModifier::Deny => "-",
            RightModifier::SubDomain => "*",
        }
    }

    /// Splits a prefixed right token into its modifier and bare right name.
    pub fn split_token(token: &str) -> (RightModifier, &str) {
        if let Some(rest) = token.strip_prefix('-') {
            (RightModifier::Deny, rest)
        } else if let Some(rest) = token.strip_prefix('*') {
            (RightModifier::SubDomain, rest)
        } else {
            (RightModifier::None, token)
        }
    }

    /// Whether a matching grant with this modifier denies the right.
    pub fn is_deny(self) -> bool {
        matches!(self, RightModifier::Deny)
    }
}

// ============================================================================
// Domain status
// ============================================================================

/// Operational status of a domain.
///
/// `Suspended` and `Shutdown` gate all access to the domain's entries
/// before any grant is consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    /// Normal operation.
    #[default]
    Active,
    /// New entries cannot be created; existing entries work normally.
    Locked,
    /// Administrative maintenance; data access restricted, admin ops work.
    Maintenance,
    /// All access suspended pending administrative action.
    Suspended,
    /// Domain is being decommissioned.
    Shutdown,
}

impl DomainStatus {
    /// Whether this status blocks every operation on the domain's entries.
    pub fn blocks_access(self) -> bool {
        matches!(self, DomainStatus::Suspended | DomainStatus::Shutdown)
    }
}
