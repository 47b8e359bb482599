//! # warden-grants: Stored grants and the grant store accessor
//!
//! Grants live on the target entry as a multi-valued attribute, one
//! encoded access-control entry (ACE) per value:
//!
//! ```text
//! <grantee-id> <grantee-type-code>[:<secret>] [-|*]<right-name>[\[attr,attr\]]
//! ```
//!
//! - `u-bob usr resetPassword` -- allow bob to reset the password
//! - `g-helpdesk grp -resetPassword` -- deny the helpdesk group
//! - `d-corp dom *viewFreeBusy` -- allow, reaching into sub-domains
//! - `visitor@else.net gst:s3cret viewFreeBusy` -- guest grant with secret
//! - `u-bob usr modifyAccount[displayName,description]` -- attr right
//!   narrowed to two attributes
//!
//! Pseudo-grantee types (`adm`, `all`, `pub`) match by who the principal
//! is, not by id; their stored grantee-id slot holds `*`.
//!
//! Parsing is forgiving: a malformed value is skipped and logged, never
//! fatal, so one corrupt grant cannot deny all access to a target. Writes
//! go through [`GrantStore::write`], which relies on the directory's
//! compare-and-swap so concurrent grant and revoke calls cannot silently
//! clobber each other -- a lost race surfaces as a conflict for the caller
//! to retry.

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use warden_directory::{Directory, DirectoryError, Entry};
use warden_types::{EntryId, GranteeType, RightModifier};

/// Placeholder in the grantee-id slot for pseudo-grantee types.
const NO_GRANTEE_ID: &str = "*";

/// Errors raised by the grant store.
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    /// An ACE string does not follow the encoding.
    #[error("malformed grant: {0}")]
    Malformed(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

pub type Result<T> = std::result::Result<T, GrantError>;

/// One access-control entry: a grantee, a right, and a polarity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub grantee_type: GranteeType,
    /// Grantee entry id (or external address for guest/key grantees).
    /// Absent for pseudo-grantee types.
    pub grantee_id: Option<EntryId>,
    /// Guest password or access key, for grantee types that carry one.
    pub secret: Option<String>,
    /// The granted right, by name. May resolve to a combo right; combos
    /// are expanded before evaluation, never evaluated as stored.
    pub right: String,
    pub modifier: RightModifier,
    /// Optional narrowing of an attr right to a subset of its attributes.
    pub attrs: Option<BTreeSet<String>>,
}

impl Grant {
    /// Creates an allow grant to an identified grantee.
    pub fn allow(
        grantee_type: GranteeType,
        grantee_id: impl Into<EntryId>,
        right: impl Into<String>,
    ) -> Self {
        Self {
            grantee_type,
            grantee_id: Some(grantee_id.into()),
            secret: None,
            right: right.into(),
            modifier: RightModifier::None,
            attrs: None,
        }
    }

    /// Creates a deny grant to an identified grantee.
    pub fn deny(
        grantee_type: GranteeType,
        grantee_id: impl Into<EntryId>,
        right: impl Into<String>,
    ) -> Self {
        Self {
            modifier: RightModifier::Deny,
            ..Self::allow(grantee_type, grantee_id, right)
        }
    }

    /// Creates a grant to a pseudo-grantee type (`adm`, `all`, `pub`).
    pub fn pseudo(grantee_type: GranteeType, right: impl Into<String>) -> Self {
        Self {
            grantee_type,
            grantee_id: None,
            secret: None,
            right: right.into(),
            modifier: RightModifier::None,
            attrs: None,
        }
    }

    pub fn with_modifier(mut self, modifier: RightModifier) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_attrs(mut self, attrs: &[&str]) -> Self {
        self.attrs = Some(attrs.iter().map(ToString::to_string).collect());
        self
    }

    pub fn is_deny(&self) -> bool {
        self.modifier.is_deny()
    }

    /// Whether this grant reaches entries in sub-domains of its target.
    pub fn reaches_sub_domains(&self) -> bool {
        self.modifier == RightModifier::SubDomain
    }

    /// Whether two grants name the same grantee, right, and modifier --
    /// the identity used by revoke.
    pub fn same_ace(&self, other: &Grant) -> bool {
        self.grantee_type == other.grantee_type
            && self.grantee_id == other.grantee_id
            && self.right == other.right
            && self.modifier == other.modifier
    }
}

impl Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grantee_id = self
            .grantee_id
            .as_ref()
            .map_or(NO_GRANTEE_ID, EntryId::as_str);
        write!(f, "{grantee_id} {}", self.grantee_type.code())?;
        if let Some(secret) = &self.secret {
            write!(f, ":{secret}")?;
        }
        write!(f, " {}{}", self.modifier.prefix(), self.right)?;
        if let Some(attrs) = &self.attrs {
            let attrs: Vec<&str> = attrs.iter().map(String::as_str).collect();
            write!(f, "[{}]", attrs.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for Grant {
    type Err = GrantError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || GrantError::Malformed(s.to_string());

        let mut fields = s.split_whitespace();
        let grantee_id = fields.next().ok_or_else(malformed)?;
        let grantee_field = fields.next().ok_or_else(malformed)?;
        let right_field = fields.next().ok_or_else(malformed)?;
        if fields.next().is_some() {
            return Err(malformed());
        }

        let (type_code, secret) = match grantee_field.split_once(':') {
            Some((code, secret)) => (code, Some(secret.to_string())),
            None => (grantee_field, None),
        };
        let grantee_type: GranteeType = type_code.parse().map_err(|_| malformed())?;
        if secret.is_some() && !grantee_type.carries_secret() {
            return Err(malformed());
        }

        let grantee_id = if grantee_id == NO_GRANTEE_ID {
            None
        } else {
            Some(EntryId::from(grantee_id))
        };
        if grantee_type.needs_grantee_identity() == grantee_id.is_none() {
            return Err(malformed());
        }

        let (modifier, rest) = RightModifier::split_token(right_field);
        let (right, attrs) = match rest.split_once('[') {
            Some((right, attrs)) => {
                let attrs = attrs.strip_suffix(']').ok_or_else(malformed)?;
                let attrs: BTreeSet<String> = attrs
                    .split(',')
                    .filter(|a| !a.is_empty())
                    .map(ToString::to_string)
                    .collect();
                (right, Some(attrs))
            }
            None => (rest, None),
        };
        if right.is_empty() {
            return Err(malformed());
        }

        Ok(Grant {
            grantee_type,
            grantee_id,
            secret,
            right: right.to_string(),
            modifier,
            attrs,
        })
    }
}

// ============================================================================
// Grant store accessor
// ============================================================================

/// Reads and writes the grants stored on directory entries.
///
/// The accessor performs no locking of its own; write atomicity comes from
/// the directory's versioned compare-and-swap.
#[derive(Debug, Clone)]
pub struct GrantStore {
    directory: Arc<Directory>,
}

impl GrantStore {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self { directory }
    }

    /// Parses the grants stored on an entry.
    ///
    /// Malformed values are skipped and logged; the caller always gets
    /// every readable grant.
    pub fn grants_on(entry: &Entry) -> Vec<Grant> {
        entry
            .aces
            .iter()
            .filter_map(|raw| match raw.parse::<Grant>() {
                Ok(grant) => Some(grant),
                Err(_) => {
                    warn!(target = %entry.name, ace = %raw, "skipping malformed grant");
                    None
                }
            })
            .collect()
    }

    /// Persists a full replacement grant list for an entry.
    ///
    /// `entry` must be the snapshot the caller read and modified; its
    /// version is the compare-and-swap token. On a conflict the caller
    /// re-reads and retries -- the store never retries internally.
    pub fn write(&self, entry: &Entry, grants: &[Grant]) -> Result<()> {
        let aces: Vec<String> = grants.iter().map(ToString::to_string).collect();
        self.directory.update_aces(&entry.id, entry.version, aces)?;
        info!(
            target = %entry.name,
            grants = grants.len(),
            "grant list updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use warden_types::TargetType;

    use super::*;

    #[test_case("u-bob usr resetPassword"; "plain allow")]
    #[test_case("g-helpdesk grp -resetPassword"; "group deny")]
    #[test_case("d-corp dom *viewFreeBusy"; "sub-domain allow")]
    #[test_case("visitor@else.net gst:s3cret viewFreeBusy"; "guest with secret")]
    #[test_case("* pub viewFreeBusy"; "public pseudo grantee")]
    #[test_case("u-bob usr modifyAccount[description,displayName]"; "attr narrowing")]
    fn encoding_round_trips(raw: &str) {
        let grant: Grant = raw.parse().unwrap();
        assert_eq!(grant.to_string(), raw);
    }

    #[test]
    fn parses_fields() {
        let grant: Grant = "g-helpdesk grp -resetPassword".parse().unwrap();
        assert_eq!(grant.grantee_type, GranteeType::Group);
        assert_eq!(grant.grantee_id, Some(EntryId::from("g-helpdesk")));
        assert_eq!(grant.right, "resetPassword");
        assert!(grant.is_deny());
        assert!(grant.attrs.is_none());
    }

    #[test_case(""; "empty")]
    #[test_case("u-bob"; "one field")]
    #[test_case("u-bob usr"; "two fields")]
    #[test_case("u-bob usr right extra"; "four fields")]
    #[test_case("u-bob mystery resetPassword"; "unknown grantee type")]
    #[test_case("u-bob usr:secret resetPassword"; "secret on user grantee")]
    #[test_case("* usr resetPassword"; "missing id for user")]
    #[test_case("u-bob pub resetPassword"; "id for pseudo grantee")]
    #[test_case("u-bob usr -"; "empty right name")]
    #[test_case("u-bob usr modifyAccount[oops"; "unterminated attr list")]
    fn rejects_malformed(raw: &str) {
        assert!(raw.parse::<Grant>().is_err(), "{raw:?}");
    }

    #[test]
    fn grants_on_skips_malformed_values() {
        let mut entry = Entry::new(TargetType::Account, "u-x", "x@test");
        entry.aces = vec![
            "u-bob usr resetPassword".to_string(),
            "complete nonsense".to_string(),
            "g-helpdesk grp -resetPassword".to_string(),
        ];
        let grants = GrantStore::grants_on(&entry);
        assert_eq!(grants.len(), 2);
    }

    #[test]
    fn write_uses_compare_and_swap() {
        let directory = Arc::new(Directory::new());
        directory
            .insert(Entry::new(TargetType::Account, "u-x", "x@test"))
            .unwrap();
        let store = GrantStore::new(Arc::clone(&directory));

        let entry = directory.resolve(TargetType::Account, Some("u-x")).unwrap();
        store
            .write(&entry, &[Grant::allow(GranteeType::User, "u-y", "sendAs")])
            .unwrap();

        // Writing through the stale snapshot must conflict.
        let stale = store.write(&entry, &[]);
        assert!(matches!(
            stale,
            Err(GrantError::Directory(DirectoryError::VersionConflict { .. }))
        ));

        let fresh = directory.resolve(TargetType::Account, Some("u-x")).unwrap();
        assert_eq!(GrantStore::grants_on(&fresh).len(), 1);
    }

    #[test]
    fn same_ace_ignores_attr_narrowing() {
        let a = Grant::allow(GranteeType::User, "u-b", "modifyAccount").with_attrs(&["mail"]);
        let b = Grant::allow(GranteeType::User, "u-b", "modifyAccount");
        assert!(a.same_ace(&b));
        assert!(!a.same_ace(&Grant::deny(GranteeType::User, "u-b", "modifyAccount")));
    }
}
