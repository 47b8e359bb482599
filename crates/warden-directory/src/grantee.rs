//! Grantee expansion.
//!
//! A grant names one grantee, but a principal can satisfy it many ways:
//! directly, through nested group membership, through its domain or class
//! of service, or through one of the pseudo-grantee types. [`GranteeSet`]
//! is the principal expanded into everything it can match as, computed
//! once per evaluation.

use std::collections::BTreeSet;

use tracing::debug;
use warden_types::{EntryId, GranteeType, TargetType};

use crate::{Directory, Entry, Result};

/// The effective grantee identities of one authenticated principal.
#[derive(Debug, Clone)]
pub struct GranteeSet {
    /// The principal's account entry.
    pub account: Entry,
    /// Ids of every group the principal transitively belongs to. When the
    /// set was expanded for admin rights, only admin-delegate groups are
    /// included -- a group that loses its admin flag keeps its grants on
    /// disk but they stop matching.
    pub groups: BTreeSet<EntryId>,
    /// Id of the principal's domain entry, if it exists in the directory.
    pub domain_id: Option<EntryId>,
    /// Whether this expansion is for admin rights.
    pub as_admin: bool,
}

impl GranteeSet {
    /// Expands a principal (by account id or name) into its grantee set.
    pub fn expand(directory: &Directory, principal: &str, as_admin: bool) -> Result<Self> {
        let account = directory.resolve(TargetType::Account, Some(principal))?;
        Self::expand_account(directory, account, as_admin)
    }

    /// Expands an already-resolved account entry.
    pub fn expand_account(directory: &Directory, account: Entry, as_admin: bool) -> Result<Self> {
        let groups = directory
            .groups_containing(&account.id, as_admin)?
            .into_iter()
            .map(|group| group.id)
            .collect::<BTreeSet<_>>();

        let domain_id = match &account.domain {
            Some(domain) => directory
                .resolve(TargetType::Domain, Some(domain))
                .ok()
                .map(|entry| entry.id),
            None => None,
        };

        debug!(
            principal = %account.name,
            groups = groups.len(),
            as_admin,
            "grantee set expanded"
        );

        Ok(Self {
            account,
            groups,
            domain_id,
            as_admin,
        })
    }

    /// Whether the principal may hold admin rights at all.
    ///
    /// Delegated and global admins qualify; anyone else has every admin
    /// grant ignored, even grants that already exist on disk.
    pub fn valid_for_admin_rights(&self) -> bool {
        self.account.is_admin_account || self.account.is_system_admin
    }

    /// The ids this principal can be granted to directly or through
    /// groups: its own id plus every (qualifying) group id.
    pub fn ids(&self) -> BTreeSet<EntryId> {
        let mut ids = self.groups.clone();
        ids.insert(self.account.id.clone());
        ids
    }

    /// Whether a stored grant's grantee matches this principal.
    ///
    /// `grantee_id` is the grant's stored grantee id (absent for
    /// pseudo-grantee types that match by who the principal is).
    pub fn matches(&self, grantee_type: GranteeType, grantee_id: Option<&EntryId>) -> bool {
        match grantee_type {
            GranteeType::User => grantee_id == Some(&self.account.id),
            // Guests and key holders are external identities; their grants
            // store the address they authenticated with.
            GranteeType::Guest | GranteeType::Key => {
                grantee_id.is_some_and(|id| id.as_str() == self.account.name)
            }
            GranteeType::Group => grantee_id.is_some_and(|id| self.groups.contains(id)),
            GranteeType::Domain => {
                grantee_id.is_some() && grantee_id == self.domain_id.as_ref()
            }
            GranteeType::Cos => grantee_id.is_some() && grantee_id == self.account.cos_id.as_ref(),
            GranteeType::AllAdmins => self.valid_for_admin_rights(),
            // The engine only ever sees authenticated principals; the
            // anonymous case never constructs a GranteeSet.
            GranteeType::AuthUser | GranteeType::Public => true,
        }
    }
}
