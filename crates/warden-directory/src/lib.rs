//! # warden-directory: Directory snapshot and target model
//!
//! Warden evaluates rights against a directory of administrable entries.
//! This crate models that directory at its interface boundary: entries with
//! their typed fields and free-form attributes, name/id resolution, the
//! ancestor chains grants inherit along, grantee expansion, and the
//! attribute schema registry used for value validation.
//!
//! The real directory lives behind LDAP; [`Directory`] here is the
//! in-process snapshot of it. Reads are cheap clones of individual entries,
//! so evaluation works on an isolated view. The only mutation the rights
//! engine ever performs -- rewriting an entry's stored grant list -- goes
//! through [`Directory::update_aces`], which uses optimistic
//! compare-and-swap on the entry's version so concurrent writers cannot
//! silently clobber each other.
//!
//! # Ancestor chains
//!
//! Grants on an entry apply to the entry itself; grants on the scopes it
//! inherits from apply too, at decreasing specificity:
//!
//! ```text
//! account → [groups it belongs to] → domain → parent domains* → global config
//! domain  → parent domains* → global config
//! server  → global config
//! ```
//!
//! All groups an entry belongs to form a single chain level (they are
//! peers, not nested scopes). Parent-domain levels (`*`) only honor grants
//! carrying the sub-domain modifier; [`ChainLevel::sub_domain_only`] marks
//! them.
//!
//! Attribute *defaults* inherit along a different, shorter chain --
//! account → class-of-service → global config -- exposed as
//! [`Directory::attr_defaults`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_types::{DomainStatus, EntryId, TargetType};

pub mod grantee;
pub mod schema;

pub use grantee::GranteeSet;
pub use schema::{AttrKind, AttributeConstraint, AttributeRegistry, ConstraintViolation};

/// The id assigned to synthesized (not yet created) entries.
pub const PSEUDO_ENTRY_ID: &str = "00000000-0000-0000-0000-000000000000";

/// The multi-valued entry attribute holding per-attribute constraints.
pub const A_ATTRIBUTE_CONSTRAINT: &str = "attributeConstraint";

/// Errors raised by directory lookups and updates.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The target id/name does not resolve to an entry of the wanted type.
    #[error("no such {target_type} target: {key}")]
    NoSuchTarget { target_type: TargetType, key: String },

    /// A target type that requires an identity was queried without one.
    #[error("target type {0} requires a target identity")]
    MissingTargetIdentity(TargetType),

    /// An entry with the same id or (type, name) already exists.
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// An id-based lookup found nothing.
    #[error("no entry with id {0}")]
    NoSuchEntry(EntryId),

    /// An optimistic ACE update lost the race to a concurrent writer.
    #[error("stale write on {id}: expected version {expected}, entry is at {actual}")]
    VersionConflict {
        id: EntryId,
        expected: u64,
        actual: u64,
    },

    /// A pseudo-target needs a domain but none was supplied or found.
    #[error("target type {0} requires a domain for creation-time checks")]
    MissingDomain(TargetType),

    /// The directory lock was poisoned by a panicking writer.
    #[error("directory lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

// ============================================================================
// Entries
// ============================================================================

/// One directory entry.
///
/// Typed fields cover what the rights engine consults directly; everything
/// else an entry carries lives in the free-form multi-valued `attrs` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    /// Primary name: address for accounts/lists, DNS name for domains,
    /// hostname for servers.
    pub name: String,
    pub kind: TargetType,
    /// Name of the containing domain, for domained entry types.
    pub domain: Option<String>,
    /// Class of service, for accounts and calendar resources.
    pub cos_id: Option<EntryId>,
    /// Operational status; meaningful for domains.
    pub status: DomainStatus,
    /// Delegated-admin flag on an account.
    pub is_admin_account: bool,
    /// Super-admin flag on an account. System admins hold every right and
    /// never receive grants.
    pub is_system_admin: bool,
    /// Marks a distribution list as an admin-delegate group. Grants of
    /// admin rights to a non-admin group are stored but inert.
    pub is_admin_group: bool,
    /// Direct group memberships (distribution lists), by id.
    pub member_of: Vec<EntryId>,
    /// Accounts this account is the designated parent of.
    pub child_accounts: Vec<EntryId>,
    /// Free-form multi-valued attributes.
    pub attrs: BTreeMap<String, Vec<String>>,
    /// Stored access-control entries, one encoded grant per value.
    pub aces: Vec<String>,
    /// Bumped on every ACE write; the optimistic concurrency token.
    pub version: u64,
}

impl Entry {
    /// Creates a minimal entry of the given type.
    pub fn new(kind: TargetType, id: impl Into<EntryId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            domain: None,
            cos_id: None,
            status: DomainStatus::Active,
            is_admin_account: false,
            is_system_admin: false,
            is_admin_group: false,
            member_of: Vec::new(),
            child_accounts: Vec::new(),
            attrs: BTreeMap::new(),
            aces: Vec::new(),
            version: 0,
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_cos(mut self, cos_id: impl Into<EntryId>) -> Self {
        self.cos_id = Some(cos_id.into());
        self
    }

    pub fn with_status(mut self, status: DomainStatus) -> Self {
        self.status = status;
        self
    }

    pub fn admin_account(mut self) -> Self {
        self.is_admin_account = true;
        self
    }

    pub fn system_admin(mut self) -> Self {
        self.is_admin_account = true;
        self.is_system_admin = true;
        self
    }

    pub fn admin_group(mut self) -> Self {
        self.is_admin_group = true;
        self
    }

    pub fn member_of(mut self, group: impl Into<EntryId>) -> Self {
        self.member_of.push(group.into());
        self
    }

    pub fn with_child(mut self, child: impl Into<EntryId>) -> Self {
        self.child_accounts.push(child.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, values: &[&str]) -> Self {
        self.attrs
            .insert(name.into(), values.iter().map(ToString::to_string).collect());
        self
    }

    /// First value of an attribute, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// All values of an attribute.
    pub fn attr_values(&self, name: &str) -> &[String] {
        self.attrs.get(name).map_or(&[], Vec::as_slice)
    }

    /// Whether this is a synthesized creation-time entry.
    pub fn is_pseudo(&self) -> bool {
        self.id.as_str() == PSEUDO_ENTRY_ID
    }
}

/// One level of an ancestor chain.
///
/// A level may hold several entries (all groups a target belongs to are
/// one level); grants on them are weighed as if granted on a single scope.
#[derive(Debug, Clone)]
pub struct ChainLevel {
    pub entries: Vec<Entry>,
    /// Parent-domain levels only honor grants with the sub-domain
    /// modifier.
    pub sub_domain_only: bool,
}

impl ChainLevel {
    fn of(entry: Entry) -> Self {
        Self {
            entries: vec![entry],
            sub_domain_only: false,
        }
    }
}

// ============================================================================
// Directory
// ============================================================================

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<EntryId, Entry>,
    /// Name index per target type.
    names: HashMap<(TargetType, String), EntryId>,
}

/// In-memory snapshot of the directory.
///
/// # Thread Safety
///
/// All reads return owned clones taken under a read lock; evaluation never
/// holds the lock across its own logic. Writes go through
/// [`update_aces`](Self::update_aces) with compare-and-swap semantics.
#[derive(Debug, Default)]
pub struct Directory {
    inner: RwLock<Inner>,
}

impl Directory {
    /// Creates a directory containing only the global config root.
    pub fn new() -> Self {
        let directory = Self::default();
        let global = Entry::new(TargetType::GlobalConfig, "globalconfig", "globalconfig");
        directory
            .insert(global)
            .expect("empty directory cannot collide");
        directory
    }

    /// Adds an entry. Ids and (type, name) pairs must be unique.
    pub fn insert(&self, entry: Entry) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| DirectoryError::LockPoisoned)?;
        if inner.entries.contains_key(&entry.id) {
            return Err(DirectoryError::DuplicateEntry(entry.id.to_string()));
        }
        let name_key = (entry.kind, entry.name.clone());
        if inner.names.contains_key(&name_key) {
            return Err(DirectoryError::DuplicateEntry(entry.name.clone()));
        }
        inner.names.insert(name_key, entry.id.clone());
        inner.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    /// Resolves a target reference to an entry.
    ///
    /// `key` may be an entry id or a name and is required exactly when the
    /// target type [needs an identity](TargetType::needs_target_identity);
    /// the global config resolves without one.
    pub fn resolve(&self, target_type: TargetType, key: Option<&str>) -> Result<Entry> {
        let inner = self.inner.read().map_err(|_| DirectoryError::LockPoisoned)?;

        if !target_type.needs_target_identity() {
            return inner
                .names
                .get(&(TargetType::GlobalConfig, "globalconfig".to_string()))
                .and_then(|id| inner.entries.get(id))
                .cloned()
                .ok_or(DirectoryError::NoSuchTarget {
                    target_type,
                    key: "globalconfig".to_string(),
                });
        }

        let key = key.ok_or(DirectoryError::MissingTargetIdentity(target_type))?;
        inner
            .entries
            .get(&EntryId::from(key))
            .filter(|entry| entry.kind == target_type)
            .or_else(|| {
                inner
                    .names
                    .get(&(target_type, key.to_string()))
                    .and_then(|id| inner.entries.get(id))
            })
            .cloned()
            .ok_or_else(|| DirectoryError::NoSuchTarget {
                target_type,
                key: key.to_string(),
            })
    }

    /// Fetches an entry by id.
    pub fn get(&self, id: &EntryId) -> Result<Option<Entry>> {
        let inner = self.inner.read().map_err(|_| DirectoryError::LockPoisoned)?;
        Ok(inner.entries.get(id).cloned())
    }

    /// The domain entry containing `entry`, if any.
    ///
    /// For a domain entry this is the entry itself.
    pub fn domain_of(&self, entry: &Entry) -> Result<Option<Entry>> {
        if entry.kind == TargetType::Domain {
            return Ok(Some(entry.clone()));
        }
        match &entry.domain {
            Some(domain) => Ok(self.resolve(TargetType::Domain, Some(domain)).ok()),
            None => Ok(None),
        }
    }

    /// The grant-inheritance ancestor chain for an entry, most specific
    /// first. The entry itself is level zero.
    pub fn ancestor_chain(&self, entry: &Entry) -> Result<Vec<ChainLevel>> {
        let mut chain = vec![ChainLevel::of(entry.clone())];

        // All groups the target transitively belongs to form one level.
        if entry.kind.is_domained() {
            let groups = self.groups_containing(&entry.id, false)?;
            if !groups.is_empty() {
                chain.push(ChainLevel {
                    entries: groups,
                    sub_domain_only: false,
                });
            }
        }

        // The containing domain, then its parents for sub-domain grants.
        let domain = match entry.kind {
            TargetType::Domain => Some(entry.clone()),
            _ => self.domain_of(entry)?,
        };
        if let Some(domain) = domain {
            if entry.kind != TargetType::Domain {
                chain.push(ChainLevel::of(domain.clone()));
            }
            for parent in self.parent_domains(&domain.name)? {
                chain.push(ChainLevel {
                    entries: vec![parent],
                    sub_domain_only: true,
                });
            }
        }

        if entry.kind != TargetType::GlobalConfig {
            chain.push(ChainLevel::of(self.resolve(TargetType::GlobalConfig, None)?));
        }

        debug!(
            target = %entry.name,
            levels = chain.len(),
            "ancestor chain computed"
        );
        Ok(chain)
    }

    /// Existing domain entries above `domain` in the DNS hierarchy,
    /// nearest first. Only domains actually present in the directory
    /// appear.
    fn parent_domains(&self, domain: &str) -> Result<Vec<Entry>> {
        let mut parents = Vec::new();
        let mut rest = domain;
        while let Some((_, parent)) = rest.split_once('.') {
            if let Ok(entry) = self.resolve(TargetType::Domain, Some(parent)) {
                parents.push(entry);
            }
            rest = parent;
        }
        Ok(parents)
    }

    /// All distribution lists the entry transitively belongs to.
    ///
    /// Membership cycles are broken by visiting each group at most once.
    /// With `admin_only`, only admin-delegate groups qualify (and only
    /// they are descended through).
    pub fn groups_containing(&self, id: &EntryId, admin_only: bool) -> Result<Vec<Entry>> {
        let inner = self.inner.read().map_err(|_| DirectoryError::LockPoisoned)?;

        let mut found = Vec::new();
        let mut visited = BTreeSet::new();
        let mut frontier: Vec<EntryId> = inner
            .entries
            .get(id)
            .map(|entry| entry.member_of.clone())
            .unwrap_or_default();

        while let Some(group_id) = frontier.pop() {
            if !visited.insert(group_id.clone()) {
                continue;
            }
            let Some(group) = inner.entries.get(&group_id) else {
                continue;
            };
            if group.kind != TargetType::DistributionList {
                continue;
            }
            if admin_only && !group.is_admin_group {
                continue;
            }
            frontier.extend(group.member_of.iter().cloned());
            found.push(group.clone());
        }

        // Deterministic order regardless of traversal.
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    /// Whether `parent` lists `child` in its child-account set.
    ///
    /// This is the narrow parental relation used for access to shared
    /// personal data (calendar privacy); it is not grant-based.
    pub fn is_parent_of(&self, parent: &EntryId, child: &EntryId) -> Result<bool> {
        Ok(self
            .get(parent)?
            .is_some_and(|entry| entry.child_accounts.contains(child)))
    }

    /// The effective domain status gating access to this entry.
    pub fn gating_status(&self, entry: &Entry) -> Result<DomainStatus> {
        Ok(self.domain_of(entry)?.map_or(DomainStatus::Active, |d| d.status))
    }

    // ------------------------------------------------------------------
    // Attribute defaults
    // ------------------------------------------------------------------

    /// Default values an entry inherits for unset attributes.
    ///
    /// Accounts and calendar resources inherit from their class of
    /// service, then the global config; other types inherit from the
    /// global config directly. Values set on the entry itself are not
    /// defaults and are excluded.
    pub fn attr_defaults(&self, entry: &Entry) -> Result<BTreeMap<String, Vec<String>>> {
        let mut defaults = BTreeMap::new();
        for source in self.defaults_chain(entry)? {
            for (name, values) in &source.attrs {
                defaults
                    .entry(name.clone())
                    .or_insert_with(|| values.clone());
            }
        }
        Ok(defaults)
    }

    fn defaults_chain(&self, entry: &Entry) -> Result<Vec<Entry>> {
        let mut chain = Vec::new();
        if matches!(entry.kind, TargetType::Account | TargetType::CalResource) {
            if let Some(cos_id) = &entry.cos_id {
                if let Some(cos) = self.get(cos_id)? {
                    chain.push(cos);
                }
            }
        }
        if entry.kind != TargetType::GlobalConfig {
            chain.push(self.resolve(TargetType::GlobalConfig, None)?);
        }
        Ok(chain)
    }

    /// The entry whose stored constraints govern attribute writes on
    /// `entry`: the class of service for accounts and calendar resources,
    /// the global config for everything else.
    pub fn constraint_entry(&self, entry: &Entry) -> Result<Option<Entry>> {
        if matches!(entry.kind, TargetType::Account | TargetType::CalResource) {
            if let Some(cos_id) = &entry.cos_id {
                return self.get(cos_id);
            }
        }
        if entry.kind == TargetType::GlobalConfig {
            return Ok(None);
        }
        Ok(Some(self.resolve(TargetType::GlobalConfig, None)?))
    }

    // ------------------------------------------------------------------
    // Pseudo targets
    // ------------------------------------------------------------------

    /// Synthesizes an unsaved entry so effective rights can be computed
    /// for an entry about to be created.
    ///
    /// Domained types need the future domain; accounts may name a class
    /// of service, falling back to the domain's default.
    pub fn pseudo_entry(
        &self,
        target_type: TargetType,
        domain: Option<&str>,
        cos: Option<&str>,
    ) -> Result<Entry> {
        let mut entry = Entry::new(target_type, PSEUDO_ENTRY_ID, pseudo_name(target_type));

        if target_type.is_domained() {
            let domain_name = domain.ok_or(DirectoryError::MissingDomain(target_type))?;
            let domain = self.resolve(TargetType::Domain, Some(domain_name))?;
            entry.name = format!("pseudo@{}", domain.name);
            entry.domain = Some(domain.name.clone());

            if matches!(target_type, TargetType::Account | TargetType::CalResource) {
                let cos_key = cos
                    .map(ToString::to_string)
                    .or_else(|| domain.attr("defaultCosId").map(ToString::to_string));
                if let Some(cos_key) = cos_key {
                    entry.cos_id = Some(self.resolve(TargetType::Cos, Some(&cos_key))?.id);
                }
            }
        }

        Ok(entry)
    }

    // ------------------------------------------------------------------
    // ACE updates
    // ------------------------------------------------------------------

    /// Replaces an entry's stored grant list.
    ///
    /// `expected_version` must match the entry's current version; on
    /// mismatch the write fails with [`DirectoryError::VersionConflict`]
    /// and the caller re-reads and retries. The version bumps on success.
    pub fn update_aces(
        &self,
        id: &EntryId,
        expected_version: u64,
        aces: Vec<String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| DirectoryError::LockPoisoned)?;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NoSuchEntry(id.clone()))?;
        if entry.version != expected_version {
            return Err(DirectoryError::VersionConflict {
                id: id.clone(),
                expected: expected_version,
                actual: entry.version,
            });
        }
        entry.aces = aces;
        entry.version += 1;
        Ok(())
    }

    /// Every entry that carries at least one stored grant.
    pub fn entries_with_grants(&self) -> Result<Vec<Entry>> {
        let inner = self.inner.read().map_err(|_| DirectoryError::LockPoisoned)?;
        let mut entries: Vec<Entry> = inner
            .entries
            .values()
            .filter(|entry| !entry.aces.is_empty())
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }
}

fn pseudo_name(target_type: TargetType) -> &'static str {
    match target_type {
        TargetType::Domain => "pseudo.pseudo",
        TargetType::Server => "pseudo.server",
        _ => "pseudo",
    }
}

#[cfg(test)]
mod tests;
