//! The access manager facade.
//!
//! [`AccessManager`] is the single entry point callers (CLI and SOAP
//! handlers) consume. One concrete strategy is constructed at process
//! startup from configuration and injected everywhere -- there is no
//! global instance. [`AclAccessManager`] is the full grant-based engine;
//! [`GlobalAdminAccessManager`] is the degenerate strategy that only
//! recognizes system admins and answers [`EngineError::NotSupported`] for
//! everything finer-grained.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;
use warden_catalog::{AttrDirection, RightCatalog};
use warden_config::Strategy;
use warden_directory::{
    A_ATTRIBUTE_CONSTRAINT, AttributeConstraint, AttributeRegistry, Directory, Entry, GranteeSet,
};
use warden_grants::{Grant, GrantStore};
use warden_types::{EntryId, GranteeType, RightModifier, TargetType};

use crate::effective::{AllEffectiveRights, EffectiveRights};
use crate::evaluator::{Decision, Evaluator};
use crate::{EngineError, Result};

/// Filter for [`AccessManager::get_grants`]. An empty query lists every
/// grant in the directory.
#[derive(Debug, Clone, Default)]
pub struct GrantQuery {
    pub target_type: Option<TargetType>,
    /// Target id or name; requires `target_type`.
    pub target: Option<String>,
    pub grantee_type: Option<GranteeType>,
    /// Grantee account id or name.
    pub grantee: Option<String>,
    /// Also report grants made to the admin groups the grantee belongs to.
    pub include_group_grants: bool,
}

/// One stored grant with the target entry it sits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantInfo {
    pub target_type: TargetType,
    pub target_id: EntryId,
    pub target_name: String,
    pub grantee_name: Option<String>,
    pub grant: Grant,
}

/// The facade consumed by callers.
///
/// Every operation a strategy does not implement answers
/// [`EngineError::NotSupported`]; the provided defaults make that the
/// baseline so strategies only override what they actually support.
pub trait AccessManager: Send + Sync {
    /// May `grantee` perform `right` on the target?
    ///
    /// A clean denial is `Ok(false)`; errors are reserved for resolution
    /// failures and the domain-status gate.
    fn can_do(
        &self,
        grantee: &str,
        target_type: TargetType,
        target: Option<&str>,
        right: &str,
        as_admin: bool,
    ) -> Result<bool> {
        self.can_do_via(grantee, target_type, target, right, as_admin)
            .map(|decision| decision.allowed)
    }

    /// Like [`can_do`](Self::can_do), also yielding the decisive grant.
    fn can_do_via(
        &self,
        _grantee: &str,
        _target_type: TargetType,
        _target: Option<&str>,
        _right: &str,
        _as_admin: bool,
    ) -> Result<Decision> {
        Err(EngineError::NotSupported("can_do"))
    }

    /// May `grantee` read all of `attrs` on the target?
    fn can_get_attrs(
        &self,
        _grantee: &str,
        _target_type: TargetType,
        _target: Option<&str>,
        _attrs: &BTreeSet<String>,
        _as_admin: bool,
    ) -> Result<bool> {
        Err(EngineError::NotSupported("can_get_attrs"))
    }

    /// May `grantee` write all of `attrs` on the target? No value check.
    fn can_set_attrs(
        &self,
        _grantee: &str,
        _target_type: TargetType,
        _target: Option<&str>,
        _attrs: &BTreeSet<String>,
        _as_admin: bool,
    ) -> Result<bool> {
        Err(EngineError::NotSupported("can_set_attrs"))
    }

    /// May `grantee` write these attribute values on the target? Values
    /// are checked against the attribute schema and any stored
    /// constraints; a failing value is a [`ConstraintViolation`] error,
    /// never a silent deny.
    ///
    /// [`ConstraintViolation`]: warden_directory::ConstraintViolation
    fn can_set_attr_values(
        &self,
        _grantee: &str,
        _target_type: TargetType,
        _target: Option<&str>,
        _values: &BTreeMap<String, String>,
        _as_admin: bool,
    ) -> Result<bool> {
        Err(EngineError::NotSupported("can_set_attr_values"))
    }

    /// Everything `grantee` holds on one target.
    fn get_effective_rights(
        &self,
        _target_type: TargetType,
        _target: Option<&str>,
        _grantee: &str,
        _expand_set_attrs: bool,
        _expand_get_attrs: bool,
    ) -> Result<EffectiveRights> {
        Err(EngineError::NotSupported("get_effective_rights"))
    }

    /// Effective rights on an entry about to be created, evaluated
    /// against a synthesized target in the given domain / class of
    /// service.
    fn get_create_object_attrs(
        &self,
        _target_type: TargetType,
        _domain: Option<&str>,
        _cos: Option<&str>,
        _grantee: &str,
    ) -> Result<EffectiveRights> {
        Err(EngineError::NotSupported("get_create_object_attrs"))
    }

    /// Everything `grantee` holds anywhere, grouped by target type.
    fn get_all_effective_rights(
        &self,
        _grantee: &str,
        _expand_set_attrs: bool,
        _expand_get_attrs: bool,
    ) -> Result<AllEffectiveRights> {
        Err(EngineError::NotSupported("get_all_effective_rights"))
    }

    /// Lists stored grants matching a query.
    fn get_grants(&self, _query: &GrantQuery) -> Result<Vec<GrantInfo>> {
        Err(EngineError::NotSupported("get_grants"))
    }

    /// Stores a grant on a target entry.
    ///
    /// With an authenticated grantor, delegation is bounded: the grantor
    /// must itself hold the right on the target. `authed` of `None` is
    /// reserved for provisioning paths acting as the system.
    fn grant_right(
        &self,
        _authed: Option<&str>,
        _target_type: TargetType,
        _target: Option<&str>,
        _grantee_type: GranteeType,
        _grantee: Option<&str>,
        _right: &str,
        _modifier: RightModifier,
    ) -> Result<()> {
        Err(EngineError::NotSupported("grant_right"))
    }

    /// Removes a previously stored grant. Grantee validity is not
    /// re-checked, so stale grants can always be cleaned up.
    fn revoke_right(
        &self,
        _authed: Option<&str>,
        _target_type: TargetType,
        _target: Option<&str>,
        _grantee_type: GranteeType,
        _grantee: Option<&str>,
        _right: &str,
        _modifier: RightModifier,
    ) -> Result<()> {
        Err(EngineError::NotSupported("revoke_right"))
    }

    /// Rebuilds the right catalog from the configured definitions
    /// directory, picking up extension rights. Idempotent.
    fn reload_rights(&self) -> Result<()> {
        Err(EngineError::NotSupported("reload_rights"))
    }
}

/// Builds the configured strategy.
pub fn build_access_manager(
    strategy: Strategy,
    directory: Arc<Directory>,
    catalog: RightCatalog,
    registry: AttributeRegistry,
    rights_dir: Option<PathBuf>,
) -> Arc<dyn AccessManager> {
    info!(?strategy, "constructing access manager");
    match strategy {
        Strategy::Acl => {
            let mut manager = AclAccessManager::new(directory, catalog, registry);
            if let Some(dir) = rights_dir {
                manager = manager.with_rights_dir(dir);
            }
            Arc::new(manager)
        }
        Strategy::GlobalAdminOnly => Arc::new(GlobalAdminAccessManager::new(directory)),
    }
}

// ============================================================================
// ACL strategy
// ============================================================================

/// The grant-based access manager.
pub struct AclAccessManager {
    directory: Arc<Directory>,
    /// Swapped wholesale on reload; in-flight calls keep their snapshot.
    catalog: RwLock<Arc<RightCatalog>>,
    registry: Arc<AttributeRegistry>,
    store: GrantStore,
    rights_dir: Option<PathBuf>,
}

impl AclAccessManager {
    pub fn new(
        directory: Arc<Directory>,
        catalog: RightCatalog,
        registry: AttributeRegistry,
    ) -> Self {
        Self {
            store: GrantStore::new(Arc::clone(&directory)),
            directory,
            catalog: RwLock::new(Arc::new(catalog)),
            registry: Arc::new(registry),
            rights_dir: None,
        }
    }

    /// Configures the definitions directory [`reload_rights`] reads.
    ///
    /// [`reload_rights`]: AccessManager::reload_rights
    pub fn with_rights_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.rights_dir = Some(dir.into());
        self
    }

    fn catalog(&self) -> Result<Arc<RightCatalog>> {
        self.catalog
            .read()
            .map(|catalog| Arc::clone(&catalog))
            .map_err(|_| EngineError::Internal("catalog lock poisoned"))
    }

    fn grantees(&self, grantee: &str, as_admin: bool) -> Result<GranteeSet> {
        Ok(GranteeSet::expand(&self.directory, grantee, as_admin)?)
    }

    fn resolve_target(&self, target_type: TargetType, target: Option<&str>) -> Result<Entry> {
        Ok(self.directory.resolve(target_type, target)?)
    }

    /// Shared flow of the three attribute checks.
    fn check_attrs(
        &self,
        grantee: &str,
        target_type: TargetType,
        target: Option<&str>,
        attrs: &BTreeSet<String>,
        as_admin: bool,
        direction: AttrDirection,
    ) -> Result<bool> {
        let grantees = self.grantees(grantee, as_admin)?;
        let target = self.resolve_target(target_type, target)?;
        let catalog = self.catalog()?;
        let evaluator = Evaluator::new(&self.directory, &catalog, &self.registry);

        if grantees.account.is_system_admin && as_admin {
            return Ok(true);
        }
        evaluator.gate_domain_status(&target)?;

        let allowed = evaluator.allowed_attrs(&grantees, &target, direction)?;
        Ok(allowed.covers_all(attrs.iter().map(String::as_str)))
    }

    /// Whether the grantee may bypass stored constraints: being able to
    /// set the constraint attribute on the constraint entry means the
    /// constraints are theirs to change.
    fn can_override_constraints(
        &self,
        evaluator: &Evaluator<'_>,
        grantees: &GranteeSet,
        constraint_entry: &Entry,
    ) -> Result<bool> {
        let allowed = evaluator.allowed_attrs(grantees, constraint_entry, AttrDirection::Set)?;
        Ok(allowed.covers(A_ATTRIBUTE_CONSTRAINT))
    }

    fn resolve_grantee_entry(
        &self,
        grantee_type: GranteeType,
        grantee: Option<&str>,
    ) -> Result<Option<Entry>> {
        let lookup_type = match grantee_type {
            GranteeType::User => TargetType::Account,
            GranteeType::Group => TargetType::DistributionList,
            GranteeType::Domain => TargetType::Domain,
            GranteeType::Cos => TargetType::Cos,
            _ => return Ok(None),
        };
        let key = grantee.ok_or_else(|| {
            EngineError::InvalidRequest(format!(
                "grantee type {grantee_type} requires a grantee identity"
            ))
        })?;
        Ok(Some(self.directory.resolve(lookup_type, Some(key))?))
    }
}

impl AccessManager for AclAccessManager {
    fn can_do_via(
        &self,
        grantee: &str,
        target_type: TargetType,
        target: Option<&str>,
        right: &str,
        as_admin: bool,
    ) -> Result<Decision> {
        let grantees = self.grantees(grantee, as_admin)?;
        let target = self.resolve_target(target_type, target)?;
        let catalog = self.catalog()?;
        let right = catalog.lookup(right)?;
        let evaluator = Evaluator::new(&self.directory, &catalog, &self.registry);

        // System admins hold every right; nothing is evaluated, so there
        // is no via-grant to report.
        if grantees.account.is_system_admin && as_admin {
            return Ok(Decision {
                allowed: true,
                via: None,
            });
        }

        evaluator.decide(&grantees, &target, &right)
    }

    fn can_get_attrs(
        &self,
        grantee: &str,
        target_type: TargetType,
        target: Option<&str>,
        attrs: &BTreeSet<String>,
        as_admin: bool,
    ) -> Result<bool> {
        self.check_attrs(grantee, target_type, target, attrs, as_admin, AttrDirection::Get)
    }

    fn can_set_attrs(
        &self,
        grantee: &str,
        target_type: TargetType,
        target: Option<&str>,
        attrs: &BTreeSet<String>,
        as_admin: bool,
    ) -> Result<bool> {
        self.check_attrs(grantee, target_type, target, attrs, as_admin, AttrDirection::Set)
    }

    fn can_set_attr_values(
        &self,
        grantee: &str,
        target_type: TargetType,
        target: Option<&str>,
        values: &BTreeMap<String, String>,
        as_admin: bool,
    ) -> Result<bool> {
        let attrs: BTreeSet<String> = values.keys().cloned().collect();
        if !self.check_attrs(
            grantee,
            target_type,
            target,
            &attrs,
            as_admin,
            AttrDirection::Set,
        )? {
            return Ok(false);
        }

        let target = self.resolve_target(target_type, target)?;
        for (attr, value) in values {
            self.registry.validate(target.kind, attr, value)?;
        }

        // Deployment constraints bind unless the grantee controls them.
        if let Some(constraint_entry) = self.directory.constraint_entry(&target)? {
            let constraints = AttributeConstraint::parse_entry(&constraint_entry);
            if !constraints.is_empty() {
                let grantees = self.grantees(grantee, as_admin)?;
                let catalog = self.catalog()?;
                let evaluator = Evaluator::new(&self.directory, &catalog, &self.registry);
                let overridable = (grantees.account.is_system_admin && as_admin)
                    || self.can_override_constraints(&evaluator, &grantees, &constraint_entry)?;
                if !overridable {
                    for (attr, value) in values {
                        if let Some(constraint) = constraints.get(attr) {
                            constraint.check(attr, value)?;
                        }
                    }
                }
            }
        }

        Ok(true)
    }

    fn get_effective_rights(
        &self,
        target_type: TargetType,
        target: Option<&str>,
        grantee: &str,
        expand_set_attrs: bool,
        expand_get_attrs: bool,
    ) -> Result<EffectiveRights> {
        let grantees = self.grantees(grantee, true)?;
        let target = self.resolve_target(target_type, target)?;
        let catalog = self.catalog()?;
        let evaluator = Evaluator::new(&self.directory, &catalog, &self.registry);
        evaluator.effective_rights(&grantees, &target, expand_set_attrs, expand_get_attrs)
    }

    fn get_create_object_attrs(
        &self,
        target_type: TargetType,
        domain: Option<&str>,
        cos: Option<&str>,
        grantee: &str,
    ) -> Result<EffectiveRights> {
        let grantees = self.grantees(grantee, true)?;
        let probe = self.directory.pseudo_entry(target_type, domain, cos)?;
        let catalog = self.catalog()?;
        let evaluator = Evaluator::new(&self.directory, &catalog, &self.registry);
        evaluator.effective_rights(&grantees, &probe, true, true)
    }

    fn get_all_effective_rights(
        &self,
        grantee: &str,
        expand_set_attrs: bool,
        expand_get_attrs: bool,
    ) -> Result<AllEffectiveRights> {
        let grantees = self.grantees(grantee, true)?;
        let catalog = self.catalog()?;
        let evaluator = Evaluator::new(&self.directory, &catalog, &self.registry);
        evaluator.all_effective_rights(&grantees, expand_set_attrs, expand_get_attrs)
    }

    fn get_grants(&self, query: &GrantQuery) -> Result<Vec<GrantInfo>> {
        let targets = match (&query.target_type, &query.target) {
            (Some(target_type), Some(target)) => {
                vec![self.resolve_target(*target_type, Some(target.as_str()))?]
            }
            (Some(target_type), None) => self
                .directory
                .entries_with_grants()?
                .into_iter()
                .filter(|entry| entry.kind == *target_type)
                .collect(),
            (None, Some(_)) => {
                return Err(EngineError::InvalidRequest(
                    "a target filter requires a target type".to_string(),
                ));
            }
            (None, None) => self.directory.entries_with_grants()?,
        };

        // The grantee filter matches the grantee itself and, on request,
        // the admin groups it belongs to.
        let grantee_ids: Option<BTreeSet<EntryId>> = match &query.grantee {
            Some(key) => {
                let account = self.directory.resolve(TargetType::Account, Some(key))?;
                let mut ids = BTreeSet::new();
                if query.include_group_grants {
                    for group in self.directory.groups_containing(&account.id, true)? {
                        ids.insert(group.id);
                    }
                }
                ids.insert(account.id);
                Some(ids)
            }
            None => None,
        };

        let mut infos = Vec::new();
        for target in targets {
            for grant in GrantStore::grants_on(&target) {
                if query
                    .grantee_type
                    .is_some_and(|gt| gt != grant.grantee_type)
                {
                    continue;
                }
                if let Some(ids) = &grantee_ids {
                    match &grant.grantee_id {
                        Some(id) if ids.contains(id) => {}
                        _ => continue,
                    }
                }
                let grantee_name = match &grant.grantee_id {
                    Some(id) => self.directory.get(id)?.map(|entry| entry.name),
                    None => None,
                };
                infos.push(GrantInfo {
                    target_type: target.kind,
                    target_id: target.id.clone(),
                    target_name: target.name.clone(),
                    grantee_name,
                    grant,
                });
            }
        }
        Ok(infos)
    }

    fn grant_right(
        &self,
        authed: Option<&str>,
        target_type: TargetType,
        target: Option<&str>,
        grantee_type: GranteeType,
        grantee: Option<&str>,
        right: &str,
        modifier: RightModifier,
    ) -> Result<()> {
        let target = self.resolve_target(target_type, target)?;
        let catalog = self.catalog()?;
        let right = catalog.lookup(right)?;

        if !right.grantable_on(target.kind) {
            return Err(EngineError::InvalidRequest(format!(
                "right {} cannot be granted on a {} entry; grantable on: {}",
                right.name,
                target.kind,
                right.report_grantable_types()
            )));
        }
        if modifier == RightModifier::SubDomain && target.kind != TargetType::Domain {
            return Err(EngineError::InvalidRequest(
                "sub-domain grants are only meaningful on domain targets".to_string(),
            ));
        }

        let grantee_entry = self.resolve_grantee_entry(grantee_type, grantee)?;
        if !right.user_right {
            if !grantee_type.allowed_for_admin_rights() {
                return Err(EngineError::InvalidRequest(format!(
                    "grantee type {grantee_type} cannot hold admin rights"
                )));
            }
            let vetted = match (&grantee_entry, grantee_type) {
                (Some(entry), GranteeType::User) => entry.is_admin_account,
                (Some(entry), GranteeType::Group) => entry.is_admin_group,
                _ => true,
            };
            if !vetted {
                return Err(EngineError::InvalidRequest(
                    "grantee must be a delegated admin account or admin group".to_string(),
                ));
            }
        }

        // Delegation cannot mint rights the grantor does not hold.
        if let Some(authed) = authed {
            let grantor = self.grantees(authed, true)?;
            if !grantor.account.is_system_admin {
                let evaluator = Evaluator::new(&self.directory, &catalog, &self.registry);
                if !evaluator.holds_for_delegation(&grantor, &target, &right)? {
                    return Err(EngineError::PermDeniedGrant {
                        grantor: grantor.account.name,
                        right: right.name.clone(),
                    });
                }
            }
        }

        let grantee_id = match grantee_type {
            t if t.needs_grantee_identity() => Some(
                grantee_entry
                    .as_ref()
                    .map(|entry| entry.id.clone())
                    .or_else(|| grantee.map(EntryId::from))
                    .ok_or_else(|| {
                        EngineError::InvalidRequest(format!(
                            "grantee type {grantee_type} requires a grantee identity"
                        ))
                    })?,
            ),
            _ => None,
        };

        let new_grant = Grant {
            grantee_type,
            grantee_id,
            secret: None,
            right: right.name.clone(),
            modifier,
            attrs: None,
        };

        let mut grants = GrantStore::grants_on(&target);
        // A new grant replaces any existing grant to the same grantee for
        // the same right, whatever its polarity.
        grants.retain(|existing| {
            !(existing.grantee_type == new_grant.grantee_type
                && existing.grantee_id == new_grant.grantee_id
                && existing.right == new_grant.right)
        });
        grants.push(new_grant);
        self.store.write(&target, &grants)?;

        info!(
            target = %target.name,
            grantee_type = %grantee_type,
            right = %right.name,
            ?modifier,
            "right granted"
        );
        Ok(())
    }

    fn revoke_right(
        &self,
        _authed: Option<&str>,
        target_type: TargetType,
        target: Option<&str>,
        grantee_type: GranteeType,
        grantee: Option<&str>,
        right: &str,
        modifier: RightModifier,
    ) -> Result<()> {
        let target = self.resolve_target(target_type, target)?;
        let catalog = self.catalog()?;
        let right = catalog.lookup(right)?;

        // Resolve the grantee id leniently: the entry may be gone, in
        // which case the raw key is matched against stored ids.
        let grantee_id = if grantee_type.needs_grantee_identity() {
            let key = grantee.ok_or_else(|| {
                EngineError::InvalidRequest(format!(
                    "grantee type {grantee_type} requires a grantee identity"
                ))
            })?;
            let resolved = self
                .resolve_grantee_entry(grantee_type, Some(key))
                .ok()
                .flatten()
                .map(|entry| entry.id);
            Some(resolved.unwrap_or_else(|| EntryId::from(key)))
        } else {
            None
        };

        let probe = Grant {
            grantee_type,
            grantee_id,
            secret: None,
            right: right.name.clone(),
            modifier,
            attrs: None,
        };

        let mut grants = GrantStore::grants_on(&target);
        let before = grants.len();
        grants.retain(|existing| !existing.same_ace(&probe));
        if grants.len() == before {
            return Ok(());
        }
        self.store.write(&target, &grants)?;

        info!(
            target = %target.name,
            grantee_type = %grantee_type,
            right = %right.name,
            "right revoked"
        );
        Ok(())
    }

    fn reload_rights(&self) -> Result<()> {
        let Some(dir) = &self.rights_dir else {
            return Err(EngineError::NotSupported("reload_rights"));
        };
        let fresh = RightCatalog::load_dir(dir)?;
        let mut slot = self
            .catalog
            .write()
            .map_err(|_| EngineError::Internal("catalog lock poisoned"))?;
        *slot = Arc::new(fresh);
        info!(dir = %dir.display(), "right catalog reloaded");
        Ok(())
    }
}

// ============================================================================
// Global-admin-only strategy
// ============================================================================

/// Degenerate strategy for deployments without delegated administration:
/// system admins may do everything, everyone else nothing. Grant state is
/// never consulted, and attribute-level queries are not supported.
pub struct GlobalAdminAccessManager {
    directory: Arc<Directory>,
}

impl GlobalAdminAccessManager {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self { directory }
    }
}

impl AccessManager for GlobalAdminAccessManager {
    fn can_do_via(
        &self,
        grantee: &str,
        target_type: TargetType,
        target: Option<&str>,
        _right: &str,
        as_admin: bool,
    ) -> Result<Decision> {
        // Resolution errors still surface; only the decision logic is
        // simplified.
        self.directory.resolve(target_type, target)?;
        let grantees = GranteeSet::expand(&self.directory, grantee, as_admin)?;
        Ok(Decision {
            allowed: as_admin && grantees.account.is_system_admin,
            via: None,
        })
    }
}
