//! The rights evaluator.
//!
//! Given an expanded grantee set, a target with its ancestor chain, and a
//! requested right, the evaluator walks the chain most-specific-first and
//! lets the first level with a matching grant decide. Within one level,
//! grantee classes are consulted most-specific-first (individual, then
//! group, then domain/cos membership, then the authenticated catch-alls,
//! then public), and within one class a deny beats an allow.
//!
//! Attribute rights do not short-circuit the same way: named-attribute
//! grants are collected across the whole chain with a *relativity* (their
//! distance from the target), and the net allowed set is computed at the
//! end -- an attribute denied at least as close as it was allowed stays
//! denied. Only an all-attrs grant ends collection early, at its level.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_catalog::{AttrDirection, AttrScope, Right, RightCatalog};
use warden_directory::{AttributeRegistry, ChainLevel, Directory, Entry, GranteeSet};
use warden_grants::{Grant, GrantStore};
use warden_types::{GranteeClass, GranteeType, TargetType};

use crate::{EngineError, Result};

/// The grant that decided an evaluation, for audit trails and delegated
/// admin UIs. Absent when the default deny applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViaGrant {
    /// Type of the entry the decisive grant sits on.
    pub target_type: TargetType,
    /// Name of the entry the decisive grant sits on -- not necessarily the
    /// evaluated target; inherited grants sit on an ancestor.
    pub target_name: String,
    pub grantee_type: GranteeType,
    /// Display name of the grantee (falls back to the stored id when the
    /// grantee entry no longer resolves).
    pub grantee_name: String,
    pub right: String,
    pub is_negative: bool,
}

/// Outcome of a rights check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// The decisive grant. `None` on a default deny.
    pub via: Option<ViaGrant>,
}

impl Decision {
    pub(crate) fn default_deny() -> Self {
        Self {
            allowed: false,
            via: None,
        }
    }
}

/// Net attribute coverage of a grantee on a target, in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedAttrs {
    /// Every attribute of the target's class.
    AllowAll,
    /// No attribute at all.
    DenyAll,
    /// Exactly these attributes.
    AllowSome(BTreeSet<String>),
}

impl AllowedAttrs {
    /// Whether every requested attribute is covered.
    pub fn covers_all<'a>(&self, attrs: impl IntoIterator<Item = &'a str>) -> bool {
        match self {
            AllowedAttrs::AllowAll => true,
            AllowedAttrs::DenyAll => false,
            AllowedAttrs::AllowSome(allowed) => {
                attrs.into_iter().all(|attr| allowed.contains(attr))
            }
        }
    }

    pub fn covers(&self, attr: &str) -> bool {
        self.covers_all([attr])
    }
}

/// One grant together with the entry it was found on.
struct Candidate<'a> {
    grant: Grant,
    grantor: &'a Entry,
}

/// The core decision algorithm. Borrows the shared read-only state for the
/// duration of one evaluation; safe to run concurrently.
pub struct Evaluator<'a> {
    pub directory: &'a Directory,
    pub catalog: &'a RightCatalog,
    pub registry: &'a AttributeRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        directory: &'a Directory,
        catalog: &'a RightCatalog,
        registry: &'a AttributeRegistry,
    ) -> Self {
        Self {
            directory,
            catalog,
            registry,
        }
    }

    /// Decides a right (preset, attr, or combo) for a grantee on a target.
    ///
    /// The requested right is expanded to its leaf rights; the overall
    /// result is ALLOW only if every leaf is allowed. `via` reports the
    /// first denying leaf's decisive grant, or one decisive allow when
    /// everything succeeded.
    pub fn decide(&self, grantees: &GranteeSet, target: &Entry, right: &Right) -> Result<Decision> {
        self.gate_domain_status(target)?;

        let leaves = self.catalog.expand(right)?;
        let mut decisive_allow = None;

        for leaf in &leaves {
            if !leaf.applicable_to(target.kind) {
                return Err(EngineError::InvalidRequest(format!(
                    "right {} does not apply to {} targets",
                    leaf.name, target.kind
                )));
            }

            let decision = match leaf.kind.direction() {
                None => self.decide_preset(grantees, target, leaf)?,
                Some(direction) => self.decide_attr_leaf(grantees, target, leaf, direction)?,
            };

            if !decision.allowed {
                debug!(
                    right = %right.name,
                    leaf = %leaf.name,
                    grantee = %grantees.account.name,
                    target = %target.name,
                    "denied"
                );
                return Ok(decision);
            }
            if decisive_allow.is_none() {
                decisive_allow = decision.via;
            }
        }

        debug!(
            right = %right.name,
            grantee = %grantees.account.name,
            target = %target.name,
            "allowed"
        );
        Ok(Decision {
            allowed: true,
            via: decisive_allow,
        })
    }

    /// Whether the grantee set holds every leaf of a right on an entry,
    /// for delegation purposes.
    ///
    /// Grants can sit on scope entries (a domain, the global config) the
    /// right does not execute on; delegation asks whether the grantor was
    /// granted the right *as such* along the scope's chain, so leaves are
    /// matched by right identity rather than expanded into attributes.
    pub fn holds_for_delegation(
        &self,
        grantees: &GranteeSet,
        scope: &Entry,
        right: &Right,
    ) -> Result<bool> {
        for leaf in self.catalog.expand(right)? {
            if !self.decide_preset(grantees, scope, &leaf)?.allowed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fails with `PermDenied` when the target's domain is out of service.
    /// Checked before any grant; an explicit allow cannot override it.
    pub fn gate_domain_status(&self, target: &Entry) -> Result<()> {
        let status = self.directory.gating_status(target)?;
        if status.blocks_access() {
            let domain = self
                .directory
                .domain_of(target)?
                .map_or_else(|| target.name.clone(), |d| d.name);
            return Err(EngineError::PermDenied { domain, status });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Preset rights
    // ------------------------------------------------------------------

    fn decide_preset(
        &self,
        grantees: &GranteeSet,
        target: &Entry,
        leaf: &Right,
    ) -> Result<Decision> {
        // A principal that cannot hold admin rights has all of its admin
        // grants ignored, not denied: the default deny applies.
        if !leaf.user_right && !grantees.valid_for_admin_rights() {
            return Ok(Decision::default_deny());
        }

        let chain = self.directory.ancestor_chain(target)?;
        for level in &chain {
            let candidates = self.candidates_at(level, leaf);
            for class in GranteeClass::ORDERED {
                if !leaf.user_right && class > GranteeClass::Authenticated {
                    break;
                }
                let matched: Vec<&Candidate<'_>> = candidates
                    .iter()
                    .filter(|c| c.grant.grantee_type.class() == class)
                    .filter(|c| grantees.matches(c.grant.grantee_type, c.grant.grantee_id.as_ref()))
                    .collect();

                // Deny wins over allow at equal specificity.
                let decisive = matched
                    .iter()
                    .copied()
                    .find(|c| c.grant.is_deny())
                    .or_else(|| matched.first().copied());
                if let Some(decisive) = decisive {
                    return Ok(Decision {
                        allowed: !decisive.grant.is_deny(),
                        via: Some(self.via(decisive)?),
                    });
                }
            }
            // No grantee matched at this level; keep descending. Levels
            // only decide when they actually match someone.
        }

        Ok(Decision::default_deny())
    }

    /// Grants at one chain level that can decide `leaf` on this call.
    fn candidates_at<'b>(&self, level: &'b ChainLevel, leaf: &Right) -> Vec<Candidate<'b>> {
        let mut candidates = Vec::new();
        for grantor in &level.entries {
            for grant in GrantStore::grants_on(grantor) {
                if level.sub_domain_only && !grant.reaches_sub_domains() {
                    continue;
                }
                if !leaf.user_right && !grant.grantee_type.allowed_for_admin_rights() {
                    continue;
                }
                if !self.grant_covers_preset(&grant, leaf) {
                    continue;
                }
                candidates.push(Candidate { grant, grantor });
            }
        }
        candidates
    }

    /// Whether a stored grant covers a preset leaf right, expanding combo
    /// grants through the catalog.
    fn grant_covers_preset(&self, grant: &Grant, leaf: &Right) -> bool {
        if grant.right == leaf.name {
            return true;
        }
        let Ok(granted) = self.catalog.lookup(&grant.right) else {
            // Grants may outlive a right removed from the catalog; such a
            // grant is inert until the right reappears.
            return false;
        };
        granted.is_combo()
            && self
                .catalog
                .expand(&granted)
                .is_ok_and(|members| members.iter().any(|m| m.name == leaf.name))
    }

    fn via(&self, candidate: &Candidate<'_>) -> Result<ViaGrant> {
        let grantee_name = match &candidate.grant.grantee_id {
            Some(id) => self
                .directory
                .get(id)?
                .map_or_else(|| id.to_string(), |entry| entry.name),
            None => candidate.grant.grantee_type.code().to_string(),
        };
        Ok(ViaGrant {
            target_type: candidate.grantor.kind,
            target_name: candidate.grantor.name.clone(),
            grantee_type: candidate.grant.grantee_type,
            grantee_name,
            right: candidate.grant.right.clone(),
            is_negative: candidate.grant.is_deny(),
        })
    }

    // ------------------------------------------------------------------
    // Attribute rights
    // ------------------------------------------------------------------

    /// Decides an attr leaf right: its whole attribute scope must be
    /// covered in the needed direction.
    fn decide_attr_leaf(
        &self,
        grantees: &GranteeSet,
        target: &Entry,
        leaf: &Right,
        direction: AttrDirection,
    ) -> Result<Decision> {
        let allowed = self.allowed_attrs(grantees, target, direction)?;
        let covered = match &leaf.attrs {
            AttrScope::All => allowed == AllowedAttrs::AllowAll,
            AttrScope::Named(attrs) => allowed.covers_all(attrs.iter().map(String::as_str)),
        };
        Ok(Decision {
            allowed: covered,
            via: None,
        })
    }

    /// Computes the net attribute coverage of the grantee set on a target.
    ///
    /// Collection phase: walk the chain level by level. Individual-grantee
    /// matches record attributes at relativity `2L + 1`, group matches at
    /// `2L + 2`, so a group grant at the target outranks an individual
    /// grant on the domain. An all-attrs grant ends collection. Denies at
    /// one relativity bucket are processed before allows, so an explicit
    /// named deny survives an all-attrs allow at the same distance.
    ///
    /// Computing phase: a named attribute denied at least as close as it
    /// was allowed is removed; an ending all-attrs verdict is widened or
    /// narrowed by the named grants collected closer in.
    pub fn allowed_attrs(
        &self,
        grantees: &GranteeSet,
        target: &Entry,
        direction: AttrDirection,
    ) -> Result<AllowedAttrs> {
        // Attr rights are admin rights; there is no user-right variant.
        if !grantees.valid_for_admin_rights() {
            return Ok(AllowedAttrs::DenyAll);
        }

        let mut allow_some: BTreeMap<String, u32> = BTreeMap::new();
        let mut deny_some: BTreeMap<String, u32> = BTreeMap::new();
        let mut verdict: Option<bool> = None; // Some(true)=allow-all, Some(false)=deny-all

        let chain = self.directory.ancestor_chain(target)?;
        'levels: for (level_index, level) in chain.iter().enumerate() {
            let relativity = u32::try_from(level_index).unwrap_or(u32::MAX) * 2 + 1;
            for (class, bump) in [
                (GranteeClass::Individual, 0),
                (GranteeClass::Group, 1),
                (GranteeClass::Authenticated, 1),
            ] {
                let result = self.collect_attr_grants(
                    grantees,
                    target,
                    level,
                    class,
                    direction,
                    relativity + bump,
                    &mut allow_some,
                    &mut deny_some,
                )?;
                if let Some(all) = result {
                    verdict = Some(all);
                    break 'levels;
                }
            }
        }

        Ok(match verdict {
            Some(true) => {
                if deny_some.is_empty() {
                    AllowedAttrs::AllowAll
                } else {
                    // Everything in the class except the closer named
                    // denies; a named allow closer than its deny still
                    // survives.
                    AllowedAttrs::AllowSome(
                        self.class_attrs_minus(target, &deny_some)
                            .union(&net_allowed(&allow_some, &deny_some))
                            .cloned()
                            .collect(),
                    )
                }
            }
            Some(false) => {
                if allow_some.is_empty() {
                    AllowedAttrs::DenyAll
                } else {
                    AllowedAttrs::AllowSome(allow_some.into_keys().collect())
                }
            }
            None => {
                let allowed = net_allowed(&allow_some, &deny_some);
                if allowed.is_empty() {
                    AllowedAttrs::DenyAll
                } else {
                    AllowedAttrs::AllowSome(allowed)
                }
            }
        })
    }

    /// The attributes of the target's class, minus the explicitly denied
    /// ones. Used to materialize an all-attrs allow with closer denies.
    fn class_attrs_minus(
        &self,
        target: &Entry,
        denied: &BTreeMap<String, u32>,
    ) -> BTreeSet<String> {
        let mut attrs = self.registry.attrs_in_class(target.kind);
        for attr in denied.keys() {
            attrs.remove(attr);
        }
        attrs
    }

    /// Collects the attr grants of one grantee class at one level.
    ///
    /// Returns `Some(true)`/`Some(false)` when an all-attrs allow/deny
    /// ends collection, `None` to continue.
    fn collect_attr_grants(
        &self,
        grantees: &GranteeSet,
        target: &Entry,
        level: &ChainLevel,
        class: GranteeClass,
        direction: AttrDirection,
        relativity: u32,
        allow_some: &mut BTreeMap<String, u32>,
        deny_some: &mut BTreeMap<String, u32>,
    ) -> Result<Option<bool>> {
        let mut matched: Vec<Grant> = Vec::new();
        for grantor in &level.entries {
            for grant in GrantStore::grants_on(grantor) {
                if level.sub_domain_only && !grant.reaches_sub_domains() {
                    continue;
                }
                if !grant.grantee_type.allowed_for_admin_rights() {
                    continue;
                }
                if grant.grantee_type.class() != class {
                    continue;
                }
                if grantees.matches(grant.grantee_type, grant.grantee_id.as_ref()) {
                    matched.push(grant);
                }
            }
        }
        // Denies first, so a named deny is already recorded when an
        // all-attrs allow of the same relativity ends collection.
        matched.sort_by_key(|grant| !grant.is_deny());

        for grant in matched {
            let Ok(granted) = self.catalog.lookup(&grant.right) else {
                continue;
            };
            let attr_rights: Vec<Arc<Right>> = if granted.is_combo() {
                self.catalog
                    .expand(&granted)?
                    .into_iter()
                    .filter(|leaf| leaf.is_attr())
                    .collect()
            } else if granted.is_attr() {
                vec![Arc::clone(&granted)]
            } else {
                continue;
            };

            for attr_right in attr_rights {
                if !attr_right.applicable_to(target.kind) {
                    // A grant that somehow landed on the wrong target
                    // type is inert, not an error.
                    continue;
                }
                if !attr_right.kind.suits(direction) {
                    continue;
                }
                // A negative set-attrs grant does not subtract from
                // get-attrs coverage; only same-direction denies count.
                if grant.is_deny() && attr_right.kind.direction() != Some(direction) {
                    continue;
                }

                match effective_scope(&attr_right, &grant) {
                    AttrScope::All => {
                        return Ok(Some(!grant.is_deny()));
                    }
                    AttrScope::Named(attrs) => {
                        let bucket = if grant.is_deny() {
                            &mut *deny_some
                        } else {
                            &mut *allow_some
                        };
                        for attr in attrs {
                            bucket
                                .entry(attr)
                                .and_modify(|r| *r = (*r).min(relativity))
                                .or_insert(relativity);
                        }
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Intersects an attr right's scope with a grant's optional narrowing.
fn effective_scope(right: &Right, grant: &Grant) -> AttrScope {
    match (&right.attrs, &grant.attrs) {
        (scope, None) => scope.clone(),
        (AttrScope::All, Some(narrowed)) => AttrScope::Named(narrowed.clone()),
        (AttrScope::Named(scope), Some(narrowed)) => {
            AttrScope::Named(scope.intersection(narrowed).cloned().collect())
        }
    }
}

/// Allowed attributes surviving the deny overlay: a deny at least as close
/// as the allow removes the attribute.
fn net_allowed(
    allow_some: &BTreeMap<String, u32>,
    deny_some: &BTreeMap<String, u32>,
) -> BTreeSet<String> {
    allow_some
        .iter()
        .filter(|&(attr, &allow_rel)| {
            deny_some
                .get(attr)
                .is_none_or(|&deny_rel| deny_rel > allow_rel)
        })
        .map(|(attr, _)| attr.clone())
        .collect()
}
