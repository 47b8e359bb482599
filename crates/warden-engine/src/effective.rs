//! Effective-rights aggregation.
//!
//! Where the evaluator answers "may G do R on T", the aggregator answers
//! the delegated-admin-console question: "what exactly may G do on T" --
//! or on every target G holds any grant on at all.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_catalog::AttrDirection;
use warden_directory::{Entry, GranteeSet, PSEUDO_ENTRY_ID};
use warden_grants::GrantStore;
use warden_types::{GranteeClass, TargetType};

use crate::evaluator::{AllowedAttrs, Evaluator};
use crate::Result;

/// One attribute a grantee can read or write, with the default values the
/// target would inherit for it. Defaults are only populated when the
/// caller asked for expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveAttr {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_values: Vec<String>,
}

/// Everything a grantee holds on one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveRights {
    pub target_type: Option<TargetType>,
    pub target_name: String,
    pub grantee_name: String,
    /// Allowed preset rights, sorted by name.
    pub preset_rights: Vec<String>,
    pub can_set_all_attrs: bool,
    pub can_set_attrs: BTreeMap<String, EffectiveAttr>,
    pub can_get_all_attrs: bool,
    pub can_get_attrs: BTreeMap<String, EffectiveAttr>,
}

/// Aggregated rights of one grantee over one target type.
///
/// Domain-scoped aggregates ("every account in example.com") are kept
/// apart from individual entries so a console can render inherited scope
/// separately from direct grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightsByTargetType {
    /// Rights on every entry of the type, from global-scope grants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all: Option<EffectiveRights>,
    /// Rights on every entry of the type within a domain, keyed by domain
    /// name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub in_domains: BTreeMap<String, EffectiveRights>,
    /// Rights on individual entries, keyed by entry name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entries: BTreeMap<String, EffectiveRights>,
}

impl RightsByTargetType {
    fn is_empty(&self) -> bool {
        self.all.is_none() && self.in_domains.is_empty() && self.entries.is_empty()
    }
}

/// Aggregated rights of one grantee over the whole directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllEffectiveRights {
    pub grantee_name: String,
    pub rights: BTreeMap<TargetType, RightsByTargetType>,
}

impl<'a> Evaluator<'a> {
    /// Computes the full effective rights of a grantee on one target.
    ///
    /// System admins hold every preset right executable on the target's
    /// type and full attribute access without consulting grants; everyone
    /// else gets the collected-and-merged view.
    pub fn effective_rights(
        &self,
        grantees: &GranteeSet,
        target: &Entry,
        expand_set_attrs: bool,
        expand_get_attrs: bool,
    ) -> Result<EffectiveRights> {
        let mut result = EffectiveRights {
            target_type: Some(target.kind),
            target_name: target.name.clone(),
            grantee_name: grantees.account.name.clone(),
            ..EffectiveRights::default()
        };

        let (preset, can_set, can_get) = if grantees.account.is_system_admin {
            (
                self.all_executable_presets(target.kind),
                AllowedAttrs::AllowAll,
                AllowedAttrs::AllowAll,
            )
        } else {
            (
                self.effective_presets(grantees, target)?,
                self.allowed_attrs(grantees, target, AttrDirection::Set)?,
                self.allowed_attrs(grantees, target, AttrDirection::Get)?,
            )
        };

        result.preset_rights = preset.into_iter().collect();

        let defaults = self.directory.attr_defaults(target)?;
        self.fill_attr_result(
            target,
            can_set,
            expand_set_attrs,
            &defaults,
            &mut result.can_set_all_attrs,
            &mut result.can_set_attrs,
        );
        self.fill_attr_result(
            target,
            can_get,
            expand_get_attrs,
            &defaults,
            &mut result.can_get_all_attrs,
            &mut result.can_get_attrs,
        );

        debug!(
            grantee = %result.grantee_name,
            target = %result.target_name,
            presets = result.preset_rights.len(),
            "effective rights computed"
        );
        Ok(result)
    }

    fn fill_attr_result(
        &self,
        target: &Entry,
        allowed: AllowedAttrs,
        expand: bool,
        defaults: &BTreeMap<String, Vec<String>>,
        all_flag: &mut bool,
        attrs_out: &mut BTreeMap<String, EffectiveAttr>,
    ) {
        match allowed {
            AllowedAttrs::AllowAll => {
                *all_flag = true;
                if expand {
                    *attrs_out = attach_defaults(
                        self.registry.attrs_in_class(target.kind),
                        Some(defaults),
                    );
                }
            }
            AllowedAttrs::AllowSome(attrs) => {
                // Inherited defaults are only resolved on request.
                *attrs_out = attach_defaults(attrs, expand.then_some(defaults));
            }
            AllowedAttrs::DenyAll => {}
        }
    }

    /// Every preset right executable on a target type, combos expanded.
    fn all_executable_presets(&self, target_type: TargetType) -> BTreeSet<String> {
        let mut presets = BTreeSet::new();
        for right in self.catalog.all_rights(None) {
            if right.is_preset() && right.applicable_to(target_type) {
                presets.insert(right.name.clone());
            } else if right.is_combo() {
                if let Ok(members) = self.catalog.expand(&right) {
                    presets.extend(
                        members
                            .iter()
                            .filter(|m| m.is_preset() && m.applicable_to(target_type))
                            .map(|m| m.name.clone()),
                    );
                }
            }
        }
        presets
    }

    /// Collects allowed preset rights with the same relativity rules as
    /// attribute collection: a deny at least as close as the allow wins.
    fn effective_presets(
        &self,
        grantees: &GranteeSet,
        target: &Entry,
    ) -> Result<BTreeSet<String>> {
        if !grantees.valid_for_admin_rights() {
            return Ok(BTreeSet::new());
        }

        let mut allowed: BTreeMap<String, u32> = BTreeMap::new();
        let mut denied: BTreeMap<String, u32> = BTreeMap::new();

        let chain = self.directory.ancestor_chain(target)?;
        for (level_index, level) in chain.iter().enumerate() {
            let relativity = u32::try_from(level_index).unwrap_or(u32::MAX) * 2 + 1;
            for grantor in &level.entries {
                for grant in GrantStore::grants_on(grantor) {
                    if level.sub_domain_only && !grant.reaches_sub_domains() {
                        continue;
                    }
                    if !grant.grantee_type.allowed_for_admin_rights() {
                        continue;
                    }
                    if !grantees.matches(grant.grantee_type, grant.grantee_id.as_ref()) {
                        continue;
                    }
                    let bump = match grant.grantee_type.class() {
                        GranteeClass::Individual => 0,
                        _ => 1,
                    };
                    let Ok(granted) = self.catalog.lookup(&grant.right) else {
                        continue;
                    };
                    for leaf in self.catalog.expand(&granted)? {
                        if !leaf.is_preset() || !leaf.applicable_to(target.kind) {
                            continue;
                        }
                        let bucket = if grant.is_deny() {
                            &mut denied
                        } else {
                            &mut allowed
                        };
                        bucket
                            .entry(leaf.name.clone())
                            .and_modify(|r| *r = (*r).min(relativity + bump))
                            .or_insert(relativity + bump);
                    }
                }
            }
        }

        Ok(allowed
            .into_iter()
            .filter(|(name, allow_rel)| {
                denied
                    .get(name)
                    .is_none_or(|deny_rel| deny_rel > allow_rel)
            })
            .map(|(name, _)| name)
            .collect())
    }

    /// Aggregates effective rights over every target the grantee set holds
    /// any direct grant on, grouped by target type.
    ///
    /// Grants on domains and on the global config produce scope aggregates
    /// (computed against a synthesized entry of the covered type) instead
    /// of being repeated on every member entry.
    pub fn all_effective_rights(
        &self,
        grantees: &GranteeSet,
        expand_set_attrs: bool,
        expand_get_attrs: bool,
    ) -> Result<AllEffectiveRights> {
        let mut result = AllEffectiveRights {
            grantee_name: grantees.account.name.clone(),
            rights: BTreeMap::new(),
        };

        // Which target types each granting scope can cover.
        let mut domain_scopes: BTreeMap<String, BTreeSet<TargetType>> = BTreeMap::new();
        let mut global_scope: BTreeSet<TargetType> = BTreeSet::new();
        let mut direct: Vec<Entry> = Vec::new();

        for grantor in self.directory.entries_with_grants()? {
            let matching: Vec<_> = GrantStore::grants_on(&grantor)
                .into_iter()
                .filter(|grant| grant.grantee_type.allowed_for_admin_rights())
                .filter(|grant| grantees.matches(grant.grantee_type, grant.grantee_id.as_ref()))
                .collect();
            if matching.is_empty() {
                continue;
            }

            let mut covered: BTreeSet<TargetType> = BTreeSet::new();
            for grant in &matching {
                if let Ok(right) = self.catalog.lookup(&grant.right) {
                    covered.extend(right.target_types.iter().copied());
                }
            }

            match grantor.kind {
                TargetType::GlobalConfig => {
                    global_scope.extend(
                        covered
                            .iter()
                            .copied()
                            .filter(|tt| *tt != TargetType::GlobalConfig),
                    );
                    // Rights on the global config itself stay individual.
                    if covered.contains(&TargetType::GlobalConfig) {
                        direct.push(grantor.clone());
                    }
                }
                TargetType::Domain => {
                    // The domain aggregate covers its member entry types;
                    // rights on the domain entry itself stay individual.
                    domain_scopes
                        .entry(grantor.name.clone())
                        .or_default()
                        .extend(covered.iter().copied().filter(|tt| tt.is_domained()));
                    if covered.contains(&TargetType::Domain) {
                        direct.push(grantor.clone());
                    }
                }
                _ => direct.push(grantor.clone()),
            }
        }

        for entry in direct {
            let rights =
                self.effective_rights(grantees, &entry, expand_set_attrs, expand_get_attrs)?;
            if rights.preset_rights.is_empty()
                && !rights.can_get_all_attrs
                && !rights.can_set_all_attrs
                && rights.can_get_attrs.is_empty()
                && rights.can_set_attrs.is_empty()
            {
                continue;
            }
            result
                .rights
                .entry(entry.kind)
                .or_default()
                .entries
                .insert(entry.name.clone(), rights);
        }

        for (domain_name, types) in domain_scopes {
            for target_type in types {
                let probe = self.scope_probe(target_type, Some(&domain_name))?;
                let rights =
                    self.effective_rights(grantees, &probe, expand_set_attrs, expand_get_attrs)?;
                result
                    .rights
                    .entry(target_type)
                    .or_default()
                    .in_domains
                    .insert(domain_name.clone(), rights);
            }
        }

        for target_type in global_scope {
            let probe = self.scope_probe(target_type, None)?;
            let rights =
                self.effective_rights(grantees, &probe, expand_set_attrs, expand_get_attrs)?;
            result.rights.entry(target_type).or_default().all = Some(rights);
        }

        result.rights.retain(|_, bucket| !bucket.is_empty());
        Ok(result)
    }

    /// A synthesized entry standing in for "any entry of this type" in a
    /// scope, so scope aggregates reuse the single-target path.
    fn scope_probe(&self, target_type: TargetType, domain: Option<&str>) -> Result<Entry> {
        match domain {
            Some(domain) => Ok(self.directory.pseudo_entry(target_type, Some(domain), None)?),
            None => {
                let mut probe = Entry::new(target_type, PSEUDO_ENTRY_ID, "pseudo");
                probe.name = format!("(all {})", target_type.code());
                Ok(probe)
            }
        }
    }
}

fn attach_defaults(
    attrs: BTreeSet<String>,
    defaults: Option<&BTreeMap<String, Vec<String>>>,
) -> BTreeMap<String, EffectiveAttr> {
    attrs
        .into_iter()
        .map(|name| {
            let default_values = defaults
                .and_then(|d| d.get(&name).cloned())
                .unwrap_or_default();
            (
                name.clone(),
                EffectiveAttr {
                    name,
                    default_values,
                },
            )
        })
        .collect()
}
