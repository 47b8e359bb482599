//! Right-definition loading.
//!
//! Rights are tabular, externally versioned data, not source constants.
//! They are declared in TOML documents and loaded at startup; extension
//! rights live in additional files in the same directory and are picked up
//! by an explicit reload.
//!
//! ```toml
//! [[right]]
//! name = "resetPassword"
//! type = "preset"
//! desc = "reset an account's password"
//! target-types = ["account", "calresource"]
//!
//! [[right]]
//! name = "configureQuota"
//! type = "setAttrs"
//! desc = "set mail quota attributes"
//! target-types = ["account"]
//! attrs = ["mailQuota"]
//! ```

use std::collections::btree_map::Entry as MapEntry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;
use warden_types::TargetType;

use crate::right::{AttrScope, Right, RightKind};
use crate::{CatalogError, Result};

/// One `[[right]]` table in a definition file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct RightDef {
    name: String,
    #[serde(default)]
    desc: String,
    #[serde(rename = "type")]
    kind: RightKind,
    #[serde(default)]
    target_types: Vec<String>,
    #[serde(default)]
    attrs: Vec<String>,
    #[serde(default)]
    all_attrs: bool,
    #[serde(default)]
    rights: Vec<String>,
    #[serde(default)]
    user_right: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RightsDoc {
    #[serde(default, rename = "right")]
    rights: Vec<RightDef>,
}

/// Parses one TOML document into right definitions keyed by name.
///
/// Definitions are validated individually here; cross-right validation
/// (member resolution, cycles) happens in [`link`] once all documents are
/// merged.
pub(crate) fn parse_doc(
    source: &str,
    into: &mut BTreeMap<String, RightDef>,
) -> Result<()> {
    let doc: RightsDoc = toml::from_str(source)?;
    for def in doc.rights {
        validate_def(&def)?;
        match into.entry(def.name.clone()) {
            MapEntry::Vacant(slot) => {
                slot.insert(def);
            }
            MapEntry::Occupied(existing) => {
                return Err(CatalogError::InvalidDefinition(format!(
                    "right {} defined more than once",
                    existing.key()
                )));
            }
        }
    }
    Ok(())
}

fn validate_def(def: &RightDef) -> Result<()> {
    let fail = |msg: &str| {
        Err(CatalogError::InvalidDefinition(format!(
            "right {}: {msg}",
            def.name
        )))
    };

    if def.name.is_empty() {
        return Err(CatalogError::InvalidDefinition(
            "right with empty name".to_string(),
        ));
    }

    match def.kind {
        RightKind::Preset => {
            if def.target_types.is_empty() {
                return fail("preset right needs target-types");
            }
            if !def.attrs.is_empty() || def.all_attrs || !def.rights.is_empty() {
                return fail("preset right cannot carry attrs or member rights");
            }
        }
        RightKind::GetAttrs | RightKind::SetAttrs => {
            if def.target_types.is_empty() {
                return fail("attr right needs target-types");
            }
            if def.attrs.is_empty() == !def.all_attrs {
                return fail("attr right needs exactly one of attrs or all-attrs");
            }
            if !def.rights.is_empty() {
                return fail("attr right cannot carry member rights");
            }
        }
        RightKind::Combo => {
            if def.rights.is_empty() {
                return fail("combo right needs member rights");
            }
            if !def.target_types.is_empty() || !def.attrs.is_empty() || def.all_attrs {
                return fail("combo right target types and attrs come from its members");
            }
        }
    }
    Ok(())
}

/// Resolves member references, rejects combo cycles, computes combo target
/// types, and produces the final immutable right table.
pub(crate) fn link(defs: BTreeMap<String, RightDef>) -> Result<BTreeMap<String, Arc<Right>>> {
    // Combo cycles are fatal at load time, never per call.
    for name in defs.keys() {
        let mut visiting = Vec::new();
        check_cycles(&defs, name, &mut visiting)?;
    }

    let mut rights = BTreeMap::new();
    for (name, def) in &defs {
        let target_types = match def.kind {
            RightKind::Combo => combo_target_types(&defs, name),
            _ => def
                .target_types
                .iter()
                .map(|code| code.parse::<TargetType>())
                .collect::<std::result::Result<BTreeSet<_>, _>>()?,
        };

        let attrs = if def.all_attrs {
            AttrScope::All
        } else {
            AttrScope::Named(def.attrs.iter().cloned().collect())
        };

        rights.insert(
            name.clone(),
            Arc::new(Right {
                name: name.clone(),
                desc: def.desc.clone(),
                kind: def.kind,
                target_types,
                attrs,
                members: def.rights.clone(),
                user_right: def.user_right,
            }),
        );
    }

    debug!(rights = rights.len(), "right catalog linked");
    Ok(rights)
}

fn check_cycles<'a>(
    defs: &'a BTreeMap<String, RightDef>,
    name: &'a str,
    visiting: &mut Vec<&'a str>,
) -> Result<()> {
    let Some(def) = defs.get(name) else {
        let combo = visiting.last().copied().unwrap_or(name);
        return Err(CatalogError::UnknownMember {
            combo: combo.to_string(),
            member: name.to_string(),
        });
    };

    if def.kind != RightKind::Combo {
        return Ok(());
    }
    if visiting.contains(&name) {
        return Err(CatalogError::InvalidComboRight {
            right: visiting[0].to_string(),
            via: name.to_string(),
        });
    }

    visiting.push(name);
    for member in &def.rights {
        check_cycles(defs, member, visiting)?;
    }
    visiting.pop();
    Ok(())
}

/// Union of the transitive leaf members' target types.
fn combo_target_types(defs: &BTreeMap<String, RightDef>, name: &str) -> BTreeSet<TargetType> {
    let mut types = BTreeSet::new();
    let mut stack = vec![name];
    let mut seen = BTreeSet::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        // link() runs after check_cycles, so every member resolves.
        let def = &defs[current];
        if def.kind == RightKind::Combo {
            stack.extend(def.rights.iter().map(String::as_str));
        } else {
            types.extend(
                def.target_types
                    .iter()
                    .filter_map(|code| code.parse::<TargetType>().ok()),
            );
        }
    }
    types
}

/// Reads and merges every `.toml` document in a directory, in file-name
/// order so extension files load deterministically.
pub(crate) fn read_dir(dir: &Path) -> Result<BTreeMap<String, RightDef>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut defs = BTreeMap::new();
    for path in paths {
        let source = std::fs::read_to_string(&path)?;
        debug!(file = %path.display(), "loading right definitions");
        parse_doc(&source, &mut defs)?;
    }
    Ok(defs)
}
