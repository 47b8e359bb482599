//! Attribute schema registry and per-entry constraints.
//!
//! The registry is the engine's view of the externally owned attribute
//! metadata: which attributes exist per target type and how values are
//! validated (type, bounds, pattern, enumeration). It is loaded from a
//! TOML schema document at startup, like the right catalog:
//!
//! ```toml
//! [account.mailQuota]
//! type = "integer"
//! min = 0
//!
//! [account.accountStatus]
//! type = "enum"
//! values = ["active", "locked", "closed"]
//! ```
//!
//! Separately, admins can tighten values per deployment with constraints
//! stored on a *constraint entry* (the class of service, or the global
//! config), one encoded constraint per attribute value:
//! `mailQuota:min=0:max=10737418240` or `accountStatus:values=active,locked`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use warden_types::TargetType;

use crate::Entry;

/// A value rejected by attribute metadata or a stored constraint.
///
/// Distinct from a rights denial: the grantee may well hold the set-attrs
/// right, the value itself is unacceptable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("constraint violated for {attr}={value}: {reason}")]
pub struct ConstraintViolation {
    pub attr: String,
    pub value: String,
    pub reason: String,
}

impl ConstraintViolation {
    fn new(attr: &str, value: &str, reason: impl Into<String>) -> Self {
        Self {
            attr: attr.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading the schema document.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("cannot read attribute schema: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed attribute schema: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown target type in attribute schema: {0}")]
    UnknownCode(#[from] warden_types::UnknownCode),

    #[error("bad pattern for attribute {attr}: {source}")]
    BadPattern {
        attr: String,
        source: regex::Error,
    },
}

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrKind {
    String,
    Integer,
    Boolean,
    Email,
    Enum,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct AttrDefSpec {
    #[serde(rename = "type")]
    kind: AttrKind,
    #[serde(default)]
    min: Option<i64>,
    #[serde(default)]
    max: Option<i64>,
    #[serde(default)]
    values: Vec<String>,
    #[serde(default)]
    pattern: Option<String>,
}

/// Compiled metadata for one attribute.
#[derive(Debug, Clone)]
pub struct AttrDef {
    pub kind: AttrKind,
    /// Lower bound: numeric value for integers, length for strings.
    pub min: Option<i64>,
    /// Upper bound: numeric value for integers, length for strings.
    pub max: Option<i64>,
    /// Allowed values for enum attributes.
    pub values: BTreeSet<String>,
    /// Pattern string attributes must match in full.
    pub pattern: Option<Regex>,
}

impl AttrDef {
    fn validate(&self, attr: &str, value: &str) -> Result<(), ConstraintViolation> {
        match self.kind {
            AttrKind::Integer => {
                let parsed: i64 = value.parse().map_err(|_| {
                    ConstraintViolation::new(attr, value, "not an integer")
                })?;
                if self.min.is_some_and(|min| parsed < min) {
                    return Err(ConstraintViolation::new(attr, value, "below minimum"));
                }
                if self.max.is_some_and(|max| parsed > max) {
                    return Err(ConstraintViolation::new(attr, value, "above maximum"));
                }
            }
            AttrKind::Boolean => {
                if value != "TRUE" && value != "FALSE" {
                    return Err(ConstraintViolation::new(attr, value, "not TRUE or FALSE"));
                }
            }
            AttrKind::Email => {
                if !value.contains('@') || value.starts_with('@') || value.ends_with('@') {
                    return Err(ConstraintViolation::new(attr, value, "not an address"));
                }
            }
            AttrKind::Enum => {
                if !self.values.contains(value) {
                    return Err(ConstraintViolation::new(
                        attr,
                        value,
                        "not in the allowed value set",
                    ));
                }
            }
            AttrKind::String => {
                let len = i64::try_from(value.len()).unwrap_or(i64::MAX);
                if self.min.is_some_and(|min| len < min) {
                    return Err(ConstraintViolation::new(attr, value, "too short"));
                }
                if self.max.is_some_and(|max| len > max) {
                    return Err(ConstraintViolation::new(attr, value, "too long"));
                }
                if let Some(pattern) = &self.pattern {
                    if !pattern.is_match(value) {
                        return Err(ConstraintViolation::new(
                            attr,
                            value,
                            "does not match pattern",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// The attribute schema shipped with the engine.
const CORE_SCHEMA: &str = include_str!("../defs/warden-schema.toml");

/// Attribute metadata per target type.
#[derive(Debug, Default)]
pub struct AttributeRegistry {
    classes: BTreeMap<TargetType, BTreeMap<String, AttrDef>>,
}

impl AttributeRegistry {
    /// Loads the built-in schema.
    pub fn core() -> Result<Self, SchemaError> {
        Self::load_str(CORE_SCHEMA)
    }

    /// Loads a schema document from a file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        Self::load_str(&std::fs::read_to_string(path)?)
    }

    /// Parses a schema document.
    pub fn load_str(source: &str) -> Result<Self, SchemaError> {
        let raw: BTreeMap<String, BTreeMap<String, AttrDefSpec>> = toml::from_str(source)?;

        let mut classes = BTreeMap::new();
        for (class, attrs) in raw {
            let target_type: TargetType = class.parse()?;
            let mut defs = BTreeMap::new();
            for (name, spec) in attrs {
                let pattern = spec
                    .pattern
                    .as_deref()
                    .map(|p| {
                        Regex::new(&format!("^(?:{p})$")).map_err(|source| {
                            SchemaError::BadPattern {
                                attr: name.clone(),
                                source,
                            }
                        })
                    })
                    .transpose()?;
                defs.insert(
                    name,
                    AttrDef {
                        kind: spec.kind,
                        min: spec.min,
                        max: spec.max,
                        values: spec.values.into_iter().collect(),
                        pattern,
                    },
                );
            }
            classes.insert(target_type, defs);
        }
        Ok(Self { classes })
    }

    /// Every attribute defined for a target type.
    pub fn attrs_in_class(&self, target_type: TargetType) -> BTreeSet<String> {
        self.classes
            .get(&target_type)
            .map(|defs| defs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether an attribute is defined for a target type.
    pub fn defines(&self, target_type: TargetType, attr: &str) -> bool {
        self.classes
            .get(&target_type)
            .is_some_and(|defs| defs.contains_key(attr))
    }

    /// Validates a value against the attribute's metadata.
    pub fn validate(
        &self,
        target_type: TargetType,
        attr: &str,
        value: &str,
    ) -> Result<(), ConstraintViolation> {
        let Some(def) = self.classes.get(&target_type).and_then(|defs| defs.get(attr)) else {
            return Err(ConstraintViolation::new(
                attr,
                value,
                format!("attribute not defined for {target_type}"),
            ));
        };
        def.validate(attr, value)
    }
}

// ============================================================================
// Entry-stored constraints
// ============================================================================

/// A deployment-set bound on one attribute, stored on a constraint entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeConstraint {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub values: Option<BTreeSet<String>>,
}

impl AttributeConstraint {
    /// Parses the constraint values stored on an entry.
    ///
    /// One constraint per value, `<attr>:part[:part...]` where each part is
    /// `min=N`, `max=N`, or `values=a,b,c`. Malformed values are skipped
    /// with a warning so one bad constraint cannot block all writes.
    pub fn parse_entry(entry: &Entry) -> BTreeMap<String, AttributeConstraint> {
        let mut constraints = BTreeMap::new();
        for raw in entry.attr_values(crate::A_ATTRIBUTE_CONSTRAINT) {
            match Self::parse_one(raw) {
                Some((attr, constraint)) => {
                    constraints.insert(attr, constraint);
                }
                None => {
                    warn!(entry = %entry.name, constraint = %raw, "skipping malformed constraint");
                }
            }
        }
        constraints
    }

    fn parse_one(raw: &str) -> Option<(String, AttributeConstraint)> {
        let mut parts = raw.split(':');
        let attr = parts.next().filter(|name| !name.is_empty())?;

        let mut constraint = AttributeConstraint::default();
        let mut any = false;
        for part in parts {
            let (key, value) = part.split_once('=')?;
            match key {
                "min" => constraint.min = Some(value.parse().ok()?),
                "max" => constraint.max = Some(value.parse().ok()?),
                "values" => {
                    constraint.values =
                        Some(value.split(',').map(ToString::to_string).collect());
                }
                _ => return None,
            }
            any = true;
        }
        any.then(|| (attr.to_string(), constraint))
    }

    /// Checks a candidate value, returning the violated bound if any.
    pub fn check(&self, attr: &str, value: &str) -> Result<(), ConstraintViolation> {
        if let Some(allowed) = &self.values {
            if !allowed.contains(value) {
                return Err(ConstraintViolation::new(
                    attr,
                    value,
                    "not in the constrained value set",
                ));
            }
        }
        if self.min.is_some() || self.max.is_some() {
            let parsed: i64 = value.parse().map_err(|_| {
                ConstraintViolation::new(attr, value, "not numeric but bounds are set")
            })?;
            if self.min.is_some_and(|min| parsed < min) {
                return Err(ConstraintViolation::new(attr, value, "below constrained minimum"));
            }
            if self.max.is_some_and(|max| parsed > max) {
                return Err(ConstraintViolation::new(attr, value, "above constrained maximum"));
            }
        }
        Ok(())
    }
}
