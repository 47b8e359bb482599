//! Unit tests for warden-directory.

use warden_types::{DomainStatus, EntryId, GranteeType, TargetType};

use crate::schema::{AttributeConstraint, AttributeRegistry};
use crate::{Directory, DirectoryError, Entry, GranteeSet};

/// A small but complete directory: two domains (one nested), a class of
/// service, an admin group with a nested member group, and accounts.
fn fixture() -> Directory {
    let directory = Directory::new();

    directory
        .insert(
            Entry::new(TargetType::Domain, "d-example", "example.com")
                .with_attr("defaultCosId", &["cos-standard"]),
        )
        .unwrap();
    directory
        .insert(Entry::new(TargetType::Domain, "d-eng", "eng.example.com"))
        .unwrap();
    directory
        .insert(
            Entry::new(TargetType::Cos, "cos-standard", "standard")
                .with_attr("mailQuota", &["1024"]),
        )
        .unwrap();
    directory
        .insert(
            Entry::new(TargetType::DistributionList, "g-helpdesk", "helpdesk@example.com")
                .in_domain("example.com")
                .admin_group()
                .member_of("g-seniors"),
        )
        .unwrap();
    directory
        .insert(
            Entry::new(TargetType::DistributionList, "g-seniors", "seniors@example.com")
                .in_domain("example.com")
                .admin_group()
                // membership cycle back to helpdesk
                .member_of("g-helpdesk"),
        )
        .unwrap();
    directory
        .insert(
            Entry::new(TargetType::DistributionList, "g-social", "social@example.com")
                .in_domain("example.com"),
        )
        .unwrap();
    directory
        .insert(
            Entry::new(TargetType::Account, "u-alice", "alice@example.com")
                .in_domain("example.com")
                .with_cos("cos-standard")
                .member_of("g-social"),
        )
        .unwrap();
    directory
        .insert(
            Entry::new(TargetType::Account, "u-bob", "bob@example.com")
                .in_domain("example.com")
                .admin_account()
                .member_of("g-helpdesk")
                .member_of("g-social")
                .with_child("u-alice"),
        )
        .unwrap();
    directory
        .insert(Entry::new(TargetType::Server, "s-mail1", "mail1.example.com"))
        .unwrap();

    directory
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn resolves_by_id_and_by_name() {
    let directory = fixture();
    let by_id = directory.resolve(TargetType::Account, Some("u-alice")).unwrap();
    let by_name = directory
        .resolve(TargetType::Account, Some("alice@example.com"))
        .unwrap();
    assert_eq!(by_id, by_name);
}

#[test]
fn resolution_is_typed() {
    let directory = fixture();
    let result = directory.resolve(TargetType::Domain, Some("alice@example.com"));
    assert!(matches!(result, Err(DirectoryError::NoSuchTarget { .. })));
}

#[test]
fn global_config_resolves_without_identity() {
    let directory = fixture();
    let global = directory.resolve(TargetType::GlobalConfig, None).unwrap();
    assert_eq!(global.kind, TargetType::GlobalConfig);
}

#[test]
fn identity_required_for_identified_types() {
    let directory = fixture();
    assert!(matches!(
        directory.resolve(TargetType::Account, None),
        Err(DirectoryError::MissingTargetIdentity(TargetType::Account))
    ));
}

// ============================================================================
// Ancestor chains
// ============================================================================

#[test]
fn account_chain_is_self_groups_domain_global() {
    let directory = fixture();
    let bob = directory.resolve(TargetType::Account, Some("u-bob")).unwrap();
    let chain = directory.ancestor_chain(&bob).unwrap();

    assert_eq!(chain.len(), 4);
    assert_eq!(chain[0].entries[0].name, "bob@example.com");
    // Both direct groups and transitively reachable ones sit on one level.
    let group_names: Vec<&str> = chain[1].entries.iter().map(|e| e.name.as_str()).collect();
    assert!(group_names.contains(&"helpdesk@example.com"));
    assert!(group_names.contains(&"seniors@example.com"));
    assert!(group_names.contains(&"social@example.com"));
    assert_eq!(chain[2].entries[0].name, "example.com");
    assert_eq!(chain[3].entries[0].kind, TargetType::GlobalConfig);
    assert!(chain.iter().all(|level| !level.sub_domain_only));
}

#[test]
fn nested_domain_chain_has_sub_domain_levels() {
    let directory = fixture();
    directory
        .insert(
            Entry::new(TargetType::Account, "u-eve", "eve@eng.example.com")
                .in_domain("eng.example.com"),
        )
        .unwrap();
    let eve = directory.resolve(TargetType::Account, Some("u-eve")).unwrap();
    let chain = directory.ancestor_chain(&eve).unwrap();

    // self, eng.example.com, example.com (sub-domain grants only), global
    assert_eq!(chain.len(), 4);
    assert_eq!(chain[1].entries[0].name, "eng.example.com");
    assert!(!chain[1].sub_domain_only);
    assert_eq!(chain[2].entries[0].name, "example.com");
    assert!(chain[2].sub_domain_only);
    assert!(!chain[3].sub_domain_only);
}

#[test]
fn domain_chain_is_self_parents_global() {
    let directory = fixture();
    let eng = directory.resolve(TargetType::Domain, Some("d-eng")).unwrap();
    let chain = directory.ancestor_chain(&eng).unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[0].entries[0].name, "eng.example.com");
    assert_eq!(chain[1].entries[0].name, "example.com");
    assert!(chain[1].sub_domain_only);
    assert_eq!(chain[2].entries[0].kind, TargetType::GlobalConfig);
}

#[test]
fn server_chain_skips_domains() {
    let directory = fixture();
    let server = directory.resolve(TargetType::Server, Some("s-mail1")).unwrap();
    let chain = directory.ancestor_chain(&server).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].entries[0].kind, TargetType::GlobalConfig);
}

// ============================================================================
// Group membership
// ============================================================================

#[test]
fn membership_cycles_are_broken() {
    let directory = fixture();
    // helpdesk and seniors contain each other; expansion must terminate
    // and report each group once.
    let groups = directory
        .groups_containing(&EntryId::from("u-bob"), false)
        .unwrap();
    let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(groups.len(), 3, "{names:?}");
}

#[test]
fn admin_only_expansion_skips_plain_lists() {
    let directory = fixture();
    let groups = directory
        .groups_containing(&EntryId::from("u-bob"), true)
        .unwrap();
    assert!(groups.iter().all(|g| g.is_admin_group));
    assert!(!groups.iter().any(|g| g.name == "social@example.com"));
}

#[test]
fn parental_relation_is_directional() {
    let directory = fixture();
    let bob = EntryId::from("u-bob");
    let alice = EntryId::from("u-alice");
    assert!(directory.is_parent_of(&bob, &alice).unwrap());
    assert!(!directory.is_parent_of(&alice, &bob).unwrap());
}

// ============================================================================
// Status gating and defaults
// ============================================================================

#[test]
fn gating_status_comes_from_the_domain() {
    let directory = fixture();
    directory
        .insert(
            Entry::new(TargetType::Domain, "d-closed", "closed.example.net")
                .with_status(DomainStatus::Suspended),
        )
        .unwrap();
    directory
        .insert(
            Entry::new(TargetType::Account, "u-zed", "zed@closed.example.net")
                .in_domain("closed.example.net"),
        )
        .unwrap();

    let zed = directory.resolve(TargetType::Account, Some("u-zed")).unwrap();
    assert!(directory.gating_status(&zed).unwrap().blocks_access());

    let alice = directory.resolve(TargetType::Account, Some("u-alice")).unwrap();
    assert!(!directory.gating_status(&alice).unwrap().blocks_access());
}

#[test]
fn defaults_prefer_cos_over_global() {
    let directory = Directory::default();
    directory
        .insert(
            Entry::new(TargetType::GlobalConfig, "globalconfig", "globalconfig")
                .with_attr("mailQuota", &["4096"])
                .with_attr("description", &["global default"]),
        )
        .unwrap();
    directory
        .insert(Entry::new(TargetType::Domain, "d-x", "x.test"))
        .unwrap();
    directory
        .insert(Entry::new(TargetType::Cos, "cos-x", "x").with_attr("mailQuota", &["1024"]))
        .unwrap();
    directory
        .insert(
            Entry::new(TargetType::Account, "u-x", "u@x.test")
                .in_domain("x.test")
                .with_cos("cos-x"),
        )
        .unwrap();

    let account = directory.resolve(TargetType::Account, Some("u-x")).unwrap();
    let defaults = directory.attr_defaults(&account).unwrap();
    // The class of service shadows the global value; attributes only the
    // global config carries still fall through.
    assert_eq!(defaults.get("mailQuota"), Some(&vec!["1024".to_string()]));
    assert_eq!(
        defaults.get("description"),
        Some(&vec!["global default".to_string()])
    );
}

#[test]
fn pseudo_account_picks_up_domain_default_cos() {
    let directory = fixture();
    let pseudo = directory
        .pseudo_entry(TargetType::Account, Some("example.com"), None)
        .unwrap();
    assert!(pseudo.is_pseudo());
    assert_eq!(pseudo.domain.as_deref(), Some("example.com"));
    assert_eq!(pseudo.cos_id, Some(EntryId::from("cos-standard")));

    assert!(matches!(
        directory.pseudo_entry(TargetType::Account, None, None),
        Err(DirectoryError::MissingDomain(TargetType::Account))
    ));
}

// ============================================================================
// ACE updates
// ============================================================================

#[test]
fn ace_updates_are_compare_and_swap() {
    let directory = fixture();
    let alice = directory.resolve(TargetType::Account, Some("u-alice")).unwrap();

    directory
        .update_aces(&alice.id, alice.version, vec!["u-bob usr resetPassword".to_string()])
        .unwrap();

    // A writer holding the stale version must fail and retry.
    let stale = directory.update_aces(&alice.id, alice.version, Vec::new());
    assert!(matches!(stale, Err(DirectoryError::VersionConflict { .. })));

    let fresh = directory.resolve(TargetType::Account, Some("u-alice")).unwrap();
    assert_eq!(fresh.version, alice.version + 1);
    assert_eq!(fresh.aces.len(), 1);
}

// ============================================================================
// Grantee expansion
// ============================================================================

#[test]
fn admin_expansion_includes_nested_admin_groups() {
    let directory = fixture();
    let grantees = GranteeSet::expand(&directory, "bob@example.com", true).unwrap();
    assert!(grantees.valid_for_admin_rights());
    assert!(grantees.groups.contains(&EntryId::from("g-helpdesk")));
    assert!(grantees.groups.contains(&EntryId::from("g-seniors")));
    assert!(!grantees.groups.contains(&EntryId::from("g-social")));
}

#[test]
fn user_expansion_includes_all_groups() {
    let directory = fixture();
    let grantees = GranteeSet::expand(&directory, "alice@example.com", false).unwrap();
    assert!(!grantees.valid_for_admin_rights());
    assert!(grantees.groups.contains(&EntryId::from("g-social")));
}

#[test]
fn grantee_matching_covers_each_type() {
    let directory = fixture();
    let grantees = GranteeSet::expand(&directory, "bob@example.com", true).unwrap();

    let id = |s: &str| EntryId::from(s);
    assert!(grantees.matches(GranteeType::User, Some(&id("u-bob"))));
    assert!(!grantees.matches(GranteeType::User, Some(&id("u-alice"))));
    assert!(grantees.matches(GranteeType::Group, Some(&id("g-helpdesk"))));
    assert!(grantees.matches(GranteeType::Domain, Some(&id("d-example"))));
    assert!(!grantees.matches(GranteeType::Domain, Some(&id("d-eng"))));
    assert!(grantees.matches(GranteeType::AllAdmins, None));
    assert!(grantees.matches(GranteeType::AuthUser, None));
    assert!(grantees.matches(GranteeType::Public, None));

    let user = GranteeSet::expand(&directory, "alice@example.com", false).unwrap();
    assert!(!user.matches(GranteeType::AllAdmins, None));
    assert!(user.matches(GranteeType::Cos, Some(&id("cos-standard"))));
}

// ============================================================================
// Attribute schema
// ============================================================================

#[test]
fn registry_validates_by_kind() {
    let registry = AttributeRegistry::core().unwrap();

    assert!(registry.validate(TargetType::Account, "mailQuota", "512").is_ok());
    assert!(registry.validate(TargetType::Account, "mailQuota", "-1").is_err());
    assert!(registry.validate(TargetType::Account, "mailQuota", "lots").is_err());
    assert!(
        registry
            .validate(TargetType::Account, "accountStatus", "active")
            .is_ok()
    );
    assert!(
        registry
            .validate(TargetType::Account, "accountStatus", "dormant")
            .is_err()
    );
    assert!(
        registry
            .validate(TargetType::Account, "passwordMustChange", "TRUE")
            .is_ok()
    );
    assert!(
        registry
            .validate(TargetType::Account, "passwordMustChange", "yes")
            .is_err()
    );
    assert!(registry.validate(TargetType::Account, "mail", "a@b.example").is_ok());
    assert!(registry.validate(TargetType::Account, "mail", "nope").is_err());
    assert!(
        registry
            .validate(TargetType::Server, "mailPort", "70000")
            .is_err()
    );
    // Unknown attribute for the class
    assert!(
        registry
            .validate(TargetType::Server, "mailQuota", "1")
            .is_err()
    );
}

#[test]
fn registry_lists_class_attrs() {
    let registry = AttributeRegistry::core().unwrap();
    let attrs = registry.attrs_in_class(TargetType::Account);
    assert!(attrs.contains("displayName"));
    assert!(attrs.contains("mailQuota"));
    assert!(!attrs.contains("serviceHostname"));
}

#[test]
fn entry_constraints_parse_and_check() {
    let cos = Entry::new(TargetType::Cos, "cos-x", "constrained").with_attr(
        crate::A_ATTRIBUTE_CONSTRAINT,
        &[
            "mailQuota:min=10:max=100",
            "accountStatus:values=active,locked",
            "garbage-without-parts",
        ],
    );

    let constraints = AttributeConstraint::parse_entry(&cos);
    assert_eq!(constraints.len(), 2, "malformed value is skipped");

    let quota = &constraints["mailQuota"];
    assert!(quota.check("mailQuota", "50").is_ok());
    assert!(quota.check("mailQuota", "5").is_err());
    assert!(quota.check("mailQuota", "500").is_err());

    let status = &constraints["accountStatus"];
    assert!(status.check("accountStatus", "active").is_ok());
    assert!(status.check("accountStatus", "closed").is_err());
}

// ============================================================================
// Property-Based Tests
// ============================================================================

use proptest::prelude::*;

proptest! {
    /// Property: any inserted entry resolves by both id and name.
    #[test]
    fn prop_inserted_entries_resolve(
        local in "[a-z]{1,12}",
        id_suffix in "[a-z0-9]{4,8}",
    ) {
        let directory = fixture();
        let id = format!("u-{id_suffix}");
        let name = format!("{local}@example.com");
        directory
            .insert(
                Entry::new(TargetType::Account, id.as_str(), name.as_str())
                    .in_domain("example.com"),
            )
            .unwrap();

        prop_assert!(directory.resolve(TargetType::Account, Some(&id)).is_ok());
        prop_assert!(directory.resolve(TargetType::Account, Some(&name)).is_ok());
    }

    /// Property: the ancestor chain always starts at the entry and ends at
    /// the global config.
    #[test]
    fn prop_chain_endpoints(kind in prop::sample::select(vec![
        TargetType::Account,
        TargetType::DistributionList,
        TargetType::Server,
        TargetType::Cos,
    ])) {
        let directory = fixture();
        let entry = match kind {
            TargetType::Account => directory.resolve(kind, Some("u-alice")).unwrap(),
            TargetType::DistributionList => directory.resolve(kind, Some("g-social")).unwrap(),
            TargetType::Server => directory.resolve(kind, Some("s-mail1")).unwrap(),
            _ => directory.resolve(TargetType::Cos, Some("cos-standard")).unwrap(),
        };
        let chain = directory.ancestor_chain(&entry).unwrap();
        prop_assert_eq!(chain[0].entries[0].id.clone(), entry.id);
        let last = chain.last().unwrap();
        prop_assert_eq!(last.entries[0].kind, TargetType::GlobalConfig);
    }
}
