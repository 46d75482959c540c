//! Permission table and privileged-user set.

use std::collections::BTreeSet;

use trafficd::firewall::PermissionGrant;
use trafficd::types::{PermissionMask, AID_ROOT, AID_SYSTEM};

use crate::support::{harness, Harness};

fn grant(bits: i32) -> PermissionGrant {
    match PermissionGrant::try_from(bits) {
        Ok(g) => g,
        Err(err) => panic!("grant {bits} should parse: {err}"),
    }
}

fn privileged(h: &Harness) -> BTreeSet<u32> {
    h.controller.privileged_users().expect("privileged users")
}

#[test]
fn grant_and_revoke_update_device_stats() {
    let h = harness();
    let tc = &h.controller;
    let stats = PermissionGrant::Mask(PermissionMask::UPDATE_DEVICE_STATS);

    tc.set_permission_for_uids(stats, &[10086, 10087])
        .expect("grant");
    assert_eq!(privileged(&h), BTreeSet::from([10086, 10087]));
    assert_eq!(
        h.permission_record(10086),
        Some(PermissionMask::UPDATE_DEVICE_STATS)
    );

    tc.set_permission_for_uids(stats, &[10086])
        .expect("grant again");
    assert_eq!(privileged(&h), BTreeSet::from([10086, 10087]));

    tc.set_permission_for_uids(PermissionGrant::Mask(PermissionMask::NONE), &[10086])
        .expect("revoke");
    assert_eq!(privileged(&h), BTreeSet::from([10087]));
    assert_eq!(h.permission_record(10086), Some(PermissionMask::NONE));
}

#[test]
fn masks_are_replaced_not_merged() {
    let h = harness();
    let tc = &h.controller;
    let both = PermissionMask::INTERNET.union(PermissionMask::UPDATE_DEVICE_STATS);

    tc.set_permission_for_uids(PermissionGrant::Mask(both), &[10086])
        .expect("both");
    assert_eq!(h.permission_record(10086), Some(both));
    assert!(tc.has_update_device_stats_permission(10086).expect("check"));

    tc.set_permission_for_uids(grant(0), &[10086])
        .expect("none");
    assert_eq!(h.permission_record(10086), Some(PermissionMask::NONE));
    assert!(!tc.has_update_device_stats_permission(10086).expect("check"));
}

#[test]
fn uninstalled_removes_record_and_membership() {
    let h = harness();
    let tc = &h.controller;
    tc.set_permission_for_uids(grant(0x0c), &[10086, 10087])
        .expect("grant");

    tc.set_permission_for_uids(grant(-1), &[10086, 99999])
        .expect("uninstall, missing uid is fine");
    assert!(h.permission_record(10086).is_none());
    assert_eq!(privileged(&h), BTreeSet::from([10087]));
}

#[test]
fn internet_only_grants_change_nothing() {
    let h = harness();
    let tc = &h.controller;
    tc.set_permission_for_uids(grant(0x08), &[10086])
        .expect("grant");

    tc.set_permission_for_uids(grant(0x04), &[10086, 10087])
        .expect("internet only");
    assert_eq!(
        h.permission_record(10086),
        Some(PermissionMask::UPDATE_DEVICE_STATS)
    );
    assert!(h.permission_record(10087).is_none());
    assert_eq!(privileged(&h), BTreeSet::from([10086]));
}

#[test]
fn set_tracks_stored_masks() {
    let h = harness();
    let tc = &h.controller;
    let steps = [
        (0x08, vec![1, 2, 3]),
        (0x04, vec![2]),
        (0x00, vec![2]),
        (-1, vec![3]),
        (0x0c, vec![4]),
    ];
    for (bits, uids) in steps {
        tc.set_permission_for_uids(grant(bits), &uids)
            .expect("step");
    }
    let expected: BTreeSet<u32> = (1..=4)
        .filter(|uid| {
            h.permission_record(*uid)
                .is_some_and(|m| m.contains(PermissionMask::UPDATE_DEVICE_STATS))
        })
        .collect();
    assert_eq!(privileged(&h), expected);
    assert_eq!(expected, BTreeSet::from([1, 4]));
}

#[test]
fn root_and_system_are_always_privileged() {
    let h = harness();
    let allowed = |uid| {
        h.controller
            .has_update_device_stats_permission(uid)
            .expect("permission check")
    };
    assert!(allowed(AID_ROOT));
    assert!(allowed(AID_SYSTEM));
    assert!(!allowed(10086));
}
