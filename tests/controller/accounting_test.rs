//! Socket tagging and counter-set selection.

use trafficd::controller::{DEFAULT_COUNTERSET, OVERFLOW_COUNTERSET};
use trafficd::firewall::{FirewallError, PermissionGrant};
use trafficd::store::KeyValueStore;
use trafficd::types::{PermissionMask, UidTagValue, AID_SYSTEM};

use crate::support::harness;

const APP_UID: u32 = 10086;
const OTHER_UID: u32 = 10087;

#[test]
fn tag_own_socket() {
    let h = harness();
    h.controller
        .tag_socket(1, 0x4242, APP_UID, APP_UID)
        .expect("tag own socket");
    assert_eq!(
        h.cookie_tag.read(&1).expect("tag stored"),
        UidTagValue {
            uid: APP_UID,
            tag: 0x4242
        }
    );

    h.controller.untag_socket(1).expect("untag");
    assert!(h.cookie_tag.is_empty().expect("empty"));
}

#[test]
fn tag_for_other_uid_requires_permission() {
    let h = harness();
    let tc = &h.controller;
    let err = tc
        .tag_socket(1, 7, OTHER_UID, APP_UID)
        .expect_err("unprivileged caller");
    assert!(matches!(
        err,
        FirewallError::PermissionDenied {
            calling_uid: APP_UID,
            uid: OTHER_UID
        }
    ));
    assert!(h.cookie_tag.is_empty().expect("empty"));

    tc.set_permission_for_uids(
        PermissionGrant::Mask(PermissionMask::UPDATE_DEVICE_STATS),
        &[APP_UID],
    )
    .expect("grant");
    tc.tag_socket(1, 7, OTHER_UID, APP_UID)
        .expect("privileged caller");
    tc.tag_socket(2, 7, OTHER_UID, AID_SYSTEM)
        .expect("system caller");
    assert_eq!(h.cookie_tag.len().expect("len"), 2);
}

#[test]
fn retag_overwrites() {
    let h = harness();
    h.controller
        .tag_socket(9, 1, APP_UID, APP_UID)
        .expect("tag");
    h.controller
        .tag_socket(9, 2, APP_UID, APP_UID)
        .expect("retag");
    assert_eq!(h.cookie_tag.read(&9).expect("read").tag, 2);
}

#[test]
fn untag_unknown_cookie_is_not_found() {
    let h = harness();
    let err = h.controller.untag_socket(404).expect_err("unknown cookie");
    assert!(matches!(err, FirewallError::NotFound(_)));
}

#[test]
fn counter_set_lifecycle() {
    let h = harness();
    let tc = &h.controller;
    tc.set_counter_set(1, APP_UID, AID_SYSTEM)
        .expect("select set 1");
    assert_eq!(h.counter_set.read(&APP_UID).expect("stored"), 1);

    tc.set_counter_set(DEFAULT_COUNTERSET, APP_UID, AID_SYSTEM)
        .expect("back to default");
    assert!(h.counter_set.lookup(&APP_UID).expect("lookup").is_none());

    tc.set_counter_set(DEFAULT_COUNTERSET, APP_UID, AID_SYSTEM)
        .expect("default on a missing entry is fine");
}

#[test]
fn counter_set_rejects_bad_calls() {
    let h = harness();
    let tc = &h.controller;
    let err = tc
        .set_counter_set(1, APP_UID, APP_UID)
        .expect_err("unprivileged");
    assert!(matches!(err, FirewallError::PermissionDenied { .. }));

    let err = tc
        .set_counter_set(OVERFLOW_COUNTERSET, APP_UID, AID_SYSTEM)
        .expect_err("out of range");
    assert!(matches!(err, FirewallError::InvalidArgument(_)));
    assert!(h.counter_set.is_empty().expect("empty"));
}
