//! Legacy penalty box / happy box updates.

use trafficd::firewall::FirewallError;
use trafficd::types::{MatchOp, MatchType, UidMatches};

use crate::support::harness;

#[test]
fn penalty_box_insert_and_delete() {
    let h = harness();
    let tc = &h.controller;
    tc.update_uid_match(&[1000, 1001], MatchType::PenaltyBox, MatchOp::Insert)
        .expect("insert");
    for uid in [1000, 1001] {
        let v = h.owner_record(uid).expect("record");
        assert_eq!(v.rule, UidMatches::only(MatchType::PenaltyBox));
        assert_eq!(v.iif, 0);
    }

    tc.update_uid_match(&[1000, 1001], MatchType::PenaltyBox, MatchOp::Delete)
        .expect("delete");
    assert_eq!(h.owner_len(), 0);
}

#[test]
fn happy_and_penalty_box_coexist() {
    let h = harness();
    let tc = &h.controller;
    tc.update_uid_match(&[1000], MatchType::HappyBox, MatchOp::Insert)
        .expect("happy");
    tc.update_uid_match(&[1000], MatchType::PenaltyBox, MatchOp::Insert)
        .expect("penalty");
    let both: UidMatches = [MatchType::HappyBox, MatchType::PenaltyBox].into_iter().collect();
    assert_eq!(h.owner_record(1000).map(|v| v.rule), Some(both));

    tc.update_uid_match(&[1000], MatchType::HappyBox, MatchOp::Delete)
        .expect("drop happy");
    assert_eq!(
        h.owner_record(1000).map(|v| v.rule),
        Some(UidMatches::only(MatchType::PenaltyBox))
    );
}

#[test]
fn delete_without_bit_is_noop() {
    let h = harness();
    let tc = &h.controller;
    tc.update_uid_match(&[1000], MatchType::HappyBox, MatchOp::Insert)
        .expect("happy");
    tc.update_uid_match(&[1000], MatchType::PenaltyBox, MatchOp::Delete)
        .expect("record exists without the bit");
    assert_eq!(
        h.owner_record(1000).map(|v| v.rule),
        Some(UidMatches::only(MatchType::HappyBox))
    );
}

#[test]
fn delete_without_record_aborts_batch() {
    let h = harness();
    let tc = &h.controller;
    tc.update_uid_match(&[1000, 1002], MatchType::PenaltyBox, MatchOp::Insert)
        .expect("insert");

    let err = tc
        .update_uid_match(&[1000, 1001, 1002], MatchType::PenaltyBox, MatchOp::Delete)
        .expect_err("1001 has no record");
    assert!(matches!(err, FirewallError::NotFound(_)));
    assert!(h.owner_record(1000).is_none(), "processed before the failure");
    assert!(h.owner_record(1002).is_some(), "not reached");
}
