//! Concurrent callers on one controller: every read-modify-write of a shared
//! owner record is serialized.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use trafficd::controller::TrafficController;
use trafficd::firewall::{ChildChain, PermissionGrant};
use trafficd::store::KeyValueStore;
use trafficd::types::FirewallRule::{self, Allow, Deny};
use trafficd::types::{MatchType, PermissionMask, UidMatches};

use crate::support::{harness, Harness};

const SHARED_UID: u32 = 10086;
const ROUNDS: usize = 2_000;

/// Set then clear `chain` for [`SHARED_UID`] `ROUNDS` times, ending set.
fn toggle(tc: &TrafficController, chain: ChildChain, set: FirewallRule, clear: FirewallRule) {
    let firewall_type = chain.firewall_type();
    for _ in 0..ROUNDS {
        tc.change_uid_owner_rule(chain, SHARED_UID, set, firewall_type)
            .expect("set rule");
        tc.change_uid_owner_rule(chain, SHARED_UID, clear, firewall_type)
            .expect("clear rule");
    }
    tc.change_uid_owner_rule(chain, SHARED_UID, set, firewall_type)
        .expect("final set");
}

#[test]
fn chain_toggles_on_one_uid_never_lose_a_bit() {
    let Harness {
        controller, owner, ..
    } = harness();
    let tc = Arc::new(controller);
    let done = Arc::new(AtomicBool::new(false));
    let empty_seen = Arc::new(AtomicUsize::new(0));

    let watcher = {
        let owner = owner.clone();
        let (done, empty_seen) = (Arc::clone(&done), Arc::clone(&empty_seen));
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                owner
                    .iterate(&mut |_, v| {
                        if v.rule.is_empty() {
                            empty_seen.fetch_add(1, Ordering::SeqCst);
                        }
                        ControlFlow::Continue(())
                    })
                    .expect("iterate owner table");
                thread::yield_now();
            }
        })
    };
    let doze = {
        let tc = Arc::clone(&tc);
        thread::spawn(move || {
            toggle(&tc, ChildChain::Dozable, Allow, Deny);
        })
    };
    let oem = {
        let tc = Arc::clone(&tc);
        thread::spawn(move || {
            toggle(&tc, ChildChain::OemDeny1, Deny, Allow);
        })
    };
    doze.join().expect("dozable thread");
    oem.join().expect("oem thread");
    done.store(true, Ordering::SeqCst);
    watcher.join().expect("watcher thread");

    let expected: UidMatches = [MatchType::Dozable, MatchType::OemDeny1].into_iter().collect();
    let record = owner
        .lookup(&SHARED_UID)
        .expect("lookup")
        .expect("shared uid keeps a record");
    assert_eq!(record.rule, expected);
    assert_eq!(
        empty_seen.load(Ordering::SeqCst),
        0,
        "all-zero record was stored"
    );
    assert_eq!(owner.len().expect("len"), 1);
}

#[test]
fn concurrent_grants_keep_privileged_set_in_step() {
    let Harness {
        controller, permission, ..
    } = harness();
    let tc = Arc::new(controller);
    let stats = PermissionGrant::Mask(PermissionMask::UPDATE_DEVICE_STATS);

    let workers: Vec<_> = [20_000u32, 20_100, 20_200, 20_300]
        .into_iter()
        .map(|base| {
            let tc = Arc::clone(&tc);
            thread::spawn(move || {
                let granted: Vec<u32> = (base..base.saturating_add(50)).collect();
                let removed: Vec<u32> = (base..base.saturating_add(25)).collect();
                for _ in 0..20 {
                    tc.set_permission_for_uids(stats, &granted).expect("grant");
                    tc.set_permission_for_uids(PermissionGrant::Uninstalled, &removed)
                        .expect("uninstall");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }

    let mut stored = BTreeSet::new();
    permission
        .iterate(&mut |uid, mask| {
            if mask.contains(PermissionMask::UPDATE_DEVICE_STATS) {
                stored.insert(*uid);
            }
            ControlFlow::Continue(())
        })
        .expect("iterate permission table");
    assert_eq!(stored.len(), 100);
    assert_eq!(tc.privileged_users().expect("privileged"), stored);
}
