//! Shared fixtures: a controller over in-memory tables, with the tables kept
//! reachable for inspection.

#![allow(dead_code)]

use std::sync::Arc;

use trafficd::controller::{ControllerMaps, TrafficController};
use trafficd::store::{InMemoryMap, KeyValueStore};
use trafficd::types::{Cookie, PermissionMask, Uid, UidOwnerValue, UidTagValue};

/// Controller plus direct handles to every table it writes.
pub struct Harness {
    /// Controller under test.
    pub controller: TrafficController,
    /// UID owner table.
    pub owner: Arc<InMemoryMap<Uid, UidOwnerValue>>,
    /// UID permission table.
    pub permission: Arc<InMemoryMap<Uid, PermissionMask>>,
    /// Cookie tag table.
    pub cookie_tag: Arc<InMemoryMap<Cookie, UidTagValue>>,
    /// UID counter set table.
    pub counter_set: Arc<InMemoryMap<Uid, u8>>,
}

/// Fresh controller with room for 16k tagged sockets.
pub fn harness() -> Harness {
    harness_over(
        Arc::new(InMemoryMap::new("uid_owner_map", 1024)),
        Arc::new(InMemoryMap::new("uid_permission_map", 1024)),
    )
}

/// Controller over the given owner and permission tables, with default
/// cookie-tag and counter-set tables.
pub fn harness_over(
    owner: Arc<InMemoryMap<Uid, UidOwnerValue>>,
    permission: Arc<InMemoryMap<Uid, PermissionMask>>,
) -> Harness {
    let cookie_tag: Arc<InMemoryMap<Cookie, UidTagValue>> =
        Arc::new(InMemoryMap::new("cookie_tag_map", 16_384));
    let counter_set: Arc<InMemoryMap<Uid, u8>> =
        Arc::new(InMemoryMap::new("uid_counter_set_map", 1024));
    let controller = TrafficController::new(ControllerMaps {
        uid_owner: owner.clone(),
        uid_permission: permission.clone(),
        cookie_tag: cookie_tag.clone(),
        uid_counter_set: counter_set.clone(),
    });
    Harness {
        controller,
        owner,
        permission,
        cookie_tag,
        counter_set,
    }
}

impl Harness {
    /// Owner record of `uid`, if any.
    pub fn owner_record(&self, uid: Uid) -> Option<UidOwnerValue> {
        match self.owner.lookup(&uid) {
            Ok(v) => v,
            Err(err) => panic!("owner table lookup failed: {err}"),
        }
    }

    /// Stored permission mask of `uid`, if any.
    pub fn permission_record(&self, uid: Uid) -> Option<PermissionMask> {
        match self.permission.lookup(&uid) {
            Ok(v) => v,
            Err(err) => panic!("permission table lookup failed: {err}"),
        }
    }

    /// Number of owner records.
    pub fn owner_len(&self) -> usize {
        self.owner.len().expect("owner table length")
    }
}
