//! Coordinator for the policy tables.
//!
//! One [`TrafficController`] is built at startup from injected table handles.
//! Every owner-table, permission-table and counter-set mutation runs under a
//! single policy lock for its full read-modify-write sequence. The cookie-tag
//! table is outside that lock: it is shared with the socket monitor and no
//! invariant ties it to the policy tables.

pub mod dump;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::MapsConfig;
use crate::firewall::{
    ChainRuleEngine, ChildChain, FirewallError, PermissionGrant, PermissionRegistry, Result,
};
use crate::store::{InMemoryMap, SharedMap, StoreError, WriteMode};
use crate::types::{
    Cookie, FirewallRule, FirewallType, MatchOp, MatchType, PermissionMask, Uid, UidOwnerValue,
    UidTagValue,
};

pub use dump::{DumpReport, TableDump};

/// Counter set used when a UID has no entry.
pub const DEFAULT_COUNTERSET: u8 = 0;

/// First counter set value that is not selectable.
pub const OVERFLOW_COUNTERSET: u8 = 2;

/// Table handles the controller is built from.
#[derive(Clone)]
pub struct ControllerMaps {
    /// UID → owner rules.
    pub uid_owner: SharedMap<Uid, UidOwnerValue>,
    /// UID → network permissions.
    pub uid_permission: SharedMap<Uid, PermissionMask>,
    /// Socket cookie → `{uid, tag}`.
    pub cookie_tag: SharedMap<Cookie, UidTagValue>,
    /// UID → active counter set.
    pub uid_counter_set: SharedMap<Uid, u8>,
}

impl ControllerMaps {
    /// Fresh in-memory tables sized from `config`.
    pub fn in_memory(config: &MapsConfig) -> Self {
        let uid_owner: InMemoryMap<Uid, UidOwnerValue> =
            InMemoryMap::new("uid_owner_map", config.uid_owner_capacity);
        let uid_permission: InMemoryMap<Uid, PermissionMask> =
            InMemoryMap::new("uid_permission_map", config.uid_permission_capacity);
        let cookie_tag: InMemoryMap<Cookie, UidTagValue> =
            InMemoryMap::new("cookie_tag_map", config.cookie_tag_capacity);
        let uid_counter_set: InMemoryMap<Uid, u8> =
            InMemoryMap::new("uid_counter_set_map", config.uid_counter_set_capacity);
        Self {
            uid_owner: Arc::new(uid_owner),
            uid_permission: Arc::new(uid_permission),
            cookie_tag: Arc::new(cookie_tag),
            uid_counter_set: Arc::new(uid_counter_set),
        }
    }
}

/// State guarded by the policy lock.
pub(crate) struct PolicyState {
    pub(crate) rules: ChainRuleEngine,
    pub(crate) permissions: PermissionRegistry,
    pub(crate) counter_sets: SharedMap<Uid, u8>,
}

/// Entry point for every policy change requested by the RPC layer.
pub struct TrafficController {
    policy: Mutex<PolicyState>,
    cookie_tag: SharedMap<Cookie, UidTagValue>,
}

impl TrafficController {
    /// Build a controller over the given tables.
    pub fn new(maps: ControllerMaps) -> Self {
        Self {
            policy: Mutex::new(PolicyState {
                rules: ChainRuleEngine::new(maps.uid_owner),
                permissions: PermissionRegistry::new(maps.uid_permission),
                counter_sets: maps.uid_counter_set,
            }),
            cookie_tag: maps.cookie_tag,
        }
    }

    /// Handle to the cookie-tag table, shared with the socket monitor.
    pub fn cookie_tag_map(&self) -> SharedMap<Cookie, UidTagValue> {
        Arc::clone(&self.cookie_tag)
    }

    fn with_policy<R>(&self, f: impl FnOnce(&mut PolicyState) -> Result<R>) -> Result<R> {
        let mut state = self
            .policy
            .lock()
            .map_err(|e| FirewallError::LockPoisoned(e.to_string()))?;
        f(&mut state)
    }

    // ── Owner rules ──

    /// Allow or deny `uid` on `chain`.
    ///
    /// # Errors
    ///
    /// See [`ChainRuleEngine::change_rule_for_chain`].
    pub fn change_uid_owner_rule(
        &self,
        chain: ChildChain,
        uid: Uid,
        rule: FirewallRule,
        firewall_type: FirewallType,
    ) -> Result<()> {
        self.with_policy(|p| {
            p.rules
                .change_rule_for_chain(chain, uid, rule, firewall_type)
        })
        .inspect_err(|e| warn!(%chain, uid, ?rule, error = %e, "change owner rule failed"))
    }

    /// Replace the membership of the chain named `chain_name`.
    ///
    /// # Errors
    ///
    /// See [`ChainRuleEngine::replace_chain_membership`].
    pub fn replace_uid_owner_map(
        &self,
        chain_name: &str,
        is_allowlist: bool,
        uids: &[Uid],
    ) -> Result<()> {
        self.with_policy(|p| {
            p.rules
                .replace_chain_membership(chain_name, is_allowlist, uids)
        })
        .inspect_err(|e| warn!(chain = chain_name, error = %e, "replace owner map failed"))
    }

    /// Add or remove a legacy match for each of `uids`.
    ///
    /// # Errors
    ///
    /// See [`ChainRuleEngine::update_uid_match`].
    pub fn update_uid_match(&self, uids: &[Uid], match_type: MatchType, op: MatchOp) -> Result<()> {
        self.with_policy(|p| p.rules.update_uid_match(uids, match_type, op))
            .inspect_err(|e| warn!(%match_type, ?op, error = %e, "update uid match failed"))
    }

    /// Restrict `uids` to incoming interface `iif`.
    ///
    /// # Errors
    ///
    /// The first table failure.
    pub fn add_uid_interface_rules(&self, iif: u32, uids: &[Uid]) -> Result<()> {
        self.with_policy(|p| p.rules.set_interface_rule(iif, uids))
            .inspect_err(|e| warn!(iif, error = %e, "add interface rules failed"))
    }

    /// Remove the interface restriction from `uids`.
    ///
    /// # Errors
    ///
    /// The first table failure; missing rules are not failures.
    pub fn remove_uid_interface_rules(&self, uids: &[Uid]) -> Result<()> {
        self.with_policy(|p| p.rules.clear_interface_rule(uids))
            .inspect_err(|e| warn!(error = %e, "remove interface rules failed"))
    }

    /// Toggle VPN lockdown for `uid`.
    ///
    /// # Errors
    ///
    /// Table failures; redundant toggles are not failures.
    pub fn update_uid_lockdown_rule(&self, uid: Uid, add: bool) -> Result<()> {
        self.with_policy(|p| p.rules.set_lockdown_rule(uid, add))
            .inspect_err(|e| warn!(uid, add, error = %e, "update lockdown rule failed"))
    }

    /// Static list semantics of `chain`. Never fails.
    pub fn firewall_type(&self, chain: ChildChain) -> FirewallType {
        chain.firewall_type()
    }

    // ── Permissions ──

    /// Apply `grant` to each of `uids`.
    ///
    /// # Errors
    ///
    /// See [`PermissionRegistry::set_permissions`].
    pub fn set_permission_for_uids(&self, grant: PermissionGrant, uids: &[Uid]) -> Result<()> {
        self.with_policy(|p| p.permissions.set_permissions(grant, uids))
            .inspect_err(|e| warn!(?grant, error = %e, "set permissions failed"))
    }

    /// Snapshot of the privileged-user set.
    ///
    /// # Errors
    ///
    /// [`FirewallError::LockPoisoned`] only.
    pub fn privileged_users(&self) -> Result<BTreeSet<Uid>> {
        self.with_policy(|p| Ok(p.permissions.privileged_users().clone()))
    }

    /// Whether `uid` may act on other UIDs' accounting state.
    ///
    /// # Errors
    ///
    /// [`FirewallError::LockPoisoned`] only.
    pub fn has_update_device_stats_permission(&self, uid: Uid) -> Result<bool> {
        self.with_policy(|p| {
            Ok(p.permissions.has_update_device_stats_permission(uid))
        })
    }

    // ── Accounting ──

    /// Associate socket `cookie` with `{uid, tag}`.
    ///
    /// Tagging on behalf of another UID requires the update-device-stats
    /// permission. The check runs under the policy lock; the tag write does not.
    ///
    /// # Errors
    ///
    /// [`FirewallError::PermissionDenied`] or a table failure.
    pub fn tag_socket(&self, cookie: Cookie, tag: u32, uid: Uid, calling_uid: Uid) -> Result<()> {
        if uid != calling_uid && !self.has_update_device_stats_permission(calling_uid)? {
            return Err(FirewallError::PermissionDenied { calling_uid, uid });
        }
        self.cookie_tag
            .write(&cookie, &UidTagValue { uid, tag }, WriteMode::Upsert)?;
        debug!(cookie, uid, tag, "tagged socket");
        Ok(())
    }

    /// Drop the tag of socket `cookie`.
    ///
    /// # Errors
    ///
    /// [`FirewallError::NotFound`] when the cookie is untagged.
    pub fn untag_socket(&self, cookie: Cookie) -> Result<()> {
        self.cookie_tag.delete(&cookie)?;
        debug!(cookie, "untagged socket");
        Ok(())
    }

    /// Select the counter set `uid`'s traffic is accounted under.
    ///
    /// [`DEFAULT_COUNTERSET`] removes the entry.
    ///
    /// # Errors
    ///
    /// [`FirewallError::PermissionDenied`] unless `calling_uid` is privileged,
    /// [`FirewallError::InvalidArgument`] for an out-of-range set.
    pub fn set_counter_set(&self, counter_set: u8, uid: Uid, calling_uid: Uid) -> Result<()> {
        self.with_policy(|p| {
            let permissions = &p.permissions;
            if !permissions.has_update_device_stats_permission(calling_uid) {
                return Err(FirewallError::PermissionDenied { calling_uid, uid });
            }
            if counter_set >= OVERFLOW_COUNTERSET {
                return Err(FirewallError::InvalidArgument(format!(
                    "counter set {counter_set} out of range"
                )));
            }
            if counter_set == DEFAULT_COUNTERSET {
                match p.counter_sets.delete(&uid) {
                    Ok(()) | Err(StoreError::NotFound) => {}
                    Err(e) => return Err(FirewallError::StoreUnavailable(e)),
                }
            } else {
                p.counter_sets.write(&uid, &counter_set, WriteMode::Upsert)?;
            }
            info!(uid, counter_set, "counter set changed");
            Ok(())
        })
    }

    /// Render every table for diagnostics. Never fails; broken tables are
    /// reported inline.
    pub fn dump(&self) -> DumpReport {
        dump::collect(self)
    }

    pub(crate) fn policy_lock(
        &self,
    ) -> std::result::Result<std::sync::MutexGuard<'_, PolicyState>, String> {
        self.policy.lock().map_err(|e| e.to_string())
    }
}
