//! Rule composition over the shared per-UID owner table.
//!
//! Every operation is a single-bit set, a single-bit clear, or an interface
//! index overwrite on one UID's [`UidOwnerValue`]. A record whose rule word
//! becomes empty is deleted, never stored.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use tracing::{debug, info};

use super::chain::ChildChain;
use super::{FirewallError, Result};
use crate::store::{SharedMap, WriteMode};
use crate::types::{
    FirewallRule, FirewallType, MatchOp, MatchType, Uid, UidMatches, UidOwnerValue,
};

/// What a single-bit clear found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    /// The bit was set and has been cleared.
    Cleared,
    /// The record exists but never had the bit.
    NotSet,
}

/// Owns the UID owner table.
///
/// Not internally synchronized: callers hold the controller's policy lock for
/// the whole read-modify-write of each operation.
pub struct ChainRuleEngine {
    owner_map: SharedMap<Uid, UidOwnerValue>,
}

impl ChainRuleEngine {
    /// Wrap an owner table handle.
    pub fn new(owner_map: SharedMap<Uid, UidOwnerValue>) -> Self {
        Self { owner_map }
    }

    /// The underlying table, for diagnostics.
    pub fn owner_map(&self) -> &SharedMap<Uid, UidOwnerValue> {
        &self.owner_map
    }

    // ── Chain-scoped operations ──

    /// Allow or deny `uid` on `chain`.
    ///
    /// `firewall_type` decides whether the action sets or clears the chain's
    /// bit; it is taken as given and not checked against the chain's own type.
    ///
    /// # Errors
    ///
    /// [`FirewallError::InvalidArgument`] for the sentinel chain,
    /// [`FirewallError::NotFound`] when clearing a rule that is not present.
    pub fn change_rule_for_chain(
        &self,
        chain: ChildChain,
        uid: Uid,
        rule: FirewallRule,
        firewall_type: FirewallType,
    ) -> Result<()> {
        let entry = chain.require_rule()?;
        self.update_owner_map_entry(entry.match_type, uid, rule, firewall_type)
    }

    /// Match-level form of [`Self::change_rule_for_chain`].
    ///
    /// # Errors
    ///
    /// [`FirewallError::NotFound`] when clearing a rule that is not present.
    pub fn update_owner_map_entry(
        &self,
        match_type: MatchType,
        uid: Uid,
        rule: FirewallRule,
        firewall_type: FirewallType,
    ) -> Result<()> {
        let sets_bit = matches!(
            (firewall_type, rule),
            (FirewallType::Allowlist, FirewallRule::Allow)
                | (FirewallType::Denylist, FirewallRule::Deny)
        );
        if sets_bit {
            return self.add_match(uid, match_type, None);
        }
        match self.remove_match(uid, match_type)? {
            Removal::Cleared => Ok(()),
            Removal::NotSet => Err(FirewallError::NotFound(format!(
                "uid {uid} has no {match_type}"
            ))),
        }
    }

    /// Make `uids` the exact membership of `chain_name`'s bit.
    ///
    /// `is_allowlist` is informational; both framings produce the same bits.
    /// Stale members are cleared first, then every listed UID gets the bit.
    /// Other bits on affected UIDs are left untouched.
    ///
    /// # Errors
    ///
    /// [`FirewallError::InvalidArgument`] for an unknown name; the first table
    /// failure otherwise, with earlier UIDs already applied.
    pub fn replace_chain_membership(
        &self,
        chain_name: &str,
        is_allowlist: bool,
        uids: &[Uid],
    ) -> Result<()> {
        let chain = ChildChain::from_name(chain_name).ok_or_else(|| {
            FirewallError::InvalidArgument(format!("unknown chain name {chain_name}"))
        })?;
        let match_type = chain.require_rule()?.match_type;
        let wanted: BTreeSet<Uid> = uids.iter().copied().collect();

        let mut stale = Vec::new();
        self.owner_map.iterate(&mut |uid, value| {
            if value.rule.contains(match_type) && !wanted.contains(uid) {
                stale.push(*uid);
            }
            ControlFlow::Continue(())
        })?;

        for uid in &stale {
            self.remove_match(*uid, match_type)?;
        }
        for uid in &wanted {
            self.add_match(*uid, match_type, None)?;
        }

        info!(
            chain = chain_name,
            is_allowlist,
            members = wanted.len(),
            removed = stale.len(),
            "replaced chain membership"
        );
        Ok(())
    }

    // ── Interface and lockdown rules ──

    /// Restrict each of `uids` to incoming interface `iif`.
    ///
    /// The stored index is overwritten unconditionally; `0` is stored like any
    /// other index.
    ///
    /// # Errors
    ///
    /// The first table failure; earlier UIDs stay applied.
    pub fn set_interface_rule(&self, iif: u32, uids: &[Uid]) -> Result<()> {
        for uid in uids {
            self.add_match(*uid, MatchType::Iif, Some(iif))?;
        }
        Ok(())
    }

    /// Drop the interface restriction from each of `uids`.
    ///
    /// UIDs without a record or without the rule are skipped.
    ///
    /// # Errors
    ///
    /// The first table failure other than a missing record.
    pub fn clear_interface_rule(&self, uids: &[Uid]) -> Result<()> {
        for uid in uids {
            match self.remove_match(*uid, MatchType::Iif) {
                Ok(_) | Err(FirewallError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Turn VPN lockdown on or off for `uid`. Idempotent in both directions.
    ///
    /// # Errors
    ///
    /// Table failures other than a missing record.
    pub fn set_lockdown_rule(&self, uid: Uid, enabled: bool) -> Result<()> {
        if enabled {
            return self.add_match(uid, MatchType::LockdownVpn, None);
        }
        match self.remove_match(uid, MatchType::LockdownVpn) {
            Ok(_) | Err(FirewallError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ── Legacy penalty box / happy box ──

    /// Add or remove `match_type` for each of `uids`, stopping at the first failure.
    ///
    /// Removing from a UID that has a record but not the bit is a no-op.
    ///
    /// # Errors
    ///
    /// [`FirewallError::NotFound`] when removing from a UID with no record.
    pub fn update_uid_match(&self, uids: &[Uid], match_type: MatchType, op: MatchOp) -> Result<()> {
        for uid in uids {
            match op {
                MatchOp::Insert => self.add_match(*uid, match_type, None)?,
                MatchOp::Delete => {
                    self.remove_match(*uid, match_type)?;
                }
            }
        }
        Ok(())
    }

    // ── Bit primitives ──

    /// Set `match_type` on `uid`, creating the record if needed.
    ///
    /// `iif` overwrites the stored interface index when given; a new record
    /// without one gets the wildcard `0`.
    fn add_match(&self, uid: Uid, match_type: MatchType, iif: Option<u32>) -> Result<()> {
        let old = self.owner_map.lookup(&uid)?.unwrap_or_default();
        let new = UidOwnerValue {
            iif: iif.unwrap_or(old.iif),
            rule: old.rule.with(match_type),
        };
        self.owner_map.write(&uid, &new, WriteMode::Upsert)?;
        debug!(uid, %match_type, iif = new.iif, rule = new.rule.bits(), "added uid match");
        Ok(())
    }

    /// Clear `match_type` on `uid`, deleting the record once no bit is left.
    ///
    /// Fails with `NotFound` when `uid` has no record; leaves the table
    /// untouched when the bit is already clear.
    fn remove_match(&self, uid: Uid, match_type: MatchType) -> Result<Removal> {
        let Some(old) = self.owner_map.lookup(&uid)? else {
            return Err(FirewallError::NotFound(format!("uid {uid} has no owner rules")));
        };
        if !old.rule.contains(match_type) {
            return Ok(Removal::NotSet);
        }

        let rule: UidMatches = old.rule.without(match_type);
        if rule.is_empty() {
            self.owner_map.delete(&uid)?;
            debug!(uid, %match_type, "removed last uid match, record deleted");
        } else {
            let new = UidOwnerValue { iif: old.iif, rule };
            self.owner_map.write(&uid, &new, WriteMode::UpdateOnly)?;
            debug!(uid, %match_type, rule = rule.bits(), "removed uid match");
        }
        Ok(Removal::Cleared)
    }
}
