//! Static chain table.
//!
//! The mutation path and the reporting path both consult [`CHAIN_RULES`];
//! there is no other chain-to-bit mapping in the crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::FirewallError;
use crate::types::{FirewallType, MatchType};

/// Firewall child chain as addressed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildChain {
    /// Sentinel: no chain.
    None,
    /// Devices in doze; allowlist.
    Dozable,
    /// Apps in standby; denylist.
    Standby,
    /// Battery saver; allowlist.
    Powersave,
    /// Restricted networking mode; allowlist.
    Restricted,
    /// Low power standby; allowlist.
    LowPowerStandby,
    /// First vendor chain; denylist.
    OemDeny1,
    /// Second vendor chain; denylist.
    OemDeny2,
    /// Third vendor chain; denylist.
    OemDeny3,
}

/// Static facts about one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainRule {
    /// The chain.
    pub chain: ChildChain,
    /// Wire identifier.
    pub id: i32,
    /// Name accepted by bulk replacement.
    pub name: &'static str,
    /// Bit carried by member UIDs.
    pub match_type: MatchType,
    /// List semantics of the chain.
    pub firewall_type: FirewallType,
}

/// Every real chain. [`ChildChain::None`] is deliberately absent.
pub const CHAIN_RULES: [ChainRule; 8] = [
    ChainRule {
        chain: ChildChain::Dozable,
        id: 1,
        name: "fw_dozable",
        match_type: MatchType::Dozable,
        firewall_type: FirewallType::Allowlist,
    },
    ChainRule {
        chain: ChildChain::Standby,
        id: 2,
        name: "fw_standby",
        match_type: MatchType::Standby,
        firewall_type: FirewallType::Denylist,
    },
    ChainRule {
        chain: ChildChain::Powersave,
        id: 3,
        name: "fw_powersave",
        match_type: MatchType::Powersave,
        firewall_type: FirewallType::Allowlist,
    },
    ChainRule {
        chain: ChildChain::Restricted,
        id: 4,
        name: "fw_restricted",
        match_type: MatchType::Restricted,
        firewall_type: FirewallType::Allowlist,
    },
    ChainRule {
        chain: ChildChain::LowPowerStandby,
        id: 5,
        name: "fw_low_power_standby",
        match_type: MatchType::LowPowerStandby,
        firewall_type: FirewallType::Allowlist,
    },
    ChainRule {
        chain: ChildChain::OemDeny1,
        id: 7,
        name: "fw_oem_deny_1",
        match_type: MatchType::OemDeny1,
        firewall_type: FirewallType::Denylist,
    },
    ChainRule {
        chain: ChildChain::OemDeny2,
        id: 8,
        name: "fw_oem_deny_2",
        match_type: MatchType::OemDeny2,
        firewall_type: FirewallType::Denylist,
    },
    ChainRule {
        chain: ChildChain::OemDeny3,
        id: 9,
        name: "fw_oem_deny_3",
        match_type: MatchType::OemDeny3,
        firewall_type: FirewallType::Denylist,
    },
];

impl ChildChain {
    /// Table entry for this chain; `None` for the sentinel.
    pub fn rule(self) -> Option<&'static ChainRule> {
        CHAIN_RULES.iter().find(|r| r.chain == self)
    }

    /// Table entry, or `InvalidArgument` for the sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`FirewallError::InvalidArgument`] for [`ChildChain::None`].
    pub fn require_rule(self) -> Result<&'static ChainRule, FirewallError> {
        self.rule()
            .ok_or_else(|| FirewallError::InvalidArgument(format!("unknown chain {self}")))
    }

    /// Resolve a bulk-replacement name such as `fw_dozable`.
    pub fn from_name(name: &str) -> Option<ChildChain> {
        CHAIN_RULES.iter().find(|r| r.name == name).map(|r| r.chain)
    }

    /// Wire identifier of this chain.
    pub fn id(self) -> i32 {
        self.rule().map_or(0, |r| r.id)
    }

    /// List semantics of this chain. Never fails: unknown chains are reported
    /// as [`FirewallType::Denylist`].
    pub fn firewall_type(self) -> FirewallType {
        self.rule()
            .map_or(FirewallType::Denylist, |r| r.firewall_type)
    }
}

/// List semantics for a raw wire id, defaulting to denylist.
pub fn firewall_type_for_id(id: i32) -> FirewallType {
    ChildChain::try_from(id).map_or(FirewallType::Denylist, ChildChain::firewall_type)
}

impl TryFrom<i32> for ChildChain {
    type Error = FirewallError;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        if id == 0 {
            return Ok(ChildChain::None);
        }
        CHAIN_RULES
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.chain)
            .ok_or_else(|| FirewallError::InvalidArgument(format!("unknown chain id {id}")))
    }
}

impl FromStr for ChildChain {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "none" {
            return Ok(ChildChain::None);
        }
        Self::from_name(s)
            .ok_or_else(|| FirewallError::InvalidArgument(format!("unknown chain {s}")))
    }
}

impl fmt::Display for ChildChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rule() {
            Some(r) => f.write_str(r.name),
            None => f.write_str("none"),
        }
    }
}
