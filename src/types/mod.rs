//! Shared data model for the per-UID policy tables.
//!
//! Values in this module mirror the fixed layouts shared with the in-kernel
//! packet filter: a [`UidOwnerValue`] per UID in the owner table, a
//! [`PermissionMask`] per UID in the permission table, and a [`UidTagValue`]
//! per socket cookie in the tagging table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Linux user id of an application.
pub type Uid = u32;

/// Per-socket identifier assigned by the kernel.
pub type Cookie = u64;

/// Root user id.
pub const AID_ROOT: Uid = 0;

/// System server user id.
pub const AID_SYSTEM: Uid = 1000;

// ── Match types ─────────────────────────────────────────────────

/// One independently toggled rule bit in a [`UidOwnerValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MatchType {
    /// Legacy allowlist ("happy box") membership.
    HappyBox,
    /// Legacy denylist ("penalty box") membership.
    PenaltyBox,
    /// Member of the dozable chain.
    Dozable,
    /// Member of the standby chain.
    Standby,
    /// Member of the powersave chain.
    Powersave,
    /// Member of the restricted chain.
    Restricted,
    /// Member of the low-power-standby chain.
    LowPowerStandby,
    /// Traffic restricted to a single incoming interface.
    Iif,
    /// Traffic must go through the lockdown VPN.
    LockdownVpn,
    /// Member of the first vendor deny chain.
    OemDeny1,
    /// Member of the second vendor deny chain.
    OemDeny2,
    /// Member of the third vendor deny chain.
    OemDeny3,
}

impl MatchType {
    /// Every match type in bit order.
    pub const ALL: [MatchType; 12] = [
        MatchType::HappyBox,
        MatchType::PenaltyBox,
        MatchType::Dozable,
        MatchType::Standby,
        MatchType::Powersave,
        MatchType::Restricted,
        MatchType::LowPowerStandby,
        MatchType::Iif,
        MatchType::LockdownVpn,
        MatchType::OemDeny1,
        MatchType::OemDeny2,
        MatchType::OemDeny3,
    ];

    /// The bit this match occupies in the shared rule word.
    pub const fn bit(self) -> u32 {
        match self {
            Self::HappyBox => 0x001,
            Self::PenaltyBox => 0x002,
            Self::Dozable => 0x004,
            Self::Standby => 0x008,
            Self::Powersave => 0x010,
            Self::Restricted => 0x020,
            Self::LowPowerStandby => 0x040,
            Self::Iif => 0x080,
            Self::LockdownVpn => 0x100,
            Self::OemDeny1 => 0x200,
            Self::OemDeny2 => 0x400,
            Self::OemDeny3 => 0x800,
        }
    }

    /// Canonical name used in diagnostic output.
    pub const fn name(self) -> &'static str {
        match self {
            Self::HappyBox => "HAPPY_BOX_MATCH",
            Self::PenaltyBox => "PENALTY_BOX_MATCH",
            Self::Dozable => "DOZABLE_MATCH",
            Self::Standby => "STANDBY_MATCH",
            Self::Powersave => "POWERSAVE_MATCH",
            Self::Restricted => "RESTRICTED_MATCH",
            Self::LowPowerStandby => "LOW_POWER_STANDBY_MATCH",
            Self::Iif => "IIF_MATCH",
            Self::LockdownVpn => "LOCKDOWN_VPN_MATCH",
            Self::OemDeny1 => "OEM_DENY_1_MATCH",
            Self::OemDeny2 => "OEM_DENY_2_MATCH",
            Self::OemDeny3 => "OEM_DENY_3_MATCH",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of [`MatchType`]s stored as the kernel-visible rule word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UidMatches(u32);

impl UidMatches {
    /// The empty set.
    pub const EMPTY: UidMatches = UidMatches(0);

    /// Build a set holding exactly one match.
    pub const fn only(m: MatchType) -> Self {
        Self(m.bit())
    }

    /// Raw rule word as seen by the kernel program.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether `m` is part of the set.
    pub const fn contains(self, m: MatchType) -> bool {
        self.0 & m.bit() != 0
    }

    /// Whether no match is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Copy of the set with `m` added.
    #[must_use]
    pub const fn with(self, m: MatchType) -> Self {
        Self(self.0 | m.bit())
    }

    /// Copy of the set with `m` removed.
    #[must_use]
    pub const fn without(self, m: MatchType) -> Self {
        Self(self.0 & !m.bit())
    }

    /// Iterate the members in bit order.
    pub fn iter(self) -> impl Iterator<Item = MatchType> {
        MatchType::ALL
            .into_iter()
            .filter(move |m| self.contains(*m))
    }
}

impl FromIterator<MatchType> for UidMatches {
    fn from_iter<I: IntoIterator<Item = MatchType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl fmt::Display for UidMatches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for m in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(m.name())?;
            first = false;
        }
        Ok(())
    }
}

// ── Table values ────────────────────────────────────────────────

/// Owner-table record for one UID.
///
/// A record whose `rule` is empty is never stored; the entry is deleted instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidOwnerValue {
    /// Allowed incoming interface index. Only read while [`MatchType::Iif`] is
    /// set; `0` is the wildcard.
    pub iif: u32,
    /// Rule bits applied to this UID.
    pub rule: UidMatches,
}

/// Tagging-table record for one socket cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidTagValue {
    /// Owner of the traffic.
    pub uid: Uid,
    /// Application-supplied accounting tag.
    pub tag: u32,
}

/// Network permission bits stored in the permission table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMask(u8);

impl PermissionMask {
    /// No permission, internet revoked.
    pub const NONE: PermissionMask = PermissionMask(0);
    /// Plain internet access.
    pub const INTERNET: PermissionMask = PermissionMask(0x04);
    /// Allowed to report and update device-wide traffic statistics.
    pub const UPDATE_DEVICE_STATS: PermissionMask = PermissionMask(0x08);

    const KNOWN: u8 = Self::INTERNET.0 | Self::UPDATE_DEVICE_STATS.0;

    /// Build a mask from raw bits, rejecting unknown bits.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::KNOWN != 0 {
            return None;
        }
        Some(Self(bits))
    }

    /// Raw stored byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is present.
    pub const fn contains(self, other: PermissionMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combine two masks.
    #[must_use]
    pub const fn union(self, other: PermissionMask) -> Self {
        Self(self.0 | other.0)
    }
}

impl fmt::Display for PermissionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("PERMISSION_NONE");
        }
        let mut names = Vec::new();
        if self.contains(Self::INTERNET) {
            names.push("BPF_PERMISSION_INTERNET");
        }
        if self.contains(Self::UPDATE_DEVICE_STATS) {
            names.push("BPF_PERMISSION_UPDATE_DEVICE_STATS");
        }
        f.write_str(&names.join(" "))
    }
}

// ── Policy vocabulary ───────────────────────────────────────────

/// How presence of a UID's bit in a chain is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FirewallType {
    /// Presence of the bit permits traffic.
    Allowlist,
    /// Presence of the bit blocks traffic.
    Denylist,
}

impl fmt::Display for FirewallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowlist => f.write_str("ALLOWLIST"),
            Self::Denylist => f.write_str("DENYLIST"),
        }
    }
}

/// Requested outcome for a UID on a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallRule {
    /// Let the UID's traffic through.
    Allow,
    /// Block the UID's traffic.
    Deny,
}

/// Direction of a legacy per-UID match update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    /// Add the match to the UID's record.
    Insert,
    /// Remove the match from the UID's record.
    Delete,
}
