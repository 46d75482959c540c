//! Per-UID network permissions and the derived privileged-user set.

use std::collections::BTreeSet;

use tracing::debug;

use super::{FirewallError, Result};
use crate::store::{SharedMap, StoreError, WriteMode};
use crate::types::{PermissionMask, Uid, AID_ROOT, AID_SYSTEM};

/// Wire value meaning "the package is gone".
pub const PERMISSION_UNINSTALLED: i32 = -1;

/// Permission change requested for a batch of UIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionGrant {
    /// Forget the UIDs entirely.
    Uninstalled,
    /// Replace the UIDs' stored mask.
    Mask(PermissionMask),
}

impl TryFrom<i32> for PermissionGrant {
    type Error = FirewallError;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        if value == PERMISSION_UNINSTALLED {
            return Ok(Self::Uninstalled);
        }
        u8::try_from(value)
            .ok()
            .and_then(PermissionMask::from_bits)
            .map(Self::Mask)
            .ok_or_else(|| FirewallError::InvalidArgument(format!("unknown permission {value}")))
    }
}

/// Owns the UID permission table and the set of UIDs allowed to update
/// device-wide statistics.
///
/// The set always equals the UIDs whose stored mask holds
/// [`PermissionMask::UPDATE_DEVICE_STATS`].
pub struct PermissionRegistry {
    permission_map: SharedMap<Uid, PermissionMask>,
    privileged: BTreeSet<Uid>,
}

impl PermissionRegistry {
    /// Wrap a permission table handle with an empty privileged set.
    pub fn new(permission_map: SharedMap<Uid, PermissionMask>) -> Self {
        Self {
            permission_map,
            privileged: BTreeSet::new(),
        }
    }

    /// The underlying table, for diagnostics.
    pub fn permission_map(&self) -> &SharedMap<Uid, PermissionMask> {
        &self.permission_map
    }

    /// UIDs currently holding the update-device-stats permission.
    pub fn privileged_users(&self) -> &BTreeSet<Uid> {
        &self.privileged
    }

    /// Whether `uid` may act on other UIDs' accounting state.
    pub fn has_update_device_stats_permission(&self, uid: Uid) -> bool {
        uid == AID_ROOT || uid == AID_SYSTEM || self.privileged.contains(&uid)
    }

    /// Apply `grant` to each of `uids`, stopping at the first table failure.
    ///
    /// Internet-only grants are not stored: internet access is enforced
    /// elsewhere, so such calls change nothing here.
    ///
    /// # Errors
    ///
    /// [`FirewallError::StoreUnavailable`] on the first failing write or delete.
    pub fn set_permissions(&mut self, grant: PermissionGrant, uids: &[Uid]) -> Result<()> {
        match grant {
            PermissionGrant::Uninstalled => {
                for uid in uids {
                    match self.permission_map.delete(uid) {
                        Ok(()) | Err(StoreError::NotFound) => {}
                        Err(e) => return Err(FirewallError::StoreUnavailable(e)),
                    }
                    self.privileged.remove(uid);
                    debug!(uid, "removed permissions for uninstalled uid");
                }
            }
            PermissionGrant::Mask(mask) if mask == PermissionMask::INTERNET => {
                debug!(count = uids.len(), "internet-only grant, nothing to store");
            }
            PermissionGrant::Mask(mask) => {
                let privileged = mask.contains(PermissionMask::UPDATE_DEVICE_STATS);
                for uid in uids {
                    self.permission_map.write(uid, &mask, WriteMode::Upsert)?;
                    if privileged {
                        self.privileged.insert(*uid);
                    } else {
                        self.privileged.remove(uid);
                    }
                    debug!(uid, permissions = %mask, "stored permissions");
                }
            }
        }
        Ok(())
    }
}
