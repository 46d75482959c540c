//! Per-UID firewall policy: chain rules, interface rules, lockdown and
//! network permissions.
//!
//! [`rules::ChainRuleEngine`] owns the owner table, [`permissions::PermissionRegistry`]
//! owns the permission table and the privileged-user set. Neither locks on its
//! own; [`crate::controller::TrafficController`] serializes every call.

pub mod chain;
pub mod permissions;
pub mod rules;

use thiserror::Error;

use crate::store::StoreError;
use crate::types::Uid;

pub use chain::{firewall_type_for_id, ChainRule, ChildChain, CHAIN_RULES};
pub use permissions::{PermissionGrant, PermissionRegistry};
pub use rules::ChainRuleEngine;

/// Error returned by policy mutations.
#[derive(Debug, Error)]
pub enum FirewallError {
    /// The caller supplied an unrecognized chain, permission or value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A clear or remove targeted a rule that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The calling UID may not act on behalf of another UID.
    #[error("uid {calling_uid} is not allowed to act for uid {uid}")]
    PermissionDenied {
        /// UID making the request.
        calling_uid: Uid,
        /// UID the request targets.
        uid: Uid,
    },

    /// The backing table failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// A previous holder of the policy lock panicked.
    #[error("policy lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<StoreError> for FirewallError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound("entry missing from table".to_owned()),
            other => Self::StoreUnavailable(other),
        }
    }
}

/// Result alias for policy operations.
pub type Result<T> = std::result::Result<T, FirewallError>;
