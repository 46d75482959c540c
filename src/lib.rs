//! trafficd: user-space control plane for a per-UID traffic firewall.
//!
//! Composes independent per-UID policies (firewall chains, interface
//! restrictions, VPN lockdown, legacy penalty/happy boxes) into one shared
//! owner record per UID, keeps the per-UID permission table and the
//! privileged-user set in step, and removes socket tags as sockets are
//! destroyed.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod store;

pub mod controller;
pub mod firewall;
pub mod monitor;
