//! # sluice-io: Topology Loading
//!
//! Reads the declarative network topology file (JSON) into a
//! [`sluice_core::Network`], applying the documented defaults and refusing to
//! hand back a network that fails structural validation. The topology file is
//! the single source of truth for the physical system; it is loaded once at
//! startup and the resulting network is immutable.
//!
//! The [`fixtures`] module builds the canonical demonstration network used by
//! integration tests across the workspace.

pub mod fixtures;
pub mod topology;

pub use topology::{load_network, load_network_from_str, TopologyFile};
