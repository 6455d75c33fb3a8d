//! alto-core — wire protocol, configuration, and bootstrap file formats.
//! All other ALTO crates depend on this one.

pub mod config;
pub mod snapshot;
pub mod wire;

pub use config::{AltoConfig, CostWeights};
pub use snapshot::{PeerTable, TopologySnapshot};
pub use wire::{Endpoint, Request, ResolvedPeer, Response};
