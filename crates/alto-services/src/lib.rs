//! alto-services — the directory and everything it is built from.
//!
//! `topology` and `registry` are plain data structures. `cost` and
//! `resolver` are stateless functions over them. `directory` owns both
//! structures behind one lock and is the only type the daemon shares.

pub mod connections;
pub mod cost;
pub mod directory;
pub mod persistence;
pub mod registry;
pub mod resolver;
pub mod topology;

pub use connections::{new_connection_table, ConnectionMeta, ConnectionTable};
pub use cost::{CostPolicy, SharedPolicy, WeightedCost};
pub use directory::{Directory, DirectoryError, DirectorySnapshot, SharedDirectory};
pub use persistence::{load_bootstrap, Bootstrap, JsonPeerFile, NoJournal, PeerJournal};
pub use registry::{PeerRecord, PeerRegistry};
pub use resolver::{Candidate, ResolveError};
pub use topology::{TopologyError, TopologyStore};
