//! altod — the ALTO directory daemon.
//!
//! The binary in `main.rs` wires these pieces to configuration; the
//! integration tests drive them directly.

pub mod expiry;
pub mod server;
pub mod session;

pub use server::Server;
pub use session::{dispatch, FatalError, Session, SessionEnd, SessionLimits};
