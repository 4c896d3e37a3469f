//! Gantry Registry
//!
//! Worker membership, agent type support sets, sticky placements, and topic
//! subscriptions for the Gantry agent runtime.
//!
//! The [`AgentDirectory`] is the single authority the gateway consults for
//! every routing decision. It is internally synchronized: all mutations are
//! linearized behind one lock.

pub mod directory;
pub mod error;
pub mod worker;

pub use directory::AgentDirectory;
pub use error::{RegistryError, RegistryResult};
pub use worker::WorkerInfo;
