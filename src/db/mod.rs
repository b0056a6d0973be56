//! Database capability abstraction (spec §6).
//!
//! [`DatabaseBackend`] is the seam between the engine and any concrete
//! store: [`mongo::MongoBackend`] wraps the real MongoDB driver,
//! [`memory::MemoryBackend`] is a `HashMap`-backed stand-in for tests and the
//! simulator.

mod backend;
mod memory;
mod mongo;

pub use backend::{DatabaseBackend, IndexSpec};
pub use memory::MemoryBackend;
pub use mongo::MongoBackend;
