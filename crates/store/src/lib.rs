//! In-memory reference implementations of the concierge storage seams.
//!
//! `InMemoryMemoryStore` backs the TTL-aware agent memory contract and
//! `InMemorySessionStore` keeps conversation state between turns. Both are
//! suitable for tests and single-process deployments; a networked store can
//! replace them behind the same traits.

pub mod memory;
pub mod session;

pub use memory::InMemoryMemoryStore;
pub use session::InMemorySessionStore;
