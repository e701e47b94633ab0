//! Persistence providers.
//!
//! [`InMemoryPersistence`] implements [`PersistenceProvider`](crate::traits::PersistenceProvider)
//! over process memory for tests and the demo host.

pub mod memory;

pub use memory::InMemoryPersistence;
