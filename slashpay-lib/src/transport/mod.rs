//! Transport/discovery collaborator.
//!
//! The core never talks to a network directly; it reads and writes opaque JSON
//! documents through the [`Transport`] trait. [`MemoryTransport`] is a
//! self-contained implementation for tests and single-process setups.

mod memory;
mod traits;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use traits::{CreateOptions, Transport};
