// # NAT State
//
// Idempotent redirect toggling, durable rule-set storage, and an in-memory
// NatTable implementation.

pub mod file;
pub mod memory;
pub mod toggle;

pub use file::RuleSetFile;
pub use memory::{MemoryNatTable, MemoryNatTableFactory};
pub use toggle::RedirectToggle;
