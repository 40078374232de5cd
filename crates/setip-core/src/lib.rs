// # setip-core
//
// Core library for registering a host's external IPv4 address with a
// directory service while a local port-80 NAT redirect is in place.
//
// ## Architecture Overview
//
// - **NatTable / RedirectInspector**: Query and mutate NAT redirect rules
// - **RedirectToggle**: Idempotent install/remove plus rule-set persistence
// - **AddressSource / DiscoveryChain**: Ordered external address discovery
// - **Registrar**: One registration exchange with the directory service
// - **Orchestrator**: Suspend → discover → register → restore state machine
// - **ComponentRegistry**: Plugin-based registry for backends and clients
//
// ## Design Principles
//
// 1. **Live State**: The NAT table is re-read every run, never remembered
// 2. **Restoration**: A suspended redirect is reinstalled on every exit path
// 3. **Plugin-Based**: Backends are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod nat;
pub mod registry;
pub mod rule;
pub mod traits;

// Re-export core types for convenience
pub use config::{AddressSourceConfig, Credentials, NatConfig, RegistrarConfig, SetipConfig};
pub use discovery::{DiscoveredAddress, DiscoveryChain};
pub use engine::{Orchestrator, RunEvent, RunReport, RunState};
pub use error::{Error, Result};
pub use nat::{MemoryNatTable, RedirectToggle};
pub use registry::ComponentRegistry;
pub use rule::{RedirectRule, RedirectSnapshot, RuleState};
pub use traits::{AddressSource, NatTable, RedirectInspector, Registrar};
pub use traits::{RegistrationOutcome, RegistrationRequest};
