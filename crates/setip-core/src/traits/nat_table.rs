// # NAT Table Traits
//
// Defines the interface for inspecting and mutating NAT redirect rules.
//
// ## Implementations
//
// - iptables: `setip-nat-iptables` crate
// - In-memory: `setip_core::nat::MemoryNatTable` (tests, dry runs)
//
// ## Usage
//
// ```rust,ignore
// use setip_core::{RedirectInspector, RedirectRule};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let table = /* NatTable implementation */;
//
//     let rule = RedirectRule::prerouting(80, 8000);
//     if table.exists(&rule).await? {
//         println!("{} is installed", rule);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::rule::RedirectRule;

/// Read-only view of the live NAT table
///
/// # Contract
///
/// - Every call queries live state. Nothing is cached between calls.
/// - Never mutates the table.
/// - `Ok(false)` means the rule is absent. A privilege failure is reported as
///   `Err(Error::PermissionDenied)` so callers can tell "absent" from
///   "could not determine".
#[async_trait]
pub trait RedirectInspector: Send + Sync {
    /// Check whether an exactly matching rule is installed
    async fn exists(&self, rule: &RedirectRule) -> Result<bool, crate::Error>;
}

/// Raw NAT table operations
///
/// These are the unconditional primitives. Idempotence is layered on top by
/// [`crate::nat::RedirectToggle`], which checks live state before each
/// mutation.
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ Run privileged host commands or syscalls that touch the NAT table
/// - ✅ Serialize the current rule set
///
/// ## Forbidden Capabilities
/// - ❌ Decide which rules to suspend or restore (owned by `Orchestrator`)
/// - ❌ Retry failed mutations
/// - ❌ Write the persisted rule set file (owned by `RedirectToggle`)
#[async_trait]
pub trait NatTable: RedirectInspector {
    /// Append the rule to its chain
    async fn append(&self, rule: &RedirectRule) -> Result<(), crate::Error>;

    /// Delete one instance of the rule from its chain
    async fn delete(&self, rule: &RedirectRule) -> Result<(), crate::Error>;

    /// Persist the live rule set
    ///
    /// Backends that hand persistence to the host (e.g. a save command)
    /// return `Ok(None)`. Backends that can only produce a dump return it as
    /// text so the caller can write it to a durable location.
    async fn save(&self) -> Result<Option<String>, crate::Error>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Helper trait for constructing NAT tables from configuration
pub trait NatTableFactory: Send + Sync {
    /// Create a NatTable instance from configuration
    fn create(&self, config: &crate::config::NatConfig) -> Result<Box<dyn NatTable>, crate::Error>;
}
