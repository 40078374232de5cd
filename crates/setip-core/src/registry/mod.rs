//! Plugin-based component registry
//!
//! The registry allows NAT backends, address sources and registrars to be
//! registered dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use setip_core::registry::ComponentRegistry;
//! use setip_core::config::NatConfig;
//!
//! let registry = ComponentRegistry::with_builtins();
//! setip_nat_iptables::register(&registry);
//!
//! let nat = registry.create_nat_table(&NatConfig::default())?;
//! ```
//!
//! ## Registration
//!
//! Implementation crates expose a `register` function:
//!
//! ```rust,ignore
//! // In setip-registrar-http crate
//! pub fn register(registry: &ComponentRegistry) {
//!     registry.register_registrar("http", Box::new(HttpRegistrarFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{AddressSourceConfig, NatConfig, RegistrarConfig};
use crate::error::{Error, Result};
use crate::nat::MemoryNatTableFactory;
use crate::traits::{AddressSource, AddressSourceFactory, NatTable, NatTableFactory};
use crate::traits::{Registrar, RegistrarFactory};

/// Registry of component factories keyed by configuration type name
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ComponentRegistry {
    nat_tables: RwLock<HashMap<String, Box<dyn NatTableFactory>>>,
    address_sources: RwLock<HashMap<String, Box<dyn AddressSourceFactory>>>,
    registrars: RwLock<HashMap<String, Box<dyn RegistrarFactory>>>,
}

// A factory that panicked while registering leaves a usable map behind
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the in-crate components (the memory NAT table)
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_nat_table("memory", Box::new(MemoryNatTableFactory));
        registry
    }

    /// Register a NAT backend factory
    ///
    /// # Parameters
    ///
    /// - `name`: Backend type name (e.g., "iptables", "memory")
    /// - `factory`: Factory object for creating backend instances
    pub fn register_nat_table(&self, name: impl Into<String>, factory: Box<dyn NatTableFactory>) {
        write(&self.nat_tables).insert(name.into(), factory);
    }

    /// Register an address source factory
    pub fn register_address_source(
        &self,
        name: impl Into<String>,
        factory: Box<dyn AddressSourceFactory>,
    ) {
        write(&self.address_sources).insert(name.into(), factory);
    }

    /// Register a registrar factory
    pub fn register_registrar(&self, name: impl Into<String>, factory: Box<dyn RegistrarFactory>) {
        write(&self.registrars).insert(name.into(), factory);
    }

    /// Create a NAT backend from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn NatTable>)`: Created backend instance
    /// - `Err(Error)`: If the backend type is not registered or creation fails
    pub fn create_nat_table(&self, config: &NatConfig) -> Result<Box<dyn NatTable>> {
        let nat_type = config.type_name();
        let factories = read(&self.nat_tables);

        let factory = factories
            .get(nat_type)
            .ok_or_else(|| Error::config(format!("Unknown NAT backend type: {}", nat_type)))?;

        factory.create(config)
    }

    /// Create an address source from configuration
    pub fn create_address_source(&self, config: &AddressSourceConfig) -> Result<Box<dyn AddressSource>> {
        let source_type = config.type_name();
        let factories = read(&self.address_sources);

        let factory = factories
            .get(source_type)
            .ok_or_else(|| Error::config(format!("Unknown address source type: {}", source_type)))?;

        factory.create(config)
    }

    /// Create every configured address source, preserving order
    pub fn create_address_sources(
        &self,
        configs: &[AddressSourceConfig],
    ) -> Result<Vec<Box<dyn AddressSource>>> {
        configs
            .iter()
            .map(|config| self.create_address_source(config))
            .collect()
    }

    /// Create a registrar from configuration
    pub fn create_registrar(&self, endpoint: &str, config: &RegistrarConfig) -> Result<Box<dyn Registrar>> {
        let registrar_type = config.type_name();
        let factories = read(&self.registrars);

        let factory = factories
            .get(registrar_type)
            .ok_or_else(|| Error::config(format!("Unknown registrar type: {}", registrar_type)))?;

        factory.create(endpoint, config)
    }

    /// List all registered NAT backend types
    pub fn list_nat_tables(&self) -> Vec<String> {
        read(&self.nat_tables).keys().cloned().collect()
    }

    /// List all registered address source types
    pub fn list_address_sources(&self) -> Vec<String> {
        read(&self.address_sources).keys().cloned().collect()
    }

    /// List all registered registrar types
    pub fn list_registrars(&self) -> Vec<String> {
        read(&self.registrars).keys().cloned().collect()
    }

    /// Check if a NAT backend type is registered
    pub fn has_nat_table(&self, name: &str) -> bool {
        read(&self.nat_tables).contains_key(name)
    }

    /// Check if an address source type is registered
    pub fn has_address_source(&self, name: &str) -> bool {
        read(&self.address_sources).contains_key(name)
    }

    /// Check if a registrar type is registered
    pub fn has_registrar(&self, name: &str) -> bool {
        read(&self.registrars).contains_key(name)
    }
}
