//! Core traits for the setip system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`RedirectInspector`] / [`NatTable`]: Query and mutate NAT redirect rules
//! - [`AddressSource`]: One place to learn the external IPv4 address from
//! - [`Registrar`]: Register the address with the directory service

pub mod address_source;
pub mod nat_table;
pub mod registrar;

pub use address_source::{AddressSource, AddressSourceFactory};
pub use nat_table::{NatTable, NatTableFactory, RedirectInspector};
pub use registrar::{Registrar, RegistrarFactory, RegistrationOutcome, RegistrationRequest};
