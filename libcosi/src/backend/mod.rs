//! Provisioner adapter implementations.
//!
//! Each backend module provides a concrete type that implements
//! [`crate::provisioner::ProvisionerAdapter`].

pub mod memory;
