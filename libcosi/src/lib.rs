//! # libcosi — Container Object Storage Interface binding for RK8s
//!
//! `libcosi` implements the resource and binding model of a [Container
//! Object Storage Interface][cosi]: workloads declare `BucketRequest` /
//! `BucketAccessRequest` entities, and binding engines match them to
//! `Bucket` / `BucketAccess` resources — existing ones directly, or freshly
//! provisioned through an out-of-process driver — without the requester
//! ever knowing the backing storage system.  It follows the RK8s
//! architecture conventions (Tokio async runtime, `tracing` for
//! observability, `thiserror` for structured errors).
//!
//! All coordination is optimistic: every write goes through the entity
//! store's version-token check-and-set, so any number of worker replicas
//! can reconcile the same request concurrently without ever producing two
//! bindings for one target.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Data model: the six COSI kinds, protocols, phases, policies. |
//! | [`error`] | [`CosiError`] enum covering all failure modes. |
//! | [`store`] | Versioned, watchable entity store and the [`Registry`]. |
//! | [`class`] | Class resolution and namespace/protocol policy checks. |
//! | [`provisioner`] | [`ProvisionerAdapter`] trait — the driver boundary. |
//! | [`backend`] | Adapter implementations (in-memory). |
//! | [`binder`] | The generic binding state machine. |
//! | [`bucket_site`] | Bucket-pair instantiation of the engine. |
//! | [`access_site`] | Access-pair instantiation, credential secrets. |
//! | [`controller`] | Watch-driven reconciliation workers. |
//! | [`retry`] | Exponential backoff with jitter. |
//!
//! [cosi]: https://container-object-storage-interface.github.io/

pub mod access_site;
pub mod backend;
pub mod binder;
pub mod bucket_site;
pub mod class;
pub mod controller;
pub mod error;
pub mod provisioner;
pub mod retry;
pub mod store;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use binder::{BindingConfig, BindingEngine, BindingSite};
pub use controller::{Controller, ControllerConfig};
pub use error::CosiError;
pub use provisioner::{Credential, ProvisionerAdapter, ResourceHandle};
pub use store::{Event, Registry, Store};
pub use types::*;
