//! COSI error types.
//!
//! All errors in the `libcosi` crate are represented by the [`CosiError`]
//! enum, which derives [`thiserror::Error`] for ergonomic error handling and
//! also implements [`Serialize`]/[`Deserialize`] so errors can be recorded
//! verbatim in entity status messages.
//!
//! Errors split into two families: *transient* errors
//! ([`CosiError::Conflict`], [`CosiError::AdapterUnavailable`]) are retried
//! internally with backoff and never surface to users; everything else is
//! terminal for the current spec of the request and is written to its status
//! message until the requester corrects the spec or deletes the request.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ProtocolSignature;

/// Unified error type for COSI binding and provisioning operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CosiError {
    /// The class named by the request does not exist.
    #[error("class {0} not found")]
    ClassNotFound(String),

    /// No class is marked as the cluster default.
    #[error("no default class available for protocol {protocol}")]
    NoDefaultClass {
        /// Protocol the request asked for.
        protocol: ProtocolSignature,
    },

    /// More than one class carries the default flag. Ambiguity is a
    /// configuration error and is never resolved by first-match, since that
    /// would make provisioning non-deterministic across controller restarts.
    #[error("ambiguous default class: candidates {candidates:?}")]
    AmbiguousDefault {
        /// Names of all classes carrying the default flag, sorted.
        candidates: Vec<String>,
    },

    /// The request's protocol is not in the supported set of the class or
    /// target it tried to bind through.
    #[error("protocol {protocol} is not supported by {target}")]
    ProtocolMismatch {
        /// Protocol the request declared.
        protocol: ProtocolSignature,
        /// Class or bucket that rejected it.
        target: String,
    },

    /// The request's namespace is not in the target's permitted set.
    #[error("namespace {namespace} is not permitted to bind bucket {bucket}")]
    NamespaceNotPermitted {
        /// Namespace of the requesting entity.
        namespace: String,
        /// Bucket that rejected the bind.
        bucket: String,
    },

    /// The named target is already bound to a different request.
    #[error("{target} is already bound to {holder}")]
    AlreadyBound {
        /// Name of the contested target.
        target: String,
        /// `namespace/name` of the request holding the binding.
        holder: String,
    },

    /// The provisioner adapter could not be reached or failed transiently.
    /// Always retried with backoff.
    #[error("provisioner unavailable: {0}")]
    AdapterUnavailable(String),

    /// The provisioner adapter rejected the operation outright
    /// (e.g. invalid parameters). Never retried.
    #[error("provisioner rejected request: {0}")]
    AdapterRejected(String),

    /// An optimistic-concurrency write lost the race: the caller's version
    /// token is stale. Always retried transparently after a re-read.
    #[error("conflict updating {kind}/{name}: stale resource version")]
    Conflict {
        /// Kind of the contested object.
        kind: String,
        /// Name of the contested object.
        name: String,
    },

    /// The named object does not exist in the store.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object.
        kind: String,
        /// Name of the missing object.
        name: String,
    },

    /// An object with this key already exists in the store.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of the existing object.
        kind: String,
        /// Name of the existing object.
        name: String,
    },

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CosiError {
    /// `true` for errors that are retried internally with backoff and never
    /// surfaced as terminal failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::AdapterUnavailable(_)
        )
    }

    /// Create a [`CosiError::AdapterUnavailable`] from anything that
    /// implements [`std::fmt::Display`].
    pub fn unavailable<E: std::fmt::Display>(e: E) -> Self {
        Self::AdapterUnavailable(e.to_string())
    }

    /// Create a [`CosiError::InvalidArgument`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn invalid<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }

    /// Create a [`CosiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}
