//! Provisioner adapter interface.
//!
//! The binding engines invoke an out-of-process driver through this trait to
//! create/delete backing storage and to mint/revoke credentials.  The
//! engine's retry loop delivers every operation at least once, so all four
//! operations must be idempotent; adapters de-duplicate by the stable
//! request UID passed through the parameter map under
//! [`PARAM_REQUEST_UID`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CosiError;
use crate::types::BucketClass;

/// Reserved parameter key: UID of the originating request, the adapter's
/// idempotency key.
pub const PARAM_REQUEST_UID: &str = "cosi.io/request-uid";

/// Reserved parameter key under which the engine records the provisioner's
/// resource handle on a dynamically provisioned bucket.
pub const PARAM_RESOURCE_HANDLE: &str = "cosi.io/resource-handle";

/// Reserved parameter key under which the engine records the credential id
/// on an access grant.
pub const PARAM_CREDENTIAL_ID: &str = "cosi.io/credential-id";

/// Opaque handle to a backing-store resource, assigned by the provisioner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub String);

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Minted access credential.
///
/// `credential_id` is stable for a given request UID: re-granting on retry
/// returns the same id unless the adapter explicitly rotates, in which case
/// a new id signals the engine to rewrite the materialized secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Stable identifier for this credential.
    pub credential_id: String,
    /// Opaque credential material (keys, tokens, endpoints).
    #[serde(default)]
    pub data: HashMap<String, String>,
}

/// Out-of-process provisioner driver, invoked per provisioner identity.
///
/// All operations are fallible and must tolerate repeated invocation with
/// the same logical request.  Transient faults are reported as
/// [`CosiError::AdapterUnavailable`] (retried with backoff); invalid input
/// as [`CosiError::AdapterRejected`] (terminal).
#[async_trait]
pub trait ProvisionerAdapter: Send + Sync {
    /// Create backing storage for a bucket.  `parameters` carries the class
    /// parameters plus [`PARAM_REQUEST_UID`].
    async fn provision(
        &self,
        class: &BucketClass,
        parameters: &HashMap<String, String>,
    ) -> Result<ResourceHandle, CosiError>;

    /// Tear down backing storage.  Must succeed (or report transient
    /// failure) when the resource is already gone.
    async fn deprovision(&self, handle: &ResourceHandle) -> Result<(), CosiError>;

    /// Mint credentials against a provisioned resource.  `parameters`
    /// carries access-class parameters plus [`PARAM_REQUEST_UID`].
    async fn grant(
        &self,
        handle: &ResourceHandle,
        parameters: &HashMap<String, String>,
    ) -> Result<Credential, CosiError>;

    /// Revoke a previously minted credential.  Must succeed when the
    /// credential is already gone.
    async fn revoke(&self, handle: &ResourceHandle, credential_id: &str)
    -> Result<(), CosiError>;
}
