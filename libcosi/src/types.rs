//! Core COSI types: the six persisted resource kinds and their shared
//! scalar types.
//!
//! Two parallel request/target pairs (`BucketRequest`/`Bucket`,
//! `BucketAccessRequest`/`BucketAccess`) plus two cluster-scoped policy
//! kinds (`BucketClass`, `BucketAccessClass`), and the `Secret` kind the
//! access engine materializes credentials into.  Everything is
//! [`Serialize`]/[`Deserialize`] with the camelCase wire names of the
//! original protocol.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CosiError;

// ---------------------------------------------------------------------------
// Object metadata & keys
// ---------------------------------------------------------------------------

/// Metadata common to every persisted kind.
///
/// `resource_version` is the optimistic-concurrency token managed by the
/// entity store: every committed write bumps it, and conditional updates
/// fail with [`CosiError::Conflict`] when the caller's token is stale.
/// A set `deletion_timestamp` means deletion has been requested but release
/// has not yet completed; the object is only removed from the store once the
/// binding engine finishes teardown.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within its scope.
    pub name: String,
    /// Namespace for namespaced kinds; `None` for cluster-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Store-assigned unique identifier, stable for the object's lifetime.
    #[serde(default)]
    pub uid: String,
    /// Monotonically increasing version token, managed by the store.
    #[serde(default)]
    pub resource_version: u64,
    /// Set by the store on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set when deletion is requested; cleared never.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Metadata for a cluster-scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Store key: `(namespace, name)`. Cluster-scoped kinds use `namespace = None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&ObjectMeta> for ObjectKey {
    fn from(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
        }
    }
}

/// Implemented by every persisted kind so the entity store can be generic.
pub trait Object: Clone + Send + Sync + 'static {
    /// Kind name as it appears in errors and logs.
    const KIND: &'static str;
    /// Status block type; `()` for kinds without a status subresource.
    type Status: Clone + Send + Sync;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
    fn status(&self) -> &Self::Status;
    fn set_status(&mut self, status: Self::Status);

    /// Store key for this object.
    fn key(&self) -> ObjectKey {
        ObjectKey::from(self.metadata())
    }
}

/// Reference to another object by name (and namespace, when namespaced).
/// Used as the binding back-reference payload on targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    /// Referenced object name.
    pub name: String,
    /// Referenced object namespace, if namespaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl TypedReference {
    /// Reference to `meta`'s object.
    pub fn to(meta: &ObjectMeta) -> Self {
        Self {
            name: meta.name.clone(),
            namespace: meta.namespace.clone(),
        }
    }

    /// `true` if this reference points at the object described by `meta`.
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.name == meta.name && self.namespace == meta.namespace
    }
}

impl fmt::Display for TypedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Protocols, access modes, policies
// ---------------------------------------------------------------------------

/// The storage-access protocol family a requester expects and a
/// target/class supports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProtocolSignature {
    /// S3-compatible object storage.
    #[serde(rename = "s3")]
    S3,
    /// Google Cloud Storage.
    #[serde(rename = "gcs")]
    Gcs,
    /// Azure Blob storage.
    #[serde(rename = "azureBlob")]
    AzureBlob,
}

impl fmt::Display for ProtocolSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::AzureBlob => "azureBlob",
        })
    }
}

/// Full protocol descriptor carried on requests and buckets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    /// Protocol family.
    pub signature: ProtocolSignature,
    /// Optional protocol version, e.g. `"v4"` for S3 signature v4.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Protocol {
    /// Protocol descriptor with no version constraint.
    pub fn new(signature: ProtocolSignature) -> Self {
        Self {
            signature,
            version: None,
        }
    }
}

/// Anonymous access granted on a bucket, exactly one variant active.
///
/// The original protocol modeled this as three independent booleans;
/// [`AnonymousAccessMode::from_flags`] accepts that representation and
/// validates exclusivity at the boundary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnonymousAccessMode {
    /// No anonymous access.
    #[default]
    #[serde(rename = "private")]
    Private,
    /// Anonymous read-only access.
    #[serde(rename = "publicReadOnly")]
    PublicReadOnly,
    /// Anonymous read-write access.
    #[serde(rename = "publicReadWrite")]
    PublicReadWrite,
}

impl AnonymousAccessMode {
    /// Convert the legacy boolean triad, rejecting any combination with
    /// more than one flag set. All flags unset means [`Self::Private`].
    pub fn from_flags(
        private: bool,
        public_read_only: bool,
        public_read_write: bool,
    ) -> Result<Self, CosiError> {
        match (private, public_read_only, public_read_write) {
            (_, false, false) => Ok(Self::Private),
            (false, true, false) => Ok(Self::PublicReadOnly),
            (false, false, true) => Ok(Self::PublicReadWrite),
            _ => Err(CosiError::InvalidArgument(
                "anonymous access mode flags are mutually exclusive".into(),
            )),
        }
    }
}

/// What happens to the backing resource when its binding is released.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Backing storage is left intact (the default).
    #[default]
    #[serde(rename = "retain")]
    Retain,
    /// Backing storage is torn down via the provisioner before the entity
    /// is removed.
    #[serde(rename = "delete")]
    Delete,
}

/// Coarse lifecycle phase recorded in every status block.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum BindPhase {
    /// Initial phase; also where requests park on terminal misconfiguration
    /// unless the engine is configured to mark them [`Self::Failed`].
    #[default]
    #[serde(rename = "pending")]
    Pending,
    /// Both sides of the pairing have recorded the relationship.
    #[serde(rename = "bound")]
    Bound,
    /// The pairing was released (target deleted out from under the request);
    /// terminal, a new request must be created to rebind.
    #[serde(rename = "released")]
    Released,
    /// Terminal misconfiguration, only written when the engine's
    /// `fail_on_terminal_errors` policy is enabled.
    #[serde(rename = "failed")]
    Failed,
}

impl fmt::Display for BindPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Bound => "bound",
            Self::Released => "released",
            Self::Failed => "failed",
        })
    }
}

/// Reference to a namespace permitted to bind a bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRef {
    /// Namespace name.
    pub name: String,
    /// Namespace UID, if known.
    #[serde(default)]
    pub uid: String,
}

impl NamespaceRef {
    /// Reference by name with no UID.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: String::new(),
        }
    }
}

/// Allow/deny action lists carried by an access class.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyActions {
    /// Actions explicitly allowed.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Actions explicitly denied.
    #[serde(default)]
    pub deny: Vec<String>,
}

// ---------------------------------------------------------------------------
// BucketRequest (namespaced)
// ---------------------------------------------------------------------------

/// A workload's ask for bucket storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRequestSpec {
    /// Existing bucket to bind, or desired name for a provisioned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    /// Secret that future credentials should land in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// Name prefix for dynamically provisioned buckets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_prefix: Option<String>,
    /// Class to provision through; `None` selects the cluster default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_class_name: Option<String>,
    /// Protocol the requester expects.
    pub protocol: Protocol,
}

/// Status of a [`BucketRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRequestStatus {
    /// Lifecycle phase.
    #[serde(default)]
    pub phase: BindPhase,
    /// Human-readable progress or failure detail.
    #[serde(default)]
    pub message: String,
    /// Name of the bucket this request is bound to, set with phase `Bound`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_bucket_name: Option<String>,
}

/// Namespaced request for bucket storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRequest {
    pub metadata: ObjectMeta,
    pub spec: BucketRequestSpec,
    #[serde(default)]
    pub status: BucketRequestStatus,
}

impl BucketRequest {
    /// New request in `namespace` with default (empty) status.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: BucketRequestSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec,
            status: BucketRequestStatus::default(),
        }
    }
}

impl Object for BucketRequest {
    const KIND: &'static str = "BucketRequest";
    type Status = BucketRequestStatus;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> &Self::Status {
        &self.status
    }
    fn set_status(&mut self, status: Self::Status) {
        self.status = status;
    }
}

// ---------------------------------------------------------------------------
// Bucket (cluster-scoped)
// ---------------------------------------------------------------------------

/// The provisioned (or statically created) bucket resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Identity of the provisioner responsible for this bucket.
    pub provisioner: String,
    /// What happens to backing storage on release.
    #[serde(default)]
    pub release_policy: ReleasePolicy,
    /// Anonymous access granted on the bucket.
    #[serde(default)]
    pub anonymous_access_mode: AnonymousAccessMode,
    /// Class this bucket was provisioned through, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_class_name: Option<String>,
    /// Namespaces whose requests may bind this bucket. Empty (together with
    /// the class's additional set) means no restriction.
    #[serde(default)]
    pub permitted_namespaces: Vec<NamespaceRef>,
    /// Protocol this bucket serves.
    pub protocol: Protocol,
    /// Opaque parameters, including the provisioner's resource handle for
    /// dynamically provisioned buckets.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Back-reference to the bound request; the durable half of the pairing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_request: Option<TypedReference>,
}

/// Status of a [`Bucket`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    /// Lifecycle phase.
    #[serde(default)]
    pub phase: BindPhase,
    /// Human-readable progress or failure detail.
    #[serde(default)]
    pub message: String,
}

/// Cluster-scoped bucket resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub metadata: ObjectMeta,
    pub spec: BucketSpec,
    #[serde(default)]
    pub status: BucketStatus,
}

impl Bucket {
    /// New cluster-scoped bucket with default (empty) status.
    pub fn new(name: impl Into<String>, spec: BucketSpec) -> Self {
        Self {
            metadata: ObjectMeta::cluster(name),
            spec,
            status: BucketStatus::default(),
        }
    }
}

impl Object for Bucket {
    const KIND: &'static str = "Bucket";
    type Status = BucketStatus;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> &Self::Status {
        &self.status
    }
    fn set_status(&mut self, status: Self::Status) {
        self.status = status;
    }
}

// ---------------------------------------------------------------------------
// BucketClass (cluster-scoped)
// ---------------------------------------------------------------------------

/// Policy template for dynamic bucket provisioning.
///
/// Flat (no spec/status split) like the original protocol: classes are pure
/// configuration with no lifecycle of their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketClass {
    pub metadata: ObjectMeta,
    /// Provisioner this class selects.
    pub provisioner: String,
    /// At most one class per provisioner should carry this flag; the class
    /// resolver treats violations as a configuration error.
    #[serde(default)]
    pub is_default_bucket_class: bool,
    /// Namespaces permitted to bind in addition to each bucket's own set.
    #[serde(default)]
    pub additional_permitted_namespaces: Vec<NamespaceRef>,
    /// Protocols this class can provision.
    pub supported_protocols: Vec<ProtocolSignature>,
    /// Anonymous access mode templates.
    #[serde(default)]
    pub anonymous_access_modes: Vec<AnonymousAccessMode>,
    /// Release policy applied to buckets provisioned through this class.
    #[serde(default)]
    pub release_policy: ReleasePolicy,
    /// Opaque parameters forwarded to the provisioner.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl Object for BucketClass {
    const KIND: &'static str = "BucketClass";
    type Status = ();

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> &Self::Status {
        &()
    }
    fn set_status(&mut self, _status: Self::Status) {}
}

// ---------------------------------------------------------------------------
// BucketAccessRequest (namespaced)
// ---------------------------------------------------------------------------

/// A workload's ask for credentials against a bound [`BucketRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessRequestSpec {
    /// The bucket request credentials are being asked for. Required.
    pub bucket_request_name: String,
    /// Service account the credentials are minted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Secret the credentials should be written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_secret_name: Option<String>,
    /// Access class constraining the grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_access_class_name: Option<String>,
    /// Pre-existing [`BucketAccess`] to adopt rather than create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_access_name: Option<String>,
}

/// Status of a [`BucketAccessRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessRequestStatus {
    /// Lifecycle phase.
    #[serde(default)]
    pub phase: BindPhase,
    /// Human-readable progress or failure detail.
    #[serde(default)]
    pub message: String,
    /// Name of the access grant this request is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_bucket_access_name: Option<String>,
}

/// Namespaced request for bucket credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessRequest {
    pub metadata: ObjectMeta,
    pub spec: BucketAccessRequestSpec,
    #[serde(default)]
    pub status: BucketAccessRequestStatus,
}

impl BucketAccessRequest {
    /// New request in `namespace` with default (empty) status.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: BucketAccessRequestSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec,
            status: BucketAccessRequestStatus::default(),
        }
    }
}

impl Object for BucketAccessRequest {
    const KIND: &'static str = "BucketAccessRequest";
    type Status = BucketAccessRequestStatus;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> &Self::Status {
        &self.status
    }
    fn set_status(&mut self, status: Self::Status) {
        self.status = status;
    }
}

// ---------------------------------------------------------------------------
// BucketAccess (cluster-scoped)
// ---------------------------------------------------------------------------

/// The granted credential binding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessSpec {
    /// Back-reference to the originating request; the durable half of the
    /// pairing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_access_request: Option<TypedReference>,
    /// Service account the credentials were minted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Secret holding the minted credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret_name: Option<String>,
    /// Identity of the provisioner that minted the credentials.
    #[serde(default)]
    pub provisioner: String,
    /// Opaque parameters, including the resource handle and credential id.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Status of a [`BucketAccess`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessStatus {
    /// Lifecycle phase.
    #[serde(default)]
    pub phase: BindPhase,
    /// Human-readable progress or failure detail.
    #[serde(default)]
    pub message: String,
}

/// Cluster-scoped credential grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccess {
    pub metadata: ObjectMeta,
    pub spec: BucketAccessSpec,
    #[serde(default)]
    pub status: BucketAccessStatus,
}

impl BucketAccess {
    /// New cluster-scoped access grant with default (empty) status.
    pub fn new(name: impl Into<String>, spec: BucketAccessSpec) -> Self {
        Self {
            metadata: ObjectMeta::cluster(name),
            spec,
            status: BucketAccessStatus::default(),
        }
    }
}

impl Object for BucketAccess {
    const KIND: &'static str = "BucketAccess";
    type Status = BucketAccessStatus;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> &Self::Status {
        &self.status
    }
    fn set_status(&mut self, status: Self::Status) {
        self.status = status;
    }
}

// ---------------------------------------------------------------------------
// BucketAccessClass (cluster-scoped)
// ---------------------------------------------------------------------------

/// Policy template for access grants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessClass {
    pub metadata: ObjectMeta,
    /// Provisioner this class selects.
    pub provisioner: String,
    /// Allow/deny action lists applied to grants.
    #[serde(default)]
    pub policy_actions: PolicyActions,
    /// Protocols this class supports; empty means unconstrained.
    #[serde(default)]
    pub supported_protocols: Vec<ProtocolSignature>,
    /// Opaque parameters forwarded to the provisioner.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl Object for BucketAccessClass {
    const KIND: &'static str = "BucketAccessClass";
    type Status = ();

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> &Self::Status {
        &()
    }
    fn set_status(&mut self, _status: Self::Status) {}
}

// ---------------------------------------------------------------------------
// Secret (namespaced)
// ---------------------------------------------------------------------------

/// Materialized credential payload, written by the access binding engine.
///
/// `credential_id` is the stable identifier the provisioner assigned to the
/// minted credential; re-issue on retry returns the same id, so a differing
/// id on a grant is the explicit rotation signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub metadata: ObjectMeta,
    /// Opaque credential material.
    #[serde(default)]
    pub data: HashMap<String, String>,
    /// Stable identifier of the credential held in `data`.
    #[serde(default)]
    pub credential_id: String,
}

impl Object for Secret {
    const KIND: &'static str = "Secret";
    type Status = ();

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> &Self::Status {
        &()
    }
    fn set_status(&mut self, _status: Self::Status) {}
}
