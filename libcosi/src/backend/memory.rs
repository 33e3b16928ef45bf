//! In-process provisioner backend.
//!
//! [`MemoryProvisioner`] keeps provisioned resources and minted credentials
//! in concurrent maps.  It honors the at-least-once contract: provisioning
//! and granting are de-duplicated by the request UID passed under
//! [`PARAM_REQUEST_UID`], and teardown operations succeed when the resource
//! is already gone.  Fault injection hooks make it the reference adapter for
//! binding-engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::error::CosiError;
use crate::provisioner::{Credential, PARAM_REQUEST_UID, ProvisionerAdapter, ResourceHandle};
use crate::types::BucketClass;

#[derive(Debug, Clone)]
struct ProvisionedRecord {
    request_uid: String,
    #[allow(dead_code)]
    parameters: HashMap<String, String>,
}

/// In-memory provisioner, idempotent by request UID.
///
/// # Thread safety
///
/// All mutable state is behind concurrent maps ([`DashMap`]), allowing
/// multiple reconciliation tasks to call into the adapter concurrently.
pub struct MemoryProvisioner {
    /// Provisioner identity this adapter answers for.
    name: String,
    /// Provisioned resources, keyed by handle.
    resources: DashMap<String, ProvisionedRecord>,
    /// Request UID → handle, the provisioning idempotency map.
    by_request: DashMap<String, ResourceHandle>,
    /// Minted credentials, keyed by credential id.
    credentials: DashMap<String, Credential>,
    /// Request UID → credential, the grant idempotency map.
    creds_by_request: DashMap<String, Credential>,

    // Fault injection and call accounting for tests.
    fail_next: AtomicU32,
    reject_next: AtomicBool,
    rotate_next: AtomicBool,
    provision_calls: AtomicU64,
    deprovision_calls: AtomicU64,
    grant_calls: AtomicU64,
    revoke_calls: AtomicU64,
}

impl MemoryProvisioner {
    /// New adapter answering for provisioner identity `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: DashMap::new(),
            by_request: DashMap::new(),
            credentials: DashMap::new(),
            creds_by_request: DashMap::new(),
            fail_next: AtomicU32::new(0),
            reject_next: AtomicBool::new(false),
            rotate_next: AtomicBool::new(false),
            provision_calls: AtomicU64::new(0),
            deprovision_calls: AtomicU64::new(0),
            grant_calls: AtomicU64::new(0),
            revoke_calls: AtomicU64::new(0),
        }
    }

    /// Provisioner identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fail the next `n` operations with [`CosiError::AdapterUnavailable`].
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Reject the next operation with [`CosiError::AdapterRejected`].
    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    /// Rotate credentials on the next grant even for a known request UID.
    pub fn rotate_next(&self) {
        self.rotate_next.store(true, Ordering::SeqCst);
    }

    pub fn provision_calls(&self) -> u64 {
        self.provision_calls.load(Ordering::SeqCst)
    }
    pub fn deprovision_calls(&self) -> u64 {
        self.deprovision_calls.load(Ordering::SeqCst)
    }
    pub fn grant_calls(&self) -> u64 {
        self.grant_calls.load(Ordering::SeqCst)
    }
    pub fn revoke_calls(&self) -> u64 {
        self.revoke_calls.load(Ordering::SeqCst)
    }

    /// `true` if backing storage for `handle` currently exists.
    pub fn has_resource(&self, handle: &ResourceHandle) -> bool {
        self.resources.contains_key(&handle.0)
    }

    /// `true` if the credential with `credential_id` is currently live.
    pub fn has_credential(&self, credential_id: &str) -> bool {
        self.credentials.contains_key(credential_id)
    }

    fn check_faults(&self) -> Result<(), CosiError> {
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(CosiError::AdapterRejected(
                "injected rejection: invalid parameters".into(),
            ));
        }
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(CosiError::AdapterUnavailable(
                "injected fault: backend unreachable".into(),
            ));
        }
        Ok(())
    }

    fn request_uid(parameters: &HashMap<String, String>) -> Result<&str, CosiError> {
        parameters
            .get(PARAM_REQUEST_UID)
            .map(String::as_str)
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| {
                CosiError::AdapterRejected(format!("missing {PARAM_REQUEST_UID} parameter"))
            })
    }
}

#[async_trait]
impl ProvisionerAdapter for MemoryProvisioner {
    #[instrument(skip(self, class, parameters), fields(class = %class.metadata.name))]
    async fn provision(
        &self,
        class: &BucketClass,
        parameters: &HashMap<String, String>,
    ) -> Result<ResourceHandle, CosiError> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        self.check_faults()?;

        if class.provisioner != self.name {
            return Err(CosiError::AdapterRejected(format!(
                "class {} selects provisioner {}, not {}",
                class.metadata.name, class.provisioner, self.name
            )));
        }

        let uid = Self::request_uid(parameters)?;
        if let Some(handle) = self.by_request.get(uid).map(|r| r.clone()) {
            debug!(%handle, uid, "returning existing resource for idempotent provision");
            return Ok(handle);
        }

        let handle = ResourceHandle(format!("mem-{}", uuid::Uuid::new_v4()));
        self.resources.insert(
            handle.0.clone(),
            ProvisionedRecord {
                request_uid: uid.to_owned(),
                parameters: parameters.clone(),
            },
        );
        self.by_request.insert(uid.to_owned(), handle.clone());
        info!(%handle, uid, "resource provisioned");
        Ok(handle)
    }

    #[instrument(skip(self))]
    async fn deprovision(&self, handle: &ResourceHandle) -> Result<(), CosiError> {
        self.deprovision_calls.fetch_add(1, Ordering::SeqCst);
        self.check_faults()?;

        if let Some((_, record)) = self.resources.remove(&handle.0) {
            self.by_request.remove(&record.request_uid);
            info!(%handle, "resource deprovisioned");
        } else {
            debug!(%handle, "resource already gone, nothing to deprovision");
        }
        Ok(())
    }

    #[instrument(skip(self, parameters))]
    async fn grant(
        &self,
        handle: &ResourceHandle,
        parameters: &HashMap<String, String>,
    ) -> Result<Credential, CosiError> {
        self.grant_calls.fetch_add(1, Ordering::SeqCst);
        self.check_faults()?;

        if !self.resources.contains_key(&handle.0) {
            return Err(CosiError::AdapterRejected(format!(
                "no such resource {handle}"
            )));
        }

        let uid = Self::request_uid(parameters)?;
        let rotate = self.rotate_next.swap(false, Ordering::SeqCst);
        if !rotate && let Some(cred) = self.creds_by_request.get(uid).map(|c| c.clone()) {
            debug!(uid, credential_id = %cred.credential_id,
                "returning existing credential for idempotent grant");
            return Ok(cred);
        }

        let credential = Credential {
            credential_id: format!("cred-{}", uuid::Uuid::new_v4()),
            data: HashMap::from([
                ("accessKeyId".to_owned(), uuid::Uuid::new_v4().to_string()),
                (
                    "secretAccessKey".to_owned(),
                    uuid::Uuid::new_v4().to_string(),
                ),
                ("endpoint".to_owned(), format!("mem://{handle}")),
            ]),
        };
        if rotate && let Some(old) = self.creds_by_request.get(uid).map(|c| c.clone()) {
            self.credentials.remove(&old.credential_id);
        }
        self.credentials
            .insert(credential.credential_id.clone(), credential.clone());
        self.creds_by_request
            .insert(uid.to_owned(), credential.clone());
        info!(uid, credential_id = %credential.credential_id, "credential minted");
        Ok(credential)
    }

    #[instrument(skip(self))]
    async fn revoke(
        &self,
        _handle: &ResourceHandle,
        credential_id: &str,
    ) -> Result<(), CosiError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        self.check_faults()?;

        if self.credentials.remove(credential_id).is_some() {
            self.creds_by_request
                .retain(|_, cred| cred.credential_id != credential_id);
            info!(credential_id, "credential revoked");
        } else {
            debug!(credential_id, "credential already gone, nothing to revoke");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectMeta, ProtocolSignature};

    fn class(provisioner: &str) -> BucketClass {
        BucketClass {
            metadata: ObjectMeta::cluster("default-s3"),
            provisioner: provisioner.into(),
            is_default_bucket_class: true,
            additional_permitted_namespaces: Vec::new(),
            supported_protocols: vec![ProtocolSignature::S3],
            anonymous_access_modes: Vec::new(),
            release_policy: Default::default(),
            parameters: Default::default(),
        }
    }

    fn params(uid: &str) -> HashMap<String, String> {
        HashMap::from([(PARAM_REQUEST_UID.to_owned(), uid.to_owned())])
    }

    #[tokio::test]
    async fn provision_is_idempotent_by_request_uid() {
        let adapter = MemoryProvisioner::new("p1");
        let h1 = adapter.provision(&class("p1"), &params("uid-1")).await.unwrap();
        let h2 = adapter.provision(&class("p1"), &params("uid-1")).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(adapter.provision_calls(), 2);
        assert!(adapter.has_resource(&h1));

        let h3 = adapter.provision(&class("p1"), &params("uid-2")).await.unwrap();
        assert_ne!(h1, h3);
    }

    #[tokio::test]
    async fn provision_requires_request_uid() {
        let adapter = MemoryProvisioner::new("p1");
        let err = adapter
            .provision(&class("p1"), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CosiError::AdapterRejected(_)));
    }

    #[tokio::test]
    async fn provision_checks_provisioner_identity() {
        let adapter = MemoryProvisioner::new("p1");
        let err = adapter
            .provision(&class("other"), &params("uid-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CosiError::AdapterRejected(_)));
    }

    #[tokio::test]
    async fn deprovision_is_idempotent() {
        let adapter = MemoryProvisioner::new("p1");
        let handle = adapter.provision(&class("p1"), &params("uid-1")).await.unwrap();
        adapter.deprovision(&handle).await.unwrap();
        assert!(!adapter.has_resource(&handle));
        // Second call is a no-op, not an error.
        adapter.deprovision(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn grant_is_stable_until_rotation() {
        let adapter = MemoryProvisioner::new("p1");
        let handle = adapter.provision(&class("p1"), &params("uid-1")).await.unwrap();

        let c1 = adapter.grant(&handle, &params("acc-1")).await.unwrap();
        let c2 = adapter.grant(&handle, &params("acc-1")).await.unwrap();
        assert_eq!(c1.credential_id, c2.credential_id);
        assert_eq!(c1.data, c2.data);

        adapter.rotate_next();
        let c3 = adapter.grant(&handle, &params("acc-1")).await.unwrap();
        assert_ne!(c1.credential_id, c3.credential_id);
        assert!(!adapter.has_credential(&c1.credential_id));
        assert!(adapter.has_credential(&c3.credential_id));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let adapter = MemoryProvisioner::new("p1");
        let handle = adapter.provision(&class("p1"), &params("uid-1")).await.unwrap();
        let cred = adapter.grant(&handle, &params("acc-1")).await.unwrap();

        adapter.revoke(&handle, &cred.credential_id).await.unwrap();
        assert!(!adapter.has_credential(&cred.credential_id));
        adapter.revoke(&handle, &cred.credential_id).await.unwrap();

        // A fresh grant after revocation mints a new credential.
        let cred2 = adapter.grant(&handle, &params("acc-1")).await.unwrap();
        assert_ne!(cred.credential_id, cred2.credential_id);
    }

    #[tokio::test]
    async fn injected_faults_surface_then_clear() {
        let adapter = MemoryProvisioner::new("p1");
        adapter.fail_next(2);

        for _ in 0..2 {
            let err = adapter
                .provision(&class("p1"), &params("uid-1"))
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        adapter.provision(&class("p1"), &params("uid-1")).await.unwrap();

        adapter.reject_next();
        let err = adapter
            .provision(&class("p1"), &params("uid-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, CosiError::AdapterRejected(_)));
        assert!(!err.is_transient());
    }
}
