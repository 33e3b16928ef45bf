//! `BucketAccessRequest` ↔ `BucketAccess` binding site.
//!
//! Structurally the same pairing as the bucket site, with two extra
//! obligations: the referenced `BucketRequest` must itself be bound before
//! any bind work starts (credential issuance is meaningless against an
//! unbound bucket), and the Binding→Bound transition materializes the
//! minted credential into a `Secret`.  Re-issuing on retry must not produce
//! divergent credentials: the secret is only rewritten when the adapter
//! returns a different credential id, the explicit rotation signal.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::binder::{BindingSite, Precondition};
use crate::class::resolve_access_class;
use crate::error::CosiError;
use crate::provisioner::{
    PARAM_CREDENTIAL_ID, PARAM_REQUEST_UID, PARAM_RESOURCE_HANDLE, ProvisionerAdapter,
    ResourceHandle,
};
use crate::store::{Registry, Store};
use crate::types::{
    BindPhase, Bucket, BucketAccess, BucketAccessRequest, BucketAccessSpec, BucketAccessStatus,
    BucketRequest, Object, ObjectKey, ReleasePolicy, Secret, TypedReference,
};

/// Binding site for the access pairing.
pub struct AccessSite {
    registry: Arc<Registry>,
    adapter: Arc<dyn ProvisionerAdapter>,
}

impl AccessSite {
    pub fn new(registry: Arc<Registry>, adapter: Arc<dyn ProvisionerAdapter>) -> Self {
        Self { registry, adapter }
    }

    /// Resolve the bound bucket behind the request's `BucketRequest`
    /// reference.  Only meaningful once the precondition has passed.
    fn bound_bucket(&self, req: &BucketAccessRequest) -> Result<(BucketRequest, Bucket), CosiError> {
        let namespace = req.metadata.namespace.as_deref().unwrap_or_default();
        let bucket_req = self
            .registry
            .bucket_requests
            .get(&ObjectKey::namespaced(
                namespace,
                &req.spec.bucket_request_name,
            ))
            .ok_or_else(|| CosiError::NotFound {
                kind: BucketRequest::KIND.to_owned(),
                name: format!("{namespace}/{}", req.spec.bucket_request_name),
            })?;
        let bucket_name =
            bucket_req
                .status
                .bound_bucket_name
                .clone()
                .ok_or_else(|| CosiError::NotFound {
                    kind: Bucket::KIND.to_owned(),
                    name: format!("bound bucket of {namespace}/{}", req.spec.bucket_request_name),
                })?;
        let bucket = self
            .registry
            .buckets
            .get(&ObjectKey::cluster(bucket_name.clone()))
            .ok_or(CosiError::NotFound {
                kind: Bucket::KIND.to_owned(),
                name: bucket_name,
            })?;
        Ok((bucket_req, bucket))
    }

    /// Handle the bucket's backing resource is reachable under. Statically
    /// provisioned buckets have no recorded handle; their name stands in.
    fn bucket_handle(bucket: &Bucket) -> ResourceHandle {
        bucket
            .spec
            .parameters
            .get(PARAM_RESOURCE_HANDLE)
            .map(|h| ResourceHandle(h.clone()))
            .unwrap_or_else(|| ResourceHandle(bucket.metadata.name.clone()))
    }

    /// Name of the secret the credentials land in.
    fn secret_name(req: &BucketAccessRequest) -> String {
        req.spec
            .access_secret_name
            .clone()
            .unwrap_or_else(|| format!("{}-credentials", req.metadata.name))
    }

    /// Write (or rotate) the credential secret. Idempotent: an existing
    /// secret holding the same credential id is left untouched.
    fn materialize_secret(
        &self,
        req: &BucketAccessRequest,
        credential: &crate::provisioner::Credential,
    ) -> Result<(), CosiError> {
        let namespace = req.metadata.namespace.as_deref().unwrap_or_default();
        let name = Self::secret_name(req);
        let key = ObjectKey::namespaced(namespace, name.clone());

        match self.registry.secrets.get(&key) {
            None => {
                let secret = Secret {
                    metadata: crate::types::ObjectMeta::namespaced(namespace, name),
                    data: credential.data.clone(),
                    credential_id: credential.credential_id.clone(),
                };
                match self.registry.secrets.create(secret) {
                    Ok(_) => Ok(()),
                    // Concurrent worker won the create; the retry loop will
                    // re-verify the stored credential id.
                    Err(CosiError::AlreadyExists { .. }) => Err(CosiError::Conflict {
                        kind: Secret::KIND.to_owned(),
                        name: key.to_string(),
                    }),
                    Err(e) => Err(e),
                }
            }
            Some(existing) if existing.credential_id == credential.credential_id => {
                debug!(secret = %key, "credential secret up to date");
                Ok(())
            }
            Some(mut existing) => {
                // Differing id is the adapter's rotation signal.
                info!(secret = %key, "credential rotated, rewriting secret");
                existing.data = credential.data.clone();
                existing.credential_id = credential.credential_id.clone();
                self.registry.secrets.update(existing)?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BindingSite for AccessSite {
    type Request = BucketAccessRequest;
    type Target = BucketAccess;

    fn requests(&self) -> &Store<BucketAccessRequest> {
        &self.registry.bucket_access_requests
    }

    fn targets(&self) -> &Store<BucketAccess> {
        &self.registry.bucket_accesses
    }

    fn explicit_target(&self, req: &BucketAccessRequest) -> Option<String> {
        req.spec.bucket_access_name.clone()
    }

    fn generated_target_name(&self, req: &BucketAccessRequest) -> String {
        format!("access-{}", req.metadata.uid)
    }

    fn request_status(&self, req: &BucketAccessRequest) -> (BindPhase, String, Option<String>) {
        (
            req.status.phase,
            req.status.message.clone(),
            req.status.bound_bucket_access_name.clone(),
        )
    }

    fn set_request_status(
        &self,
        req: &BucketAccessRequest,
        phase: BindPhase,
        message: &str,
        bound: Option<&str>,
    ) -> Result<(), CosiError> {
        let mut updated = req.clone();
        updated.status.phase = phase;
        updated.status.message = message.to_owned();
        updated.status.bound_bucket_access_name = bound.map(str::to_owned);
        self.registry.bucket_access_requests.update_status(&updated)?;
        Ok(())
    }

    fn back_ref(&self, target: &BucketAccess) -> Option<TypedReference> {
        target.spec.bucket_access_request.clone()
    }

    /// Credential issuance is gated on the referenced bucket request being
    /// bound; until then the access request stays Pending.
    async fn precondition(&self, req: &BucketAccessRequest) -> Result<Precondition, CosiError> {
        let namespace = req.metadata.namespace.as_deref().unwrap_or_default();
        let key = ObjectKey::namespaced(namespace, &req.spec.bucket_request_name);
        let Some(bucket_req) = self.registry.bucket_requests.get(&key) else {
            return Ok(Precondition::Wait(format!(
                "bucket request {key} not found"
            )));
        };
        if bucket_req.status.phase != BindPhase::Bound {
            return Ok(Precondition::Wait("target bucket not yet bound".to_owned()));
        }
        Ok(Precondition::Ready)
    }

    fn check_compatible(
        &self,
        req: &BucketAccessRequest,
        target: &BucketAccess,
    ) -> Result<(), CosiError> {
        let (_, bucket) = self.bound_bucket(req)?;
        resolve_access_class(
            req.spec.bucket_access_class_name.as_deref(),
            &bucket.spec.protocol,
            &self.registry.bucket_access_classes.list(),
        )?;
        if !target.spec.provisioner.is_empty() && target.spec.provisioner != bucket.spec.provisioner
        {
            return Err(CosiError::InvalidArgument(format!(
                "bucket access {} belongs to provisioner {}, bucket {} to {}",
                target.metadata.name,
                target.spec.provisioner,
                bucket.metadata.name,
                bucket.spec.provisioner
            )));
        }
        Ok(())
    }

    fn bind_target(
        &self,
        mut target: BucketAccess,
        req: &BucketAccessRequest,
    ) -> Result<BucketAccess, CosiError> {
        let holder = TypedReference::to(&req.metadata);
        target.spec.bucket_access_request = Some(holder.clone());
        if target.spec.service_account_name.is_none() {
            target.spec.service_account_name = req.spec.service_account_name.clone();
        }
        if target.spec.key_secret_name.is_none() {
            target.spec.key_secret_name = Some(Self::secret_name(req));
        }
        target.status = BucketAccessStatus {
            phase: BindPhase::Bound,
            message: format!("bound to {holder}"),
        };
        self.registry.bucket_accesses.update(target)
    }

    async fn provision_target(
        &self,
        req: &BucketAccessRequest,
        desired_name: Option<&str>,
    ) -> Result<BucketAccess, CosiError> {
        let (_, bucket) = self.bound_bucket(req)?;
        let class = resolve_access_class(
            req.spec.bucket_access_class_name.as_deref(),
            &bucket.spec.protocol,
            &self.registry.bucket_access_classes.list(),
        )?;

        let name = desired_name
            .map(str::to_owned)
            .unwrap_or_else(|| self.generated_target_name(req));
        let holder = TypedReference::to(&req.metadata);

        let mut parameters: HashMap<String, String> = class
            .as_ref()
            .map(|c| c.parameters.clone())
            .unwrap_or_default();
        parameters.insert(
            PARAM_RESOURCE_HANDLE.to_owned(),
            Self::bucket_handle(&bucket).0,
        );

        let mut access = BucketAccess::new(
            name.clone(),
            BucketAccessSpec {
                bucket_access_request: Some(holder.clone()),
                service_account_name: req.spec.service_account_name.clone(),
                key_secret_name: Some(Self::secret_name(req)),
                provisioner: bucket.spec.provisioner.clone(),
                parameters,
            },
        );
        access.status = BucketAccessStatus {
            phase: BindPhase::Bound,
            message: format!("bound to {holder}"),
        };

        match self.registry.bucket_accesses.create(access) {
            Ok(created) => Ok(created),
            Err(CosiError::AlreadyExists { .. }) => {
                let existing = self
                    .registry
                    .bucket_accesses
                    .get(&ObjectKey::cluster(name.clone()))
                    .ok_or(CosiError::Conflict {
                        kind: BucketAccess::KIND.to_owned(),
                        name: name.clone(),
                    })?;
                match existing.spec.bucket_access_request.as_ref() {
                    Some(r) if r.matches(&req.metadata) => Ok(existing),
                    Some(r) => Err(CosiError::AlreadyBound {
                        target: name,
                        holder: r.to_string(),
                    }),
                    None => Err(CosiError::Conflict {
                        kind: BucketAccess::KIND.to_owned(),
                        name,
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Grant credentials and materialize the secret. Part of the
    /// Binding→Bound transition, after the back-reference is durable and
    /// before the request reads Bound.
    async fn on_bind(
        &self,
        req: &BucketAccessRequest,
        target: &BucketAccess,
    ) -> Result<(), CosiError> {
        let (_, bucket) = self.bound_bucket(req)?;
        let handle = Self::bucket_handle(&bucket);

        let mut grant_params: HashMap<String, String> = target.spec.parameters.clone();
        grant_params.insert(PARAM_REQUEST_UID.to_owned(), req.metadata.uid.clone());
        let credential = self.adapter.grant(&handle, &grant_params).await?;

        // Record the credential id on the grant so release can revoke it.
        if target.spec.parameters.get(PARAM_CREDENTIAL_ID) != Some(&credential.credential_id) {
            let mut fresh = self
                .registry
                .bucket_accesses
                .get(&target.key())
                .ok_or(CosiError::Conflict {
                    kind: BucketAccess::KIND.to_owned(),
                    name: target.metadata.name.clone(),
                })?;
            fresh
                .spec
                .parameters
                .insert(PARAM_CREDENTIAL_ID.to_owned(), credential.credential_id.clone());
            self.registry.bucket_accesses.update(fresh)?;
        }

        self.materialize_secret(req, &credential)
    }

    /// Credentials are always revoked when their pairing ends; there is no
    /// retain semantics for an access grant.
    fn release_policy(&self, _target: &BucketAccess) -> ReleasePolicy {
        ReleasePolicy::Delete
    }

    async fn teardown(&self, target: &BucketAccess) -> Result<(), CosiError> {
        if let Some(credential_id) = target.spec.parameters.get(PARAM_CREDENTIAL_ID) {
            let handle = target
                .spec
                .parameters
                .get(PARAM_RESOURCE_HANDLE)
                .map(|h| ResourceHandle(h.clone()))
                .unwrap_or_else(|| ResourceHandle(target.metadata.name.clone()));
            self.adapter.revoke(&handle, credential_id).await?;
        }

        // Remove the materialized secret alongside the credential.
        if let Some(secret_name) = target.spec.key_secret_name.as_deref()
            && let Some(holder) = target.spec.bucket_access_request.as_ref()
        {
            let namespace = holder.namespace.as_deref().unwrap_or_default();
            let key = ObjectKey::namespaced(namespace, secret_name);
            match self.registry.secrets.remove(&key) {
                Ok(_) => debug!(secret = %key, "credential secret removed"),
                Err(CosiError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn clear_binding(&self, mut target: BucketAccess, message: &str) -> Result<(), CosiError> {
        target.spec.bucket_access_request = None;
        target.status = BucketAccessStatus {
            phase: BindPhase::Pending,
            message: message.to_owned(),
        };
        self.registry.bucket_accesses.update(target)?;
        Ok(())
    }
}
