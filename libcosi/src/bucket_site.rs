//! `BucketRequest` ↔ `Bucket` binding site.
//!
//! Supplies the bucket-pair capability set to the generic engine: protocol
//! and namespace-permission checks for direct binds, and class-resolved
//! dynamic provisioning through the adapter for everything else.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::binder::{BindingSite, Precondition};
use crate::class::{namespace_permitted, resolve_bucket_class};
use crate::error::CosiError;
use crate::provisioner::{
    PARAM_REQUEST_UID, PARAM_RESOURCE_HANDLE, ProvisionerAdapter, ResourceHandle,
};
use crate::store::{Registry, Store};
use crate::types::{
    BindPhase, Bucket, BucketRequest, BucketSpec, BucketStatus, NamespaceRef, Object, ObjectKey,
    ReleasePolicy, TypedReference,
};

/// Binding site for the bucket pairing.
pub struct BucketSite {
    registry: Arc<Registry>,
    adapter: Arc<dyn ProvisionerAdapter>,
}

impl BucketSite {
    pub fn new(registry: Arc<Registry>, adapter: Arc<dyn ProvisionerAdapter>) -> Self {
        Self { registry, adapter }
    }

    fn bucket_class(&self, bucket: &Bucket) -> Option<crate::types::BucketClass> {
        let name = bucket.spec.bucket_class_name.as_deref()?;
        self.registry.bucket_classes.get(&ObjectKey::cluster(name))
    }
}

#[async_trait]
impl BindingSite for BucketSite {
    type Request = BucketRequest;
    type Target = Bucket;

    fn requests(&self) -> &Store<BucketRequest> {
        &self.registry.bucket_requests
    }

    fn targets(&self) -> &Store<Bucket> {
        &self.registry.buckets
    }

    fn explicit_target(&self, req: &BucketRequest) -> Option<String> {
        req.spec.bucket_name.clone()
    }

    fn generated_target_name(&self, req: &BucketRequest) -> String {
        let prefix = req.spec.bucket_prefix.as_deref().unwrap_or("bucket");
        format!("{prefix}-{}", req.metadata.uid)
    }

    fn request_status(&self, req: &BucketRequest) -> (BindPhase, String, Option<String>) {
        (
            req.status.phase,
            req.status.message.clone(),
            req.status.bound_bucket_name.clone(),
        )
    }

    fn set_request_status(
        &self,
        req: &BucketRequest,
        phase: BindPhase,
        message: &str,
        bound: Option<&str>,
    ) -> Result<(), CosiError> {
        let mut updated = req.clone();
        updated.status.phase = phase;
        updated.status.message = message.to_owned();
        updated.status.bound_bucket_name = bound.map(str::to_owned);
        self.registry.bucket_requests.update_status(&updated)?;
        Ok(())
    }

    fn back_ref(&self, target: &Bucket) -> Option<TypedReference> {
        target.spec.bucket_request.clone()
    }

    async fn precondition(&self, _req: &BucketRequest) -> Result<Precondition, CosiError> {
        Ok(Precondition::Ready)
    }

    fn check_compatible(&self, req: &BucketRequest, target: &Bucket) -> Result<(), CosiError> {
        if req.spec.protocol.signature != target.spec.protocol.signature {
            return Err(CosiError::ProtocolMismatch {
                protocol: req.spec.protocol.signature,
                target: target.metadata.name.clone(),
            });
        }
        let namespace = req.metadata.namespace.as_deref().unwrap_or_default();
        let class = self.bucket_class(target);
        if !namespace_permitted(namespace, target, class.as_ref()) {
            return Err(CosiError::NamespaceNotPermitted {
                namespace: namespace.to_owned(),
                bucket: target.metadata.name.clone(),
            });
        }
        Ok(())
    }

    fn bind_target(&self, mut target: Bucket, req: &BucketRequest) -> Result<Bucket, CosiError> {
        let holder = TypedReference::to(&req.metadata);
        target.spec.bucket_request = Some(holder.clone());
        target.status = BucketStatus {
            phase: BindPhase::Bound,
            message: format!("bound to {holder}"),
        };
        self.registry.buckets.update(target)
    }

    async fn provision_target(
        &self,
        req: &BucketRequest,
        desired_name: Option<&str>,
    ) -> Result<Bucket, CosiError> {
        let classes = self.registry.bucket_classes.list();
        let class = resolve_bucket_class(
            req.spec.bucket_class_name.as_deref(),
            &req.spec.protocol,
            &classes,
        )?;

        let mut provision_params = class.parameters.clone();
        provision_params.insert(PARAM_REQUEST_UID.to_owned(), req.metadata.uid.clone());
        let handle = self.adapter.provision(&class, &provision_params).await?;

        let name = desired_name
            .map(str::to_owned)
            .unwrap_or_else(|| self.generated_target_name(req));
        let holder = TypedReference::to(&req.metadata);

        let mut parameters: HashMap<String, String> = class.parameters.clone();
        parameters.insert(PARAM_RESOURCE_HANDLE.to_owned(), handle.0.clone());

        let mut bucket = Bucket::new(
            name.clone(),
            BucketSpec {
                provisioner: class.provisioner.clone(),
                release_policy: class.release_policy,
                anonymous_access_mode: class
                    .anonymous_access_modes
                    .first()
                    .copied()
                    .unwrap_or_default(),
                bucket_class_name: Some(class.metadata.name.clone()),
                permitted_namespaces: req
                    .metadata
                    .namespace
                    .as_deref()
                    .map(|ns| vec![NamespaceRef::named(ns)])
                    .unwrap_or_default(),
                protocol: req.spec.protocol.clone(),
                parameters,
                bucket_request: Some(holder.clone()),
            },
        );
        bucket.status = BucketStatus {
            phase: BindPhase::Bound,
            message: format!("bound to {holder}"),
        };

        match self.registry.buckets.create(bucket) {
            Ok(created) => Ok(created),
            Err(CosiError::AlreadyExists { .. }) => {
                // Crash-retry convergence: the entity may already exist from
                // a prior pass of this same request.
                let existing = self
                    .registry
                    .buckets
                    .get(&ObjectKey::cluster(name.clone()))
                    .ok_or(CosiError::Conflict {
                        kind: Bucket::KIND.to_owned(),
                        name: name.clone(),
                    })?;
                match existing.spec.bucket_request.as_ref() {
                    Some(r) if r.matches(&req.metadata) => Ok(existing),
                    Some(r) => Err(CosiError::AlreadyBound {
                        target: name,
                        holder: r.to_string(),
                    }),
                    // Unbound bucket appeared under this name between the
                    // lookup and the create; re-reconcile will direct-bind it.
                    None => Err(CosiError::Conflict {
                        kind: Bucket::KIND.to_owned(),
                        name,
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn on_bind(&self, _req: &BucketRequest, _target: &Bucket) -> Result<(), CosiError> {
        Ok(())
    }

    fn release_policy(&self, target: &Bucket) -> ReleasePolicy {
        target.spec.release_policy
    }

    async fn teardown(&self, target: &Bucket) -> Result<(), CosiError> {
        match target.spec.parameters.get(PARAM_RESOURCE_HANDLE) {
            Some(handle) => {
                self.adapter
                    .deprovision(&ResourceHandle(handle.clone()))
                    .await
            }
            None => {
                // Statically provisioned bucket: nothing was created through
                // the adapter, so there is nothing to tear down.
                debug!(bucket = %target.metadata.name, "no resource handle, skipping deprovision");
                Ok(())
            }
        }
    }

    fn clear_binding(&self, mut target: Bucket, message: &str) -> Result<(), CosiError> {
        target.spec.bucket_request = None;
        target.status = BucketStatus {
            phase: BindPhase::Pending,
            message: message.to_owned(),
        };
        self.registry.buckets.update(target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryProvisioner;
    use crate::binder::BindingEngine;
    use crate::types::{
        BucketClass, BucketRequestSpec, ObjectMeta, Protocol, ProtocolSignature,
    };

    fn setup() -> (
        Arc<Registry>,
        Arc<MemoryProvisioner>,
        Arc<BindingEngine<BucketSite>>,
    ) {
        let registry = Arc::new(Registry::new());
        let adapter = Arc::new(MemoryProvisioner::new("p1"));
        let site = BucketSite::new(
            Arc::clone(&registry),
            Arc::clone(&adapter) as Arc<dyn ProvisionerAdapter>,
        );
        let engine = Arc::new(BindingEngine::new(site, Default::default()));
        (registry, adapter, engine)
    }

    fn default_class(registry: &Registry, release_policy: ReleasePolicy) {
        registry
            .bucket_classes
            .create(BucketClass {
                metadata: ObjectMeta::cluster("default-s3"),
                provisioner: "p1".into(),
                is_default_bucket_class: true,
                additional_permitted_namespaces: Vec::new(),
                supported_protocols: vec![ProtocolSignature::S3],
                anonymous_access_modes: Vec::new(),
                release_policy,
                parameters: HashMap::from([("region".into(), "eu-1".into())]),
            })
            .unwrap();
    }

    fn request(namespace: &str, name: &str, bucket_name: Option<&str>) -> BucketRequest {
        BucketRequest::new(
            namespace,
            name,
            BucketRequestSpec {
                bucket_name: bucket_name.map(str::to_owned),
                secret_name: None,
                bucket_prefix: None,
                bucket_class_name: None,
                protocol: Protocol::new(ProtocolSignature::S3),
            },
        )
    }

    fn static_bucket(name: &str, permitted: &[&str], signature: ProtocolSignature) -> Bucket {
        Bucket::new(
            name,
            BucketSpec {
                provisioner: "p1".into(),
                release_policy: ReleasePolicy::Retain,
                anonymous_access_mode: Default::default(),
                bucket_class_name: None,
                permitted_namespaces: permitted
                    .iter()
                    .map(|ns| NamespaceRef::named(*ns))
                    .collect(),
                protocol: Protocol::new(signature),
                parameters: HashMap::new(),
                bucket_request: None,
            },
        )
    }

    #[tokio::test]
    async fn dynamic_provisioning_via_default_class() {
        let (registry, adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Retain);

        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", None))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert_eq!(req.status.phase, BindPhase::Bound);
        let bucket_name = req.status.bound_bucket_name.clone().unwrap();

        let bucket = registry
            .buckets
            .get(&ObjectKey::cluster(bucket_name))
            .unwrap();
        assert_eq!(bucket.spec.provisioner, "p1");
        assert_eq!(bucket.spec.release_policy, ReleasePolicy::Retain);
        assert_eq!(bucket.status.phase, BindPhase::Bound);
        assert!(
            bucket
                .spec
                .bucket_request
                .as_ref()
                .unwrap()
                .matches(&req.metadata)
        );
        assert!(bucket.spec.parameters.contains_key(PARAM_RESOURCE_HANDLE));
        assert_eq!(adapter.provision_calls(), 1);
    }

    #[tokio::test]
    async fn bound_request_reconcile_is_a_noop() {
        let (registry, adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Retain);
        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", None))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let req_before = registry.bucket_requests.get(&req.key()).unwrap();
        let bucket_key = ObjectKey::cluster(req_before.status.bound_bucket_name.clone().unwrap());
        let bucket_before = registry.buckets.get(&bucket_key).unwrap();

        for _ in 0..3 {
            engine.reconcile(&req.key()).await.unwrap();
        }

        // No adapter calls and no store writes.
        assert_eq!(adapter.provision_calls(), 1);
        let req_after = registry.bucket_requests.get(&req.key()).unwrap();
        let bucket_after = registry.buckets.get(&bucket_key).unwrap();
        assert_eq!(
            req_after.metadata.resource_version,
            req_before.metadata.resource_version
        );
        assert_eq!(
            bucket_after.metadata.resource_version,
            bucket_before.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn direct_bind_to_existing_bucket() {
        let (registry, adapter, engine) = setup();
        registry
            .buckets
            .create(static_bucket("shared", &["ns-a"], ProtocolSignature::S3))
            .unwrap();

        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", Some("shared")))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert_eq!(req.status.phase, BindPhase::Bound);
        assert_eq!(req.status.bound_bucket_name.as_deref(), Some("shared"));

        let bucket = registry.buckets.get(&ObjectKey::cluster("shared")).unwrap();
        assert!(
            bucket
                .spec
                .bucket_request
                .as_ref()
                .unwrap()
                .matches(&req.metadata)
        );
        // Static bind: nothing was provisioned.
        assert_eq!(adapter.provision_calls(), 0);
    }

    #[tokio::test]
    async fn direct_bind_rejected_for_foreign_namespace() {
        let (registry, _adapter, engine) = setup();
        registry
            .buckets
            .create(static_bucket("shared", &["ns-a"], ProtocolSignature::S3))
            .unwrap();

        let req = registry
            .bucket_requests
            .create(request("ns-b", "req-1", Some("shared")))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert_eq!(req.status.phase, BindPhase::Pending);
        assert!(req.status.message.contains("not permitted"));

        let bucket = registry.buckets.get(&ObjectKey::cluster("shared")).unwrap();
        assert!(bucket.spec.bucket_request.is_none());
    }

    #[tokio::test]
    async fn class_namespaces_extend_the_permitted_set() {
        let (registry, _adapter, engine) = setup();
        registry
            .bucket_classes
            .create(BucketClass {
                metadata: ObjectMeta::cluster("gold"),
                provisioner: "p1".into(),
                is_default_bucket_class: false,
                additional_permitted_namespaces: vec![NamespaceRef::named("ns-b")],
                supported_protocols: vec![ProtocolSignature::S3],
                anonymous_access_modes: Vec::new(),
                release_policy: Default::default(),
                parameters: Default::default(),
            })
            .unwrap();
        let mut bucket = static_bucket("shared", &["ns-a"], ProtocolSignature::S3);
        bucket.spec.bucket_class_name = Some("gold".into());
        registry.buckets.create(bucket).unwrap();

        let req = registry
            .bucket_requests
            .create(request("ns-b", "req-1", Some("shared")))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert_eq!(req.status.phase, BindPhase::Bound);
    }

    #[tokio::test]
    async fn direct_bind_rejected_on_protocol_mismatch() {
        let (registry, _adapter, engine) = setup();
        registry
            .buckets
            .create(static_bucket("shared", &[], ProtocolSignature::Gcs))
            .unwrap();

        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", Some("shared")))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert_eq!(req.status.phase, BindPhase::Pending);
        assert!(req.status.message.contains("not supported"));
    }

    #[tokio::test]
    async fn contested_target_without_class_surfaces_already_bound() {
        let (registry, _adapter, engine) = setup();
        registry
            .buckets
            .create(static_bucket("shared", &[], ProtocolSignature::S3))
            .unwrap();

        let winner = registry
            .bucket_requests
            .create(request("ns-a", "winner", Some("shared")))
            .unwrap();
        engine.reconcile(&winner.key()).await.unwrap();

        let loser = registry
            .bucket_requests
            .create(request("ns-a", "loser", Some("shared")))
            .unwrap();
        engine.reconcile(&loser.key()).await.unwrap();

        let loser = registry.bucket_requests.get(&loser.key()).unwrap();
        assert_eq!(loser.status.phase, BindPhase::Pending);
        assert!(loser.status.message.contains("already bound"));

        // The winner's binding is untouched.
        let bucket = registry.buckets.get(&ObjectKey::cluster("shared")).unwrap();
        assert!(
            bucket
                .spec
                .bucket_request
                .as_ref()
                .unwrap()
                .matches(&winner.metadata)
        );
    }

    #[tokio::test]
    async fn contested_target_falls_back_to_dynamic_provisioning() {
        let (registry, adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Retain);
        registry
            .buckets
            .create(static_bucket("shared", &[], ProtocolSignature::S3))
            .unwrap();

        let winner = registry
            .bucket_requests
            .create(request("ns-a", "winner", Some("shared")))
            .unwrap();
        engine.reconcile(&winner.key()).await.unwrap();

        let loser = registry
            .bucket_requests
            .create(request("ns-a", "loser", Some("shared")))
            .unwrap();
        engine.reconcile(&loser.key()).await.unwrap();

        let loser = registry.bucket_requests.get(&loser.key()).unwrap();
        assert_eq!(loser.status.phase, BindPhase::Bound);
        let fallback = loser.status.bound_bucket_name.clone().unwrap();
        assert_ne!(fallback, "shared");
        assert_eq!(adapter.provision_calls(), 1);
    }

    #[tokio::test]
    async fn explicit_name_with_no_bucket_provisions_under_it() {
        let (registry, _adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Retain);

        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", Some("wanted-name")))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert_eq!(req.status.phase, BindPhase::Bound);
        assert_eq!(req.status.bound_bucket_name.as_deref(), Some("wanted-name"));
        assert!(
            registry
                .buckets
                .get(&ObjectKey::cluster("wanted-name"))
                .is_some()
        );
    }

    #[tokio::test]
    async fn bucket_prefix_names_the_provisioned_bucket() {
        let (registry, _adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Retain);

        let mut req = request("ns-a", "req-1", None);
        req.spec.bucket_prefix = Some("data".into());
        let req = registry.bucket_requests.create(req).unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert!(
            req.status
                .bound_bucket_name
                .as_deref()
                .unwrap()
                .starts_with("data-")
        );
    }

    #[tokio::test]
    async fn concurrent_reconciles_of_one_request_produce_one_binding() {
        let (registry, adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Retain);
        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", None))
            .unwrap();
        let key = req.key();

        // Two workers race on the same request; losers surface Conflict,
        // which real callers retry.
        let (a, b) = tokio::join!(
            {
                let engine = Arc::clone(&engine);
                let key = key.clone();
                async move { engine.reconcile(&key).await }
            },
            {
                let engine = Arc::clone(&engine);
                let key = key.clone();
                async move { engine.reconcile(&key).await }
            }
        );
        for result in [a, b] {
            if let Err(e) = result {
                assert!(e.is_transient(), "unexpected terminal error: {e}");
            }
        }
        engine.reconcile(&key).await.unwrap();

        let req = registry.bucket_requests.get(&key).unwrap();
        assert_eq!(req.status.phase, BindPhase::Bound);
        let referencing: Vec<_> = registry
            .buckets
            .list()
            .into_iter()
            .filter(|b| {
                b.spec
                    .bucket_request
                    .as_ref()
                    .is_some_and(|r| r.matches(&req.metadata))
            })
            .collect();
        assert_eq!(referencing.len(), 1);
        // The adapter de-duplicated by request UID.
        assert!(adapter.has_resource(&ResourceHandle(
            referencing[0].spec.parameters[PARAM_RESOURCE_HANDLE].clone()
        )));
    }

    #[tokio::test]
    async fn racing_requests_for_one_target_yield_one_winner() {
        let (registry, _adapter, engine) = setup();
        registry
            .buckets
            .create(static_bucket("shared", &[], ProtocolSignature::S3))
            .unwrap();

        let req_a = registry
            .bucket_requests
            .create(request("ns-a", "req-a", Some("shared")))
            .unwrap();
        let req_b = registry
            .bucket_requests
            .create(request("ns-a", "req-b", Some("shared")))
            .unwrap();

        let (a, b) = tokio::join!(
            {
                let engine = Arc::clone(&engine);
                let key = req_a.key();
                async move { engine.reconcile(&key).await }
            },
            {
                let engine = Arc::clone(&engine);
                let key = req_b.key();
                async move { engine.reconcile(&key).await }
            }
        );
        for result in [a, b] {
            if let Err(e) = result {
                assert!(e.is_transient(), "unexpected terminal error: {e}");
            }
        }
        // Settle both; idempotent for the winner, terminal for the loser.
        engine.reconcile(&req_a.key()).await.unwrap();
        engine.reconcile(&req_b.key()).await.unwrap();

        let a = registry.bucket_requests.get(&req_a.key()).unwrap();
        let b = registry.bucket_requests.get(&req_b.key()).unwrap();
        let bound: Vec<_> = [&a, &b]
            .into_iter()
            .filter(|r| r.status.phase == BindPhase::Bound)
            .collect();
        assert_eq!(bound.len(), 1, "exactly one request may win the target");

        let bucket = registry.buckets.get(&ObjectKey::cluster("shared")).unwrap();
        assert!(
            bucket
                .spec
                .bucket_request
                .as_ref()
                .unwrap()
                .matches(&bound[0].metadata)
        );
    }

    #[tokio::test]
    async fn release_with_delete_policy_deprovisions_before_removal() {
        let (registry, adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Delete);
        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", None))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let bucket_name = registry
            .bucket_requests
            .get(&req.key())
            .unwrap()
            .status
            .bound_bucket_name
            .clone()
            .unwrap();
        let handle = ResourceHandle(
            registry
                .buckets
                .get(&ObjectKey::cluster(bucket_name.clone()))
                .unwrap()
                .spec
                .parameters[PARAM_RESOURCE_HANDLE]
                .clone(),
        );

        registry.bucket_requests.mark_deleted(&req.key()).unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        assert_eq!(adapter.deprovision_calls(), 1);
        assert!(!adapter.has_resource(&handle));
        assert!(
            registry
                .buckets
                .get(&ObjectKey::cluster(bucket_name))
                .is_none()
        );
        assert!(registry.bucket_requests.get(&req.key()).is_none());
    }

    #[tokio::test]
    async fn release_with_retain_policy_keeps_bucket_and_clears_binding() {
        let (registry, adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Retain);
        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", None))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let bucket_name = registry
            .bucket_requests
            .get(&req.key())
            .unwrap()
            .status
            .bound_bucket_name
            .clone()
            .unwrap();

        registry.bucket_requests.mark_deleted(&req.key()).unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        assert_eq!(adapter.deprovision_calls(), 0);
        let bucket = registry
            .buckets
            .get(&ObjectKey::cluster(bucket_name))
            .unwrap();
        assert!(bucket.spec.bucket_request.is_none());
        assert_eq!(bucket.status.phase, BindPhase::Pending);
        assert!(bucket.status.message.contains("retained"));
        assert!(registry.bucket_requests.get(&req.key()).is_none());
    }

    #[tokio::test]
    async fn teardown_failure_blocks_deletion_until_retried() {
        let (registry, adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Delete);
        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", None))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        adapter.fail_next(1);
        registry.bucket_requests.mark_deleted(&req.key()).unwrap();
        let err = engine.reconcile(&req.key()).await.unwrap_err();
        assert!(err.is_transient());
        // Nothing was removed while teardown is failing.
        assert!(registry.bucket_requests.get(&req.key()).is_some());
        assert_eq!(registry.buckets.list().len(), 1);

        engine.reconcile(&req.key()).await.unwrap();
        assert!(registry.bucket_requests.get(&req.key()).is_none());
        assert!(registry.buckets.list().is_empty());
    }

    #[tokio::test]
    async fn deleting_the_bucket_releases_the_request_terminally() {
        let (registry, _adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Retain);
        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", None))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let bucket_key = ObjectKey::cluster(
            registry
                .bucket_requests
                .get(&req.key())
                .unwrap()
                .status
                .bound_bucket_name
                .clone()
                .unwrap(),
        );
        registry.buckets.mark_deleted(&bucket_key).unwrap();
        engine.release_target(&bucket_key).await.unwrap();

        assert!(registry.buckets.get(&bucket_key).is_none());
        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert_eq!(req.status.phase, BindPhase::Released);

        // Released is terminal: the request never rebinds.
        engine.reconcile(&req.key()).await.unwrap();
        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert_eq!(req.status.phase, BindPhase::Released);
        assert_eq!(registry.buckets.list().len(), 0);
    }

    #[tokio::test]
    async fn terminal_errors_can_fail_the_request_by_policy() {
        let (registry, _adapter, _) = setup();
        let adapter = Arc::new(MemoryProvisioner::new("p1"));
        let engine = BindingEngine::new(
            BucketSite::new(
                Arc::clone(&registry),
                Arc::clone(&adapter) as Arc<dyn ProvisionerAdapter>,
            ),
            crate::binder::BindingConfig {
                fail_on_terminal_errors: true,
            },
        );

        // No classes exist: dynamic provisioning cannot resolve a default.
        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", None))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        let req = registry.bucket_requests.get(&req.key()).unwrap();
        assert_eq!(req.status.phase, BindPhase::Failed);
        assert!(req.status.message.contains("no default class"));
    }

    #[tokio::test]
    async fn request_deleted_mid_binding_does_not_leak_the_bucket() {
        let (registry, adapter, engine) = setup();
        default_class(&registry, ReleasePolicy::Delete);
        let req = registry
            .bucket_requests
            .create(request("ns-a", "req-1", None))
            .unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        // Simulate a crash between the bucket's back-reference commit and
        // the request status write: the bucket exists bound to the request,
        // but the request status never recorded it.
        let mut stale = registry.bucket_requests.get(&req.key()).unwrap();
        stale.status = Default::default();
        registry.bucket_requests.update_status(&stale).unwrap();

        registry.bucket_requests.mark_deleted(&req.key()).unwrap();
        engine.reconcile(&req.key()).await.unwrap();

        // Release found the bucket through its generated name.
        assert!(registry.buckets.list().is_empty());
        assert_eq!(adapter.deprovision_calls(), 1);
        assert!(registry.bucket_requests.get(&req.key()).is_none());
    }
}
