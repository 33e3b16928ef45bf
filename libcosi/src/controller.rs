//! Reconciliation workers.
//!
//! Wires the store watch streams to the two binding engines.  Every event
//! spawns an independent Tokio task, so reconciliation of one request never
//! blocks an unrelated one, and duplicate concurrent reconciliation of the
//! same request is tolerated by the stores' version-token discipline rather
//! than by any in-memory lock.  A periodic resync re-enqueues everything
//! still pending, covering lagged watchers and requests waiting on external
//! state (e.g. access requests gated on their bucket).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::access_site::AccessSite;
use crate::binder::{BindingConfig, BindingEngine, BindingSite};
use crate::bucket_site::BucketSite;
use crate::provisioner::ProvisionerAdapter;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::store::{Event, Registry};
use crate::types::{BindPhase, Object, ObjectKey};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval of the full re-list that re-enqueues pending work.
    pub resync_interval: Duration,
    /// Backoff applied to transient reconcile failures.
    pub retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Runs the binding engines against a [`Registry`].
pub struct Controller {
    registry: Arc<Registry>,
    buckets: Arc<BindingEngine<BucketSite>>,
    accesses: Arc<BindingEngine<AccessSite>>,
    config: ControllerConfig,
}

impl Controller {
    /// Build a controller with both engines sharing one adapter.
    pub fn new(
        registry: Arc<Registry>,
        adapter: Arc<dyn ProvisionerAdapter>,
        binding: BindingConfig,
        config: ControllerConfig,
    ) -> Self {
        let buckets = Arc::new(BindingEngine::new(
            BucketSite::new(Arc::clone(&registry), Arc::clone(&adapter)),
            binding.clone(),
        ));
        let accesses = Arc::new(BindingEngine::new(
            AccessSite::new(Arc::clone(&registry), adapter),
            binding,
        ));
        Self {
            registry,
            buckets,
            accesses,
            config,
        }
    }

    /// The bucket-pair engine, for direct reconciliation in tests and tools.
    pub fn bucket_engine(&self) -> Arc<BindingEngine<BucketSite>> {
        Arc::clone(&self.buckets)
    }

    /// The access-pair engine.
    pub fn access_engine(&self) -> Arc<BindingEngine<AccessSite>> {
        Arc::clone(&self.accesses)
    }

    /// Run all worker loops until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!("starting COSI controller workers");
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(Self::request_loop(
            Arc::clone(&self),
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(Self::bucket_loop(
            Arc::clone(&self),
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(Self::access_request_loop(
            Arc::clone(&self),
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(Self::access_loop(
            Arc::clone(&self),
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(Self::resync_loop(
            Arc::clone(&self),
            shutdown.clone(),
        )));

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "controller worker panicked");
            }
        }
        info!("COSI controller workers stopped");
    }

    fn spawn_reconcile<S>(engine: Arc<BindingEngine<S>>, key: ObjectKey, retry: RetryConfig)
    where
        S: BindingSite + 'static,
    {
        tokio::spawn(async move {
            let result =
                retry_with_backoff(&retry, "reconcile", || engine.reconcile(&key)).await;
            if let Err(e) = result {
                warn!(kind = S::Request::KIND, request = %key, error = %e,
                    "reconcile failed, waiting for resync");
            }
        });
    }

    fn spawn_release_target<S>(engine: Arc<BindingEngine<S>>, key: ObjectKey, retry: RetryConfig)
    where
        S: BindingSite + 'static,
    {
        tokio::spawn(async move {
            let result =
                retry_with_backoff(&retry, "release_target", || engine.release_target(&key)).await;
            if let Err(e) = result {
                warn!(kind = S::Target::KIND, target = %key, error = %e,
                    "target release failed, waiting for resync");
            }
        });
    }

    async fn request_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self.registry.bucket_requests.watch();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = rx.recv() => match event {
                    Ok(Event::Applied(req)) => {
                        Self::spawn_reconcile(
                            Arc::clone(&self.buckets),
                            req.key(),
                            self.config.retry.clone(),
                        );
                        // A request reaching Bound unblocks access requests
                        // referencing it.
                        if req.status.phase == BindPhase::Bound {
                            self.enqueue_dependent_access_requests(&req.metadata.name,
                                req.metadata.namespace.as_deref());
                        }
                    }
                    Ok(Event::Deleted(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "bucket request watcher lagged, resyncing");
                        self.resync_bucket_requests();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("bucket request loop stopped");
    }

    async fn bucket_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self.registry.buckets.watch();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = rx.recv() => match event {
                    Ok(Event::Applied(bucket)) => {
                        if bucket.metadata.deletion_timestamp.is_some() {
                            Self::spawn_release_target(
                                Arc::clone(&self.buckets),
                                bucket.key(),
                                self.config.retry.clone(),
                            );
                        }
                    }
                    Ok(Event::Deleted(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "bucket watcher lagged, resyncing");
                        self.resync_buckets();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("bucket loop stopped");
    }

    async fn access_request_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self.registry.bucket_access_requests.watch();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = rx.recv() => match event {
                    Ok(Event::Applied(req)) => {
                        Self::spawn_reconcile(
                            Arc::clone(&self.accesses),
                            req.key(),
                            self.config.retry.clone(),
                        );
                    }
                    Ok(Event::Deleted(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "access request watcher lagged, resyncing");
                        self.resync_access_requests();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("access request loop stopped");
    }

    async fn access_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self.registry.bucket_accesses.watch();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = rx.recv() => match event {
                    Ok(Event::Applied(access)) => {
                        if access.metadata.deletion_timestamp.is_some() {
                            Self::spawn_release_target(
                                Arc::clone(&self.accesses),
                                access.key(),
                                self.config.retry.clone(),
                            );
                        }
                    }
                    Ok(Event::Deleted(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "bucket access watcher lagged, resyncing");
                        self.resync_accesses();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("bucket access loop stopped");
    }

    /// Periodic full re-list. Also runs once at startup so objects created
    /// before the workers subscribed are picked up.
    async fn resync_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.resync_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    debug!("resync pass");
                    self.resync_bucket_requests();
                    self.resync_buckets();
                    self.resync_access_requests();
                    self.resync_accesses();
                }
            }
        }
        debug!("resync loop stopped");
    }

    fn resync_bucket_requests(&self) {
        for req in self.registry.bucket_requests.list() {
            if req.status.phase == BindPhase::Pending
                || req.metadata.deletion_timestamp.is_some()
            {
                Self::spawn_reconcile(
                    Arc::clone(&self.buckets),
                    req.key(),
                    self.config.retry.clone(),
                );
            }
        }
    }

    fn resync_buckets(&self) {
        for bucket in self.registry.buckets.list() {
            if bucket.metadata.deletion_timestamp.is_some() {
                Self::spawn_release_target(
                    Arc::clone(&self.buckets),
                    bucket.key(),
                    self.config.retry.clone(),
                );
            }
        }
    }

    fn resync_access_requests(&self) {
        for req in self.registry.bucket_access_requests.list() {
            if req.status.phase == BindPhase::Pending
                || req.metadata.deletion_timestamp.is_some()
            {
                Self::spawn_reconcile(
                    Arc::clone(&self.accesses),
                    req.key(),
                    self.config.retry.clone(),
                );
            }
        }
    }

    fn resync_accesses(&self) {
        for access in self.registry.bucket_accesses.list() {
            if access.metadata.deletion_timestamp.is_some() {
                Self::spawn_release_target(
                    Arc::clone(&self.accesses),
                    access.key(),
                    self.config.retry.clone(),
                );
            }
        }
    }

    fn enqueue_dependent_access_requests(&self, bucket_request: &str, namespace: Option<&str>) {
        for access_req in self.registry.bucket_access_requests.list() {
            if access_req.spec.bucket_request_name == bucket_request
                && access_req.metadata.namespace.as_deref() == namespace
                && access_req.status.phase == BindPhase::Pending
            {
                Self::spawn_reconcile(
                    Arc::clone(&self.accesses),
                    access_req.key(),
                    self.config.retry.clone(),
                );
            }
        }
    }
}
