//! Generic binding engine.
//!
//! One state machine drives both the `BucketRequest`↔`Bucket` and the
//! `BucketAccessRequest`↔`BucketAccess` pairings; everything pair-specific
//! (compatibility checks, dynamic provisioning, credential materialization,
//! teardown) is supplied through the [`BindingSite`] trait, eliminating
//! divergence between the two call sites.
//!
//! ## State machine
//!
//! Per request: Unbound → Binding → Bound → Releasing → Released.  Only the
//! coarse phase is persisted; the in-between states exist as control flow
//! within one reconciliation pass, so a crash at any point leaves the
//! request safely retryable:
//!
//! - the target's back-reference is committed (conditionally, keyed on its
//!   version token) **before** the request's status is written Bound;
//! - a retry that finds the target already referencing this request
//!   proceeds (idempotent); referencing someone else is `AlreadyBound`;
//! - dynamic provisioning derives the target name deterministically from
//!   the request UID, so a crash between adapter call and entity creation
//!   re-converges instead of leaking resources.
//!
//! Transient errors ([`CosiError::is_transient`]) propagate to the caller's
//! retry loop; terminal errors park the request with the error recorded in
//! its status message (or phase `Failed` under
//! [`BindingConfig::fail_on_terminal_errors`]).

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::error::CosiError;
use crate::store::Store;
use crate::types::{BindPhase, Object, ObjectKey, ReleasePolicy, TypedReference};

/// Gate evaluated before any bind work for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The request may proceed to binding.
    Ready,
    /// The request must wait; the message is recorded in its status.
    Wait(String),
}

/// Everything pair-specific the generic engine needs: store access, the
/// capability set of the request/target kinds, and the adapter glue.
#[async_trait]
pub trait BindingSite: Send + Sync {
    type Request: Object;
    type Target: Object;

    fn requests(&self) -> &Store<Self::Request>;
    fn targets(&self) -> &Store<Self::Target>;

    /// Target explicitly named by the request, if any.
    fn explicit_target(&self, req: &Self::Request) -> Option<String>;

    /// Deterministic name for a dynamically provisioned target. Derived
    /// from the request UID so that retries re-converge on one entity.
    fn generated_target_name(&self, req: &Self::Request) -> String;

    /// Current `(phase, message, bound target name)` from the request status.
    fn request_status(&self, req: &Self::Request) -> (BindPhase, String, Option<String>);

    /// Conditionally write the request status. Same CAS discipline as every
    /// store write.
    fn set_request_status(
        &self,
        req: &Self::Request,
        phase: BindPhase,
        message: &str,
        bound: Option<&str>,
    ) -> Result<(), CosiError>;

    /// The target's binding back-reference, if bound.
    fn back_ref(&self, target: &Self::Target) -> Option<TypedReference>;

    /// Pair-specific gate before leaving Unbound.
    async fn precondition(&self, req: &Self::Request) -> Result<Precondition, CosiError>;

    /// Validate that `req` may bind `target` (protocol, namespace, …).
    fn check_compatible(
        &self,
        req: &Self::Request,
        target: &Self::Target,
    ) -> Result<(), CosiError>;

    /// Conditionally commit the back-reference (and phase Bound) on the
    /// target. The version token carried by `target` keys the write; a lost
    /// race surfaces as [`CosiError::Conflict`].
    fn bind_target(
        &self,
        target: Self::Target,
        req: &Self::Request,
    ) -> Result<Self::Target, CosiError>;

    /// Dynamically provision a target pre-bound to `req`, under
    /// `desired_name` when given, else under the generated name. Must be
    /// idempotent: finding the entity already created and referencing `req`
    /// is success.
    async fn provision_target(
        &self,
        req: &Self::Request,
        desired_name: Option<&str>,
    ) -> Result<Self::Target, CosiError>;

    /// Pair-specific work inside the Binding→Bound transition, after the
    /// target back-reference is durable and before the request is marked
    /// Bound (e.g. credential secret materialization). Must be idempotent.
    async fn on_bind(&self, req: &Self::Request, target: &Self::Target)
    -> Result<(), CosiError>;

    /// Release policy of the target.
    fn release_policy(&self, target: &Self::Target) -> ReleasePolicy;

    /// Tear down the target's backing resources via the adapter.
    async fn teardown(&self, target: &Self::Target) -> Result<(), CosiError>;

    /// Clear the binding on a retained target: back-reference removed,
    /// phase back to Pending with `message`, making it adoptable by a new
    /// request.
    fn clear_binding(&self, target: Self::Target, message: &str) -> Result<(), CosiError>;
}

/// Engine policy knobs.
#[derive(Debug, Clone, Default)]
pub struct BindingConfig {
    /// When `true`, terminal misconfiguration moves the request to phase
    /// `Failed` instead of parking it in `Pending`. Off by default,
    /// preserving the protocol's indefinite self-healing retry.
    pub fail_on_terminal_errors: bool,
}

/// The generic matcher. Instantiated once per pairing.
pub struct BindingEngine<S: BindingSite> {
    site: S,
    config: BindingConfig,
}

impl<S: BindingSite> BindingEngine<S> {
    pub fn new(site: S, config: BindingConfig) -> Self {
        Self { site, config }
    }

    /// The pair-specific site, for callers that need its stores.
    pub fn site(&self) -> &S {
        &self.site
    }

    /// Drive one request one step.  Safe to call concurrently for the same
    /// request from multiple workers: all coordination goes through the
    /// store's version tokens.
    ///
    /// Returns `Err` only for transient faults the caller should retry.
    #[instrument(skip(self), fields(kind = S::Request::KIND, request = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<(), CosiError> {
        let Some(req) = self.site.requests().get(key) else {
            debug!("request gone, nothing to reconcile");
            return Ok(());
        };

        if req.metadata().deletion_timestamp.is_some() {
            return self.release_request(&req).await;
        }

        match self.site.request_status(&req).0 {
            BindPhase::Pending => self.bind(&req).await,
            BindPhase::Bound => self.verify_bound(&req),
            // Terminal; only spec correction (a new request) revives work.
            BindPhase::Released | BindPhase::Failed => Ok(()),
        }
    }

    /// Unbound → Binding → Bound.
    async fn bind(&self, req: &S::Request) -> Result<(), CosiError> {
        match self.site.precondition(req).await? {
            Precondition::Wait(message) => {
                debug!(%message, "bind precondition not met, waiting");
                return self.write_status(req, BindPhase::Pending, &message, None);
            }
            Precondition::Ready => {}
        }

        match self.try_bind(req).await {
            Ok(target) => {
                self.site.on_bind(req, &target).await?;
                let name = target.metadata().name.clone();
                self.write_status(req, BindPhase::Bound, "bound", Some(&name))?;
                info!(target = %name, "request bound");
                Ok(())
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                let phase = if self.config.fail_on_terminal_errors {
                    BindPhase::Failed
                } else {
                    BindPhase::Pending
                };
                warn!(error = %e, ?phase, "bind failed terminally for current spec");
                self.write_status(req, phase, &e.to_string(), None)
            }
        }
    }

    /// Locate or create the target and commit its back-reference.
    async fn try_bind(&self, req: &S::Request) -> Result<S::Target, CosiError> {
        let Some(name) = self.site.explicit_target(req) else {
            return self.site.provision_target(req, None).await;
        };

        match self.site.targets().get(&ObjectKey::cluster(name.clone())) {
            Some(target) => match self.direct_bind(req, target) {
                Ok(target) => Ok(target),
                Err(contested @ CosiError::AlreadyBound { .. }) => {
                    // Non-retryable for this specific target name; fall back
                    // to dynamic provisioning under a generated name when a
                    // class is resolvable, else surface AlreadyBound.
                    debug!(target = %name, "explicit target contested, trying dynamic fallback");
                    match self.site.provision_target(req, None).await {
                        Ok(target) => Ok(target),
                        Err(
                            CosiError::ClassNotFound(_)
                            | CosiError::NoDefaultClass { .. }
                            | CosiError::AmbiguousDefault { .. },
                        ) => Err(contested),
                        Err(other) => Err(other),
                    }
                }
                Err(e) => Err(e),
            },
            // Explicit name with no existing target: provision under it.
            None => self.site.provision_target(req, Some(&name)).await,
        }
    }

    /// Bind an existing target. First successful conditional write wins;
    /// losers observe either their own reference (idempotent retry) or
    /// `AlreadyBound`.
    fn direct_bind(&self, req: &S::Request, target: S::Target) -> Result<S::Target, CosiError> {
        let name = target.metadata().name.clone();
        if target.metadata().deletion_timestamp.is_some() {
            return Err(CosiError::NotFound {
                kind: S::Target::KIND.to_owned(),
                name,
            });
        }
        if let Some(holder) = self.site.back_ref(&target) {
            if holder.matches(req.metadata()) {
                debug!(target = %name, "target already references this request");
                return Ok(target);
            }
            return Err(CosiError::AlreadyBound {
                target: name,
                holder: holder.to_string(),
            });
        }
        self.site.check_compatible(req, &target)?;
        self.site.bind_target(target, req)
    }

    /// Bound: verify the pairing is intact; a missing target means it was
    /// deleted underneath and the pairing is terminally released.
    fn verify_bound(&self, req: &S::Request) -> Result<(), CosiError> {
        let (_, _, bound) = self.site.request_status(req);
        let Some(name) = bound else {
            return self.write_status(
                req,
                BindPhase::Released,
                "bound target unknown; pairing released",
                None,
            );
        };
        match self.site.targets().get(&ObjectKey::cluster(name.clone())) {
            Some(target)
                if target.metadata().deletion_timestamp.is_none()
                    && self
                        .site
                        .back_ref(&target)
                        .is_some_and(|r| r.matches(req.metadata())) =>
            {
                // Stable binding: no adapter calls, no store writes.
                Ok(())
            }
            _ => self.write_status(
                req,
                BindPhase::Released,
                &format!(
                    "{} {name} no longer bound; pairing released, create a new request to rebind",
                    S::Target::KIND
                ),
                None,
            ),
        }
    }

    /// Bound → Releasing → Released, triggered by request deletion.
    /// Teardown failure blocks the final removal and is retried.
    async fn release_request(&self, req: &S::Request) -> Result<(), CosiError> {
        let (_, _, bound) = self.site.request_status(req);
        // A request deleted mid-Binding may already own a target that its
        // status never recorded; check every name it could have bound.
        let mut candidates: Vec<String> = Vec::new();
        candidates.extend(bound);
        candidates.extend(self.site.explicit_target(req));
        candidates.push(self.site.generated_target_name(req));

        for name in candidates {
            let key = ObjectKey::cluster(name);
            let Some(target) = self.site.targets().get(&key) else {
                continue;
            };
            if !self
                .site
                .back_ref(&target)
                .is_some_and(|r| r.matches(req.metadata()))
            {
                continue;
            }
            match self.site.release_policy(&target) {
                ReleasePolicy::Delete => {
                    if let Err(e) = self.site.teardown(&target).await {
                        if e.is_transient() {
                            return Err(e);
                        }
                        // Terminal teardown failure: record it and keep the
                        // request (deletion stays blocked) for manual fixes.
                        warn!(target = %key, error = %e, "teardown failed terminally");
                        let (phase, _, bound) = self.site.request_status(req);
                        return self.write_status(req, phase, &e.to_string(), bound.as_deref());
                    }
                    match self.site.targets().remove(&key) {
                        Ok(_) => info!(target = %key, "target torn down and removed"),
                        Err(CosiError::NotFound { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                ReleasePolicy::Retain => {
                    let message = format!(
                        "released from {}; backing storage retained",
                        ObjectKey::from(req.metadata())
                    );
                    self.site.clear_binding(target, &message)?;
                    info!(target = %key, "binding cleared, target retained");
                }
            }
            break;
        }

        match self.site.requests().remove(&req.key()) {
            Ok(_) => {
                info!("request released and removed");
                Ok(())
            }
            // Another worker finished the removal first.
            Err(CosiError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Release triggered by deletion of the *target*: tear down per policy,
    /// remove the entity, and terminally release the bound request.
    #[instrument(skip(self), fields(kind = S::Target::KIND, target = %key))]
    pub async fn release_target(&self, key: &ObjectKey) -> Result<(), CosiError> {
        let Some(target) = self.site.targets().get(key) else {
            return Ok(());
        };
        if target.metadata().deletion_timestamp.is_none() {
            return Ok(());
        }

        if let Some(holder) = self.site.back_ref(&target) {
            let req_key = ObjectKey {
                namespace: holder.namespace.clone(),
                name: holder.name.clone(),
            };
            if let Some(req) = self.site.requests().get(&req_key)
                && req.metadata().deletion_timestamp.is_none()
            {
                let message = format!(
                    "{} {} deleted; pairing released, create a new request to rebind",
                    S::Target::KIND,
                    key
                );
                self.write_status(&req, BindPhase::Released, &message, None)?;
            }
        }

        if self.site.release_policy(&target) == ReleasePolicy::Delete {
            self.site.teardown(&target).await?;
        }
        // Retain leaves backing storage behind by design.

        match self.site.targets().remove(key) {
            Ok(_) => {
                info!("target released and removed");
                Ok(())
            }
            Err(CosiError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Write the request status only when it actually changes, so stable
    /// requests produce no store writes.
    fn write_status(
        &self,
        req: &S::Request,
        phase: BindPhase,
        message: &str,
        bound: Option<&str>,
    ) -> Result<(), CosiError> {
        let (cur_phase, cur_message, cur_bound) = self.site.request_status(req);
        if cur_phase == phase && cur_message == message && cur_bound.as_deref() == bound {
            return Ok(());
        }
        self.site.set_request_status(req, phase, message, bound)
    }
}
