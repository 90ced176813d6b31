//! Governed operation: the admission pipeline around one unit of work.
//!
//! Pipeline for a non-forced call, stopping at the first rejection:
//!
//! 1. cache short-circuit (operations configured with a cache)
//! 2. rate-limit check
//! 3. sampler
//! 4. recency guard
//! 5. execute: acquire budget, claim marker, fetch, project, persist
//!
//! Steps 2 and 4 are cheap reads; step 5 repeats them atomically so that
//! racing callers cannot overshoot a cap or process an entity twice. A
//! forced call skips 1-4, charges the counters unconditionally and
//! overwrites the marker. Only fetch and persist failures are cached;
//! coordination store errors are reported without touching the cache.

use std::sync::Arc;

use damper_core::{
    new_invocation_id, CachedPayload, Clock, DamperError, DamperResult, EntityRef,
    GovernedOutcome, OperationConfig, OperationKind, Projection, UpstreamError,
};
use damper_storage::{
    CounterStore, FreshnessCache, RecencyClaim, RecencyStore, SourceFetcher,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::guard::RecencyGuard;
use crate::limiter::{LimitDecision, RateLimiter};
use crate::projector::Projector;
use crate::sampler::Sampler;
use crate::target::PersistenceTarget;

/// Per-process cache of governed results, keyed by entity.
pub type OutcomeCache = FreshnessCache<EntityRef, CachedPayload>;

/// Shared coordination state every governed operation draws on.
#[derive(Clone)]
pub struct AdmissionDeps {
    pub counters: Arc<dyn CounterStore>,
    pub recency: Arc<dyn RecencyStore>,
    pub sampler: Arc<dyn Sampler>,
    pub clock: Arc<dyn Clock>,
}

/// One admission-checked, idempotent propagation path.
pub struct GovernedOperation {
    pub(crate) config: OperationConfig,
    limiter: RateLimiter,
    guard: RecencyGuard,
    sampler: Arc<dyn Sampler>,
    fetcher: Arc<dyn SourceFetcher>,
    projector: Arc<dyn Projector>,
    target: Arc<dyn PersistenceTarget>,
    cache: Option<Arc<OutcomeCache>>,
    clock: Arc<dyn Clock>,
}

impl GovernedOperation {
    pub fn new(
        config: OperationConfig,
        deps: AdmissionDeps,
        fetcher: Arc<dyn SourceFetcher>,
        projector: Arc<dyn Projector>,
        target: Arc<dyn PersistenceTarget>,
    ) -> Self {
        let limiter = RateLimiter::new(
            deps.counters,
            Arc::clone(&deps.clock),
            config.kind,
            config.admission.clone(),
        );
        let guard = RecencyGuard::new(
            deps.recency,
            Arc::clone(&deps.clock),
            config.kind,
            config.admission.recency_ttl,
            config.admission.loop_alert_threshold,
        );
        let cache = config
            .cache
            .clone()
            .map(|policy| Arc::new(FreshnessCache::new(policy, Arc::clone(&deps.clock))));

        Self {
            config,
            limiter,
            guard,
            sampler: deps.sampler,
            fetcher,
            projector,
            target,
            cache,
            clock: deps.clock,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.config.kind
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<OutcomeCache>> {
        self.cache.as_ref()
    }

    /// Run the operation for one entity.
    ///
    /// Only malformed input is an error. Admission rejections, missing
    /// sources and execution failures are all reported as outcomes.
    pub async fn invoke(&self, entity: &EntityRef, force: bool) -> DamperResult<GovernedOutcome> {
        entity.validate()?;

        let span = info_span!(
            "governed_operation",
            operation = %self.kind(),
            entity = %entity,
            invocation_id = %new_invocation_id(),
            force,
        );
        let outcome = self.run(entity, force).instrument(span).await;
        Ok(outcome)
    }

    async fn run(&self, entity: &EntityRef, force: bool) -> GovernedOutcome {
        if !force {
            match self.admit(entity).await {
                Ok(None) => {}
                Ok(Some(rejection)) => {
                    debug!(outcome = rejection.label(), "Invocation short-circuited");
                    return rejection;
                }
                Err(e) => {
                    error!(error = %e, "Admission check failed");
                    return GovernedOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            }
        }

        match self.reserve(entity, force).await {
            Ok(None) => {}
            Ok(Some(lost)) => {
                debug!(outcome = lost.label(), "Lost admission race");
                return lost;
            }
            Err(e) => {
                error!(error = %e, "Admission reservation failed");
                return GovernedOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }

        match self.execute(entity).await {
            Ok(outcome) => {
                match &outcome {
                    GovernedOutcome::Succeeded(summary) if summary.failed_count > 0 => warn!(
                        updated = summary.updated_count,
                        deleted = summary.deleted_count,
                        failed = summary.failed_count,
                        "Governed operation partially applied"
                    ),
                    GovernedOutcome::Succeeded(summary) => info!(
                        updated = summary.updated_count,
                        deleted = summary.deleted_count,
                        failed = summary.failed_count,
                        "Governed operation applied"
                    ),
                    GovernedOutcome::NotFound => info!("Source entity not found"),
                    other => debug!(outcome = other.label(), "Governed operation finished"),
                }
                outcome
            }
            Err(e) => {
                error!(error = %e, "Governed operation failed");
                self.remember(
                    entity,
                    CachedPayload::Failed {
                        reason: e.to_string(),
                    },
                );
                GovernedOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Steps 1-4. `Some` is a rejection (or cached answer).
    async fn admit(&self, entity: &EntityRef) -> DamperResult<Option<GovernedOutcome>> {
        if let Some(cache) = &self.cache {
            if let Some((payload, stale)) = cache.get(entity) {
                return Ok(Some(GovernedOutcome::Cached { payload, stale }));
            }
        }

        if let LimitDecision::Exhausted(scope) = self.limiter.check_limit(entity).await? {
            return Ok(Some(GovernedOutcome::RateLimited { scope }));
        }

        if !self.sampler.admit(self.config.admission.sampling_rate) {
            return Ok(Some(GovernedOutcome::Sampled));
        }

        if self.guard.observe(entity).await? {
            return Ok(Some(GovernedOutcome::LoopDetected));
        }

        Ok(None)
    }

    /// Charge the rate budget and take the recency marker. `Some` means a
    /// racing caller got there first.
    async fn reserve(
        &self,
        entity: &EntityRef,
        force: bool,
    ) -> DamperResult<Option<GovernedOutcome>> {
        if force {
            self.limiter.increment(entity).await?;
            self.guard.mark_processed(entity).await?;
            return Ok(None);
        }
        if let LimitDecision::Exhausted(scope) = self.limiter.acquire(entity).await? {
            return Ok(Some(GovernedOutcome::RateLimited { scope }));
        }
        if let RecencyClaim::Suppressed(_) = self.guard.claim(entity).await? {
            return Ok(Some(GovernedOutcome::LoopDetected));
        }
        Ok(None)
    }

    /// Fetch, project and persist. Failures here are cached.
    async fn execute(&self, entity: &EntityRef) -> DamperResult<GovernedOutcome> {
        let source = self.fetcher.fetch(entity).await.map_err(|e| {
            DamperError::from(UpstreamError::FetchFailed {
                source_name: self.fetcher.source_name().to_string(),
                reason: e.to_string(),
            })
        })?;
        let Some(source) = source else {
            self.remember(entity, CachedPayload::NotFound);
            return Ok(GovernedOutcome::NotFound);
        };

        let projection = self.projector.project(&source);
        let summary = self
            .target
            .persist(entity, &projection, self.clock.now())
            .await?;

        match &projection {
            Projection::Derived { .. } => {
                let data = summary.data.clone().unwrap_or_default();
                self.remember(entity, CachedPayload::Found { data });
            }
            Projection::Invalid { reason } => {
                debug!(reason = %reason, "Projection invalid");
                self.remember(entity, CachedPayload::NotFound);
            }
        }

        Ok(GovernedOutcome::Succeeded(summary))
    }

    fn remember(&self, entity: &EntityRef, payload: CachedPayload) {
        if let Some(cache) = &self.cache {
            cache.put(entity.clone(), payload);
        }
    }
}
