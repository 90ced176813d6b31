//! Fixed-window rate limiter over the durable counter store.
//!
//! Each governed operation has two counters per window: one for the whole
//! system and one per entity.

use std::sync::Arc;

use damper_core::{
    AdmissionPolicy, Clock, CounterKey, CounterSubject, DamperResult, EntityRef, LimitScope,
    OperationKind,
};
use damper_storage::{Acquisition, CounterLimit, CounterStore};

/// Result of a limit check or acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Admitted,
    Exhausted(LimitScope),
}

impl LimitDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, LimitDecision::Admitted)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    scope: OperationKind,
    policy: AdmissionPolicy,
}

impl RateLimiter {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        scope: OperationKind,
        policy: AdmissionPolicy,
    ) -> Self {
        Self {
            counters,
            clock,
            scope,
            policy,
        }
    }

    /// Global first, then per-entity.
    fn limits(&self, entity: &EntityRef) -> [CounterLimit; 2] {
        let window_id = CounterKey::window_id_at(self.clock.now(), self.policy.window);
        [
            CounterLimit::new(
                CounterKey::new(self.scope, CounterSubject::Global, window_id),
                self.policy.global_cap,
            ),
            CounterLimit::new(
                CounterKey::new(self.scope, CounterSubject::Entity(entity.clone()), window_id),
                self.policy.per_entity_cap,
            ),
        ]
    }

    /// Read-only check of both counters in the current window.
    pub async fn check_limit(&self, entity: &EntityRef) -> DamperResult<LimitDecision> {
        for limit in self.limits(entity) {
            let count = self
                .counters
                .get(&limit.key)
                .await?
                .map(|record| record.count)
                .unwrap_or(0);
            if count >= limit.max {
                return Ok(LimitDecision::Exhausted(limit.key.subject.limit_scope()));
            }
        }
        Ok(LimitDecision::Admitted)
    }

    /// Unconditionally charge both counters.
    pub async fn increment(&self, entity: &EntityRef) -> DamperResult<()> {
        let now = self.clock.now();
        for limit in self.limits(entity) {
            self.counters.increment(&limit.key, now).await?;
        }
        Ok(())
    }

    /// Charge both counters iff both are under their caps.
    pub async fn acquire(&self, entity: &EntityRef) -> DamperResult<LimitDecision> {
        let limits = self.limits(entity);
        match self.counters.try_acquire(&limits, self.clock.now()).await? {
            Acquisition::Acquired { .. } => Ok(LimitDecision::Admitted),
            Acquisition::Exhausted { key, .. } => {
                Ok(LimitDecision::Exhausted(key.subject.limit_scope()))
            }
        }
    }
}
