//! Batch form of a governed operation.

use damper_core::{
    BatchOutcome, DamperResult, EntityOutcome, EntityRef, GovernedOutcome, ValidationError,
};
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::operation::GovernedOperation;

/// Field name reported by batch validation errors.
pub const ENTITY_IDS_FIELD: &str = "entityIds";

impl GovernedOperation {
    /// Reject malformed batch input before any admission check.
    pub fn validate_batch(&self, tenant_id: &str, entity_ids: &[String]) -> DamperResult<()> {
        if tenant_id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "tenantId".to_string(),
            }
            .into());
        }
        let max = self.config.batch.max_entities;
        if entity_ids.is_empty() || entity_ids.len() > max {
            return Err(ValidationError::BatchSizeOutOfRange {
                field: ENTITY_IDS_FIELD.to_string(),
                max,
                got: entity_ids.len(),
            }
            .into());
        }
        if entity_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ValidationError::InvalidValue {
                field: ENTITY_IDS_FIELD.to_string(),
                reason: "every entity id must be a non-empty string".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Run the operation for each entity, in groups of `batch.concurrency`.
    ///
    /// Results come back in request order. One entity failing never aborts
    /// the rest of the batch.
    pub async fn invoke_batch(
        &self,
        tenant_id: &str,
        entity_ids: &[String],
        force: bool,
    ) -> DamperResult<BatchOutcome> {
        self.validate_batch(tenant_id, entity_ids)?;

        let policy = &self.config.batch;
        let concurrency = policy.concurrency.max(1);
        let group_count = entity_ids.len().div_ceil(concurrency);
        let mut results = Vec::with_capacity(entity_ids.len());

        for (group_index, group) in entity_ids.chunks(concurrency).enumerate() {
            let invocations = group.iter().map(|entity_id| async move {
                let entity = EntityRef::new(tenant_id, entity_id.as_str());
                let outcome = match self.invoke(&entity, force).await {
                    Ok(outcome) => outcome,
                    Err(e) => GovernedOutcome::Failed {
                        reason: e.to_string(),
                    },
                };
                EntityOutcome {
                    entity_id: entity_id.clone(),
                    outcome,
                }
            });
            results.extend(join_all(invocations).await);

            if group_index + 1 < group_count && !policy.inter_batch_delay.is_zero() {
                tokio::time::sleep(policy.inter_batch_delay).await;
            }
        }

        let batch = BatchOutcome::new(results);
        if batch.summary.failed > 0 {
            warn!(
                operation = %self.kind(),
                tenant_id = %tenant_id,
                total = batch.summary.total,
                failed = batch.summary.failed,
                "Batch completed with failures"
            );
        } else {
            info!(
                operation = %self.kind(),
                tenant_id = %tenant_id,
                total = batch.summary.total,
                skipped = batch.summary.skipped,
                "Batch completed"
            );
        }
        Ok(batch)
    }
}
