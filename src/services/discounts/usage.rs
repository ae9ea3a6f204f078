use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::model::Discount;
use crate::errors::{DiscountError, UsageScope};
use crate::repositories::DiscountRepository;

/// Advisory usage-limit check run before any pricing happens.
///
/// Passing here does not reserve anything: the limit is enforced again,
/// atomically, when the order is written.
#[derive(Clone)]
pub struct UsageLimitValidator {
    repository: Arc<dyn DiscountRepository>,
}

impl UsageLimitValidator {
    pub fn new(repository: Arc<dyn DiscountRepository>) -> Self {
        Self { repository }
    }

    pub async fn validate(&self, discount: &Discount, user_id: Uuid) -> Result<(), DiscountError> {
        if let Some(limit) = discount.per_user_limit {
            let used = self
                .repository
                .count_user_usages(discount.id, user_id)
                .await?;
            if used >= u64::from(limit) {
                debug!(code = %discount.code, used, limit, "per-user limit reached");
                return Err(DiscountError::UsageLimitExceeded {
                    code: discount.code.clone(),
                    scope: UsageScope::PerUser,
                });
            }
        }

        if let Some(limit) = discount.usage_limit {
            if discount.times_used >= limit {
                return Err(DiscountError::UsageLimitExceeded {
                    code: discount.code.clone(),
                    scope: UsageScope::Global,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryStore;
    use crate::services::discounts::model::DiscountType;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn discount(
        usage_limit: Option<u32>,
        per_user_limit: Option<u32>,
        times_used: u32,
    ) -> Discount {
        Discount {
            id: Uuid::new_v4(),
            code: "LIMITED".into(),
            discount_type: DiscountType::FixedAmount,
            value: dec!(5),
            starts_at: Utc::now(),
            ends_at: None,
            stackable: true,
            usage_limit,
            per_user_limit,
            times_used,
            is_active: true,
            rules: vec![],
        }
    }

    #[tokio::test]
    async fn unlimited_discount_passes() {
        let validator = UsageLimitValidator::new(Arc::new(InMemoryStore::new()));
        assert!(validator
            .validate(&discount(None, None, 10_000), Uuid::new_v4())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn global_limit_is_inclusive() {
        let validator = UsageLimitValidator::new(Arc::new(InMemoryStore::new()));
        let user = Uuid::new_v4();

        assert!(validator.validate(&discount(Some(3), None, 2), user).await.is_ok());
        assert_matches!(
            validator.validate(&discount(Some(3), None, 3), user).await,
            Err(DiscountError::UsageLimitExceeded {
                scope: UsageScope::Global,
                ..
            })
        );
    }

    #[tokio::test]
    async fn per_user_limit_reads_prior_usage() {
        let store = InMemoryStore::new();
        let validator = UsageLimitValidator::new(Arc::new(store.clone()));
        let promo = discount(None, Some(2), 0);
        let user = Uuid::new_v4();

        store.record_usage(promo.id, user).await;
        assert!(validator.validate(&promo, user).await.is_ok());

        store.record_usage(promo.id, user).await;
        assert_matches!(
            validator.validate(&promo, user).await,
            Err(DiscountError::UsageLimitExceeded {
                scope: UsageScope::PerUser,
                ..
            })
        );
        assert!(validator.validate(&promo, Uuid::new_v4()).await.is_ok());
    }
}
