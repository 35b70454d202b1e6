use super::events::NotificationBus;
use super::ledger::ensure_distinct;
use crate::domain::{AllowReason, DenyReason, GateDecision};
use crate::error::ServiceResult;
use crate::metrics::GATE_DECISIONS_TOTAL;
use crate::repository::{
    BlockRepository, EntitlementProvider, GiftLedgerRepository, QuotaAdmission, QuotaLimits,
    QuotaRepository,
};
use chrono::Utc;
use event_schema::{ConversationUnlockedEvent, MatchingEvent, UnlockReason};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Free-conversation allowance for one opener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub weekly_used: u32,
    pub monthly_used: u32,
    pub weekly_remaining: u32,
    pub monthly_remaining: u32,
    pub limits: QuotaLimits,
}

/// Decides whether a conversation between two actors may be opened
#[derive(Clone)]
pub struct MessagingGate {
    ledger: Arc<dyn GiftLedgerRepository>,
    blocks: Arc<dyn BlockRepository>,
    entitlements: Arc<dyn EntitlementProvider>,
    quota: Arc<dyn QuotaRepository>,
    limits: QuotaLimits,
    events: NotificationBus,
}

impl MessagingGate {
    pub fn new(
        ledger: Arc<dyn GiftLedgerRepository>,
        blocks: Arc<dyn BlockRepository>,
        entitlements: Arc<dyn EntitlementProvider>,
        quota: Arc<dyn QuotaRepository>,
        limits: QuotaLimits,
        events: NotificationBus,
    ) -> Self {
        Self {
            ledger,
            blocks,
            entitlements,
            quota,
            limits,
            events,
        }
    }

    /// First matching rule wins: block, mutual spark, returned echo,
    /// entitlement of either side, then the opener's free quota.
    ///
    /// A quota admission is recorded for the pair, so calling again for the
    /// same pair allows without consuming another slot.
    #[instrument(skip(self))]
    pub async fn can_open_conversation(
        &self,
        opener_id: Uuid,
        target_id: Uuid,
    ) -> ServiceResult<GateDecision> {
        ensure_distinct(opener_id, target_id)?;

        let decision = self.decide(opener_id, target_id).await?;
        GATE_DECISIONS_TOTAL
            .with_label_values(&[
                if decision.is_allowed() { "allow" } else { "deny" },
                decision.reason(),
            ])
            .inc();
        debug!(opener_id = %opener_id, target_id = %target_id, reason = decision.reason(), "gate decided");
        Ok(decision)
    }

    async fn decide(&self, opener_id: Uuid, target_id: Uuid) -> ServiceResult<GateDecision> {
        if self.blocks.has_block_between(opener_id, target_id).await? {
            return Ok(GateDecision::Deny(DenyReason::Blocked));
        }

        let now = Utc::now();
        if self.ledger.has_active_spark(opener_id, target_id, now).await?
            && self.ledger.has_active_spark(target_id, opener_id, now).await?
        {
            return Ok(GateDecision::Allow(AllowReason::MutualSpark));
        }

        if self
            .ledger
            .has_returned_echo_between(opener_id, target_id)
            .await?
        {
            return Ok(GateDecision::Allow(AllowReason::EchoReturned));
        }

        if self.entitlements.has_unrestricted_messaging(opener_id).await?
            || self.entitlements.has_unrestricted_messaging(target_id).await?
        {
            return Ok(GateDecision::Allow(AllowReason::Entitlement));
        }

        match self
            .quota
            .try_consume(opener_id, target_id, &self.limits, now)
            .await?
        {
            QuotaAdmission::Consumed {
                weekly_remaining,
                monthly_remaining,
            } => {
                info!(
                    opener_id = %opener_id,
                    target_id = %target_id,
                    weekly_remaining,
                    monthly_remaining,
                    "free conversation granted"
                );
                self.events
                    .publish(MatchingEvent::ConversationUnlocked(ConversationUnlockedEvent {
                        actor_a: opener_id,
                        actor_b: target_id,
                        reason: UnlockReason::FreeQuota,
                        unlocked_at: now,
                    }));
                Ok(GateDecision::Allow(AllowReason::FreeQuota {
                    first_admission: true,
                }))
            }
            QuotaAdmission::AlreadyAdmitted => Ok(GateDecision::Allow(AllowReason::FreeQuota {
                first_admission: false,
            })),
            QuotaAdmission::Exhausted => Ok(GateDecision::Deny(DenyReason::QuotaExhausted)),
        }
    }

    pub async fn quota_status(&self, opener_id: Uuid) -> ServiceResult<QuotaStatus> {
        let usage = self.quota.usage(opener_id, Utc::now()).await?;
        let (weekly_remaining, monthly_remaining) = usage.remaining(&self.limits);
        Ok(QuotaStatus {
            weekly_used: usage.weekly_used,
            monthly_used: usage.monthly_used,
            weekly_remaining,
            monthly_remaining,
            limits: self.limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use crate::repository::InMemoryStore;
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        Entitlements {}

        #[async_trait]
        impl EntitlementProvider for Entitlements {
            async fn has_unrestricted_messaging(&self, actor_id: Uuid) -> ServiceResult<bool>;
        }
    }

    fn gate(store: Arc<InMemoryStore>, entitlements: MockEntitlements) -> MessagingGate {
        MessagingGate::new(
            store.clone(),
            store.clone(),
            Arc::new(entitlements),
            store,
            QuotaLimits::default(),
            NotificationBus::new(8),
        )
    }

    #[tokio::test]
    async fn test_block_short_circuits_entitlement_lookup() {
        let store = Arc::new(InMemoryStore::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.create_block(b, a).await.unwrap();

        let mut entitlements = MockEntitlements::new();
        entitlements.expect_has_unrestricted_messaging().times(0);

        let decision = gate(store, entitlements)
            .can_open_conversation(a, b)
            .await
            .unwrap();
        assert_eq!(decision, GateDecision::Deny(DenyReason::Blocked));
    }

    #[tokio::test]
    async fn test_target_entitlement_allows_without_quota() {
        let store = Arc::new(InMemoryStore::new());
        let (opener, target) = (Uuid::new_v4(), Uuid::new_v4());

        let mut entitlements = MockEntitlements::new();
        entitlements
            .expect_has_unrestricted_messaging()
            .with(eq(opener))
            .times(1)
            .returning(|_| Ok(false));
        entitlements
            .expect_has_unrestricted_messaging()
            .with(eq(target))
            .times(1)
            .returning(|_| Ok(true));

        let gate = gate(store, entitlements);
        let decision = gate.can_open_conversation(opener, target).await.unwrap();
        assert_eq!(decision, GateDecision::Allow(AllowReason::Entitlement));

        let status = gate.quota_status(opener).await.unwrap();
        assert_eq!(status.weekly_used, 0);
        assert_eq!(status.weekly_remaining, 3);
    }

    #[tokio::test]
    async fn test_one_sided_spark_falls_through_to_quota() {
        let store = Arc::new(InMemoryStore::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.set_stock(a, Currency::Spark, 1, 0).await;
        store.send_spark(a, b, Utc::now(), None).await.unwrap();

        let mut entitlements = MockEntitlements::new();
        entitlements
            .expect_has_unrestricted_messaging()
            .returning(|_| Ok(false));

        let gate = gate(store, entitlements);
        assert_eq!(
            gate.can_open_conversation(a, b).await.unwrap(),
            GateDecision::Allow(AllowReason::FreeQuota {
                first_admission: true
            })
        );
        assert_eq!(
            gate.can_open_conversation(a, b).await.unwrap(),
            GateDecision::Allow(AllowReason::FreeQuota {
                first_admission: false
            })
        );
        assert_eq!(gate.quota_status(a).await.unwrap().weekly_used, 1);
    }
}
