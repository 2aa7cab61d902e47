//! 活动生命周期状态机
//!
//! draft -> pending_approval -> {approved, rejected}；approved -> active；
//! active -> {paused, closed, finalized, cancelled}；
//! paused -> {active, closed, cancelled}；closed -> finalized；
//! 任何未终态均可 cancelled。finalized 与 cancelled 为终态。
//!
//! 定期过期检查与可行性评估也在这里：开奖时间已过而未售罄的
//! 活动转入 paused 等待管理员复核，是否放行开奖由策略阈值参考。

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ViabilityReport;
use crate::core::audit::AuditEvent;
use crate::core::store::RaffleStore;
use crate::errors::CoreError;
use crate::types::{now_secs, Raffle, RaffleId, RaffleState};

/// 状态迁移合法性判定
pub fn can_transition(from: RaffleState, to: RaffleState) -> bool {
    use RaffleState::*;
    // 任何未终态都可取消
    if to == Cancelled {
        return !from.is_terminal();
    }
    matches!(
        (from, to),
        (Draft, PendingApproval)
            | (PendingApproval, Approved)
            | (PendingApproval, Rejected)
            | (Approved, Active)
            | (Active, Paused)
            | (Active, Closed)
            | (Active, Finalized)
            | (Paused, Active)
            | (Paused, Closed)
            | (Closed, Finalized)
    )
}

/// 过期检查的单条处理结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiryOutcome {
    pub raffle_id: RaffleId,
    pub new_state: RaffleState,
    pub reason: Option<String>,
}

/// 生命周期服务句柄
#[derive(Clone)]
pub struct RaffleLifecycle {
    store: RaffleStore,
}

impl RaffleLifecycle {
    pub fn new(store: RaffleStore) -> Self {
        Self { store }
    }

    /// 组织者提交审批
    pub async fn submit_for_approval(
        &self,
        raffle_id: RaffleId,
        actor: &str,
    ) -> Result<Raffle, CoreError> {
        self.transition(raffle_id, RaffleState::PendingApproval, Some(actor), None)
            .await
    }

    /// 管理员批准
    pub async fn approve(&self, raffle_id: RaffleId, actor: &str) -> Result<Raffle, CoreError> {
        self.transition(raffle_id, RaffleState::Approved, Some(actor), None)
            .await
    }

    /// 管理员驳回
    pub async fn reject(
        &self,
        raffle_id: RaffleId,
        actor: &str,
        reason: &str,
    ) -> Result<Raffle, CoreError> {
        self.transition(raffle_id, RaffleState::Rejected, Some(actor), Some(reason))
            .await
    }

    /// 上架开售
    pub async fn activate(&self, raffle_id: RaffleId, actor: &str) -> Result<Raffle, CoreError> {
        self.transition(raffle_id, RaffleState::Active, Some(actor), None)
            .await
    }

    /// 暂停（附原因，等待复核）
    pub async fn pause(
        &self,
        raffle_id: RaffleId,
        actor: &str,
        reason: &str,
    ) -> Result<Raffle, CoreError> {
        self.transition(raffle_id, RaffleState::Paused, Some(actor), Some(reason))
            .await
    }

    /// 复核通过后恢复开售
    pub async fn resume(&self, raffle_id: RaffleId, actor: &str) -> Result<Raffle, CoreError> {
        self.transition(raffle_id, RaffleState::Active, Some(actor), None)
            .await
    }

    /// 截止售票
    pub async fn close(&self, raffle_id: RaffleId, actor: &str) -> Result<Raffle, CoreError> {
        self.transition(raffle_id, RaffleState::Closed, Some(actor), None)
            .await
    }

    /// 取消活动（进入外部退款流程）
    pub async fn cancel(
        &self,
        raffle_id: RaffleId,
        actor: &str,
        reason: &str,
    ) -> Result<Raffle, CoreError> {
        self.transition(raffle_id, RaffleState::Cancelled, Some(actor), Some(reason))
            .await
    }

    /// 通用迁移：在行锁内校验合法性后落盘
    pub async fn transition(
        &self,
        raffle_id: RaffleId,
        to: RaffleState,
        actor: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Raffle, CoreError> {
        let shard = self.store.shard(raffle_id).await?;
        let mut data = self.store.lock_shard(&shard).await?;

        let from = data.raffle.state;
        if !can_transition(from, to) {
            warn!(raffle_id, %from, %to, "非法状态迁移被拒绝");
            return Err(CoreError::InvalidTransition { raffle_id, from, to });
        }

        data.raffle.state = to;
        data.raffle.updated_at = now_secs();
        data.raffle.pause_reason = if to == RaffleState::Paused {
            reason.map(|s| s.to_string())
        } else {
            None
        };
        let updated = data.raffle.clone();
        drop(data);

        let mut event = AuditEvent::state_changed(raffle_id, from, to, actor);
        if let Some(r) = reason {
            event.detail = format!("{} ({})", event.detail, r);
        }
        self.store.push_audit(event).await;
        info!(raffle_id, %from, %to, "活动状态已迁移");
        Ok(updated)
    }

    /// 定期过期检查（由外部调度任务驱动）
    ///
    /// 对每场 active 且开奖时间已过的活动：售罄则截止，
    /// 否则暂停并记录售出情况，等待管理员复核。
    pub async fn check_expired(&self, now: u64) -> Vec<ExpiryOutcome> {
        let mut outcomes = Vec::new();
        for raffle_id in self.store.list_raffle_ids().await {
            let shard = match self.store.shard(raffle_id).await {
                Ok(s) => s,
                Err(_) => continue,
            };
            let mut data = match self.store.lock_shard(&shard).await {
                Ok(d) => d,
                Err(_) => {
                    // 锁竞争激烈的活动留给下一轮检查
                    warn!(raffle_id, "过期检查获取行锁超时，跳过");
                    continue;
                }
            };
            if data.raffle.state != RaffleState::Active || data.raffle.draw_time >= now {
                continue;
            }

            let from = data.raffle.state;
            let (to, reason) = if data.raffle.tickets_sold == data.raffle.capacity {
                (RaffleState::Closed, None)
            } else {
                let reason = format!(
                    "Raffle paused automatically: draw time passed with {}/{} tickets sold ({:.1}%), awaiting administrator review",
                    data.raffle.tickets_sold,
                    data.raffle.capacity,
                    data.raffle.sold_ratio() * 100.0
                );
                (RaffleState::Paused, Some(reason))
            };
            data.raffle.state = to;
            data.raffle.pause_reason = reason.clone();
            data.raffle.updated_at = now_secs();
            drop(data);

            self.store
                .push_audit(AuditEvent::state_changed(raffle_id, from, to, None))
                .await;
            info!(raffle_id, %to, "过期检查完成迁移");
            outcomes.push(ExpiryOutcome { raffle_id, new_state: to, reason });
        }
        outcomes
    }

    /// 按策略阈值评估活动可行性，供复核决定是否放行开奖
    pub async fn viability(&self, raffle_id: RaffleId) -> Result<ViabilityReport, CoreError> {
        let raffle = self.store.get_raffle(raffle_id).await?;
        Ok(self.store.policy().evaluate(&raffle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorePolicy;
    use crate::types::NewRaffle;

    fn new_raffle(draw_time: u64) -> NewRaffle {
        NewRaffle {
            organizer: "org1".to_string(),
            title: "lifecycle".to_string(),
            description: String::new(),
            price_per_ticket: 1000,
            capacity: 10,
            draw_time,
            prize_value: Some(4000),
            allow_multiple_tickets: true,
            max_tickets_per_buyer: 10,
        }
    }

    #[test]
    fn test_transition_table() {
        use RaffleState::*;
        assert!(can_transition(Draft, PendingApproval));
        assert!(can_transition(PendingApproval, Approved));
        assert!(can_transition(PendingApproval, Rejected));
        assert!(can_transition(Approved, Active));
        assert!(can_transition(Active, Paused));
        assert!(can_transition(Active, Closed));
        assert!(can_transition(Active, Finalized));
        assert!(can_transition(Paused, Active));
        assert!(can_transition(Paused, Closed));
        assert!(can_transition(Closed, Finalized));

        // 任何未终态可取消
        for from in [Draft, PendingApproval, Approved, Rejected, Active, Paused, Closed] {
            assert!(can_transition(from, Cancelled), "{} -> cancelled", from);
        }

        // 终态不可迁出
        for to in [Draft, PendingApproval, Active, Cancelled, Finalized] {
            assert!(!can_transition(Finalized, to));
            assert!(!can_transition(Cancelled, to));
        }

        // 典型非法迁移
        assert!(!can_transition(Draft, Active));
        assert!(!can_transition(Paused, Finalized));
        assert!(!can_transition(Closed, Active));
        assert!(!can_transition(Rejected, Active));
    }

    #[tokio::test]
    async fn test_full_lifecycle_walk() {
        let store = RaffleStore::new(CorePolicy::default());
        let lifecycle = RaffleLifecycle::new(store.clone());
        let raffle = store.create_raffle(new_raffle(now_secs() + 3600)).await.unwrap();
        let id = raffle.id;

        assert_eq!(
            lifecycle.submit_for_approval(id, "org1").await.unwrap().state,
            RaffleState::PendingApproval
        );
        assert_eq!(lifecycle.approve(id, "admin").await.unwrap().state, RaffleState::Approved);
        assert_eq!(lifecycle.activate(id, "org1").await.unwrap().state, RaffleState::Active);
        let paused = lifecycle.pause(id, "admin", "irregularity report").await.unwrap();
        assert_eq!(paused.state, RaffleState::Paused);
        assert_eq!(paused.pause_reason.as_deref(), Some("irregularity report"));
        let resumed = lifecycle.resume(id, "admin").await.unwrap();
        assert_eq!(resumed.state, RaffleState::Active);
        assert!(resumed.pause_reason.is_none());
        assert_eq!(lifecycle.close(id, "org1").await.unwrap().state, RaffleState::Closed);
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let store = RaffleStore::new(CorePolicy::default());
        let lifecycle = RaffleLifecycle::new(store.clone());
        let raffle = store.create_raffle(new_raffle(now_secs() + 3600)).await.unwrap();

        let err = lifecycle.activate(raffle.id, "org1").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition { from: RaffleState::Draft, to: RaffleState::Active, .. }
        ));
        // 状态未被改动
        assert_eq!(store.get_raffle(raffle.id).await.unwrap().state, RaffleState::Draft);
    }

    #[tokio::test]
    async fn test_cancel_from_any_pre_finalized_state() {
        let store = RaffleStore::new(CorePolicy::default());
        let lifecycle = RaffleLifecycle::new(store.clone());
        let raffle = store.create_raffle(new_raffle(now_secs() + 3600)).await.unwrap();

        let cancelled = lifecycle.cancel(raffle.id, "admin", "fraud").await.unwrap();
        assert_eq!(cancelled.state, RaffleState::Cancelled);
        // 终态后一切迁移被拒
        assert!(lifecycle.activate(raffle.id, "org1").await.is_err());
        assert!(lifecycle.cancel(raffle.id, "admin", "again").await.is_err());
    }

    #[tokio::test]
    async fn test_check_expired_pauses_undersold() {
        let store = RaffleStore::new(CorePolicy::default());
        let lifecycle = RaffleLifecycle::new(store.clone());
        let past = now_secs().saturating_sub(60);
        let raffle = store.create_raffle(new_raffle(past)).await.unwrap();
        lifecycle.submit_for_approval(raffle.id, "org1").await.unwrap();
        lifecycle.approve(raffle.id, "admin").await.unwrap();
        lifecycle.activate(raffle.id, "org1").await.unwrap();

        let outcomes = lifecycle.check_expired(now_secs()).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].new_state, RaffleState::Paused);
        let reason = outcomes[0].reason.as_deref().unwrap();
        assert!(reason.contains("0/10"));

        let paused = store.get_raffle(raffle.id).await.unwrap();
        assert_eq!(paused.state, RaffleState::Paused);
        assert!(paused.pause_reason.is_some());
    }

    #[tokio::test]
    async fn test_check_expired_ignores_future_and_inactive() {
        let store = RaffleStore::new(CorePolicy::default());
        let lifecycle = RaffleLifecycle::new(store.clone());
        // 未来开奖的 active 活动
        let future = store.create_raffle(new_raffle(now_secs() + 3600)).await.unwrap();
        lifecycle.submit_for_approval(future.id, "org1").await.unwrap();
        lifecycle.approve(future.id, "admin").await.unwrap();
        lifecycle.activate(future.id, "org1").await.unwrap();
        // 已过期但仍是草稿的活动
        let _draft = store.create_raffle(new_raffle(now_secs().saturating_sub(60))).await.unwrap();

        let outcomes = lifecycle.check_expired(now_secs()).await;
        assert!(outcomes.is_empty());
        assert_eq!(store.get_raffle(future.id).await.unwrap().state, RaffleState::Active);
    }

    #[tokio::test]
    async fn test_viability_report() {
        let store = RaffleStore::new(CorePolicy::default());
        let lifecycle = RaffleLifecycle::new(store.clone());
        let raffle = store.create_raffle(new_raffle(now_secs() + 3600)).await.unwrap();
        // 潜在收入 10_000 >= 2 x 4000，但未售罄（min_sold_ratio=1.0）
        let report = lifecycle.viability(raffle.id).await.unwrap();
        assert_eq!(report.potential_revenue, 10_000);
        assert_eq!(report.required_revenue, 8_000);
        assert!(!report.viable);
    }
}
