//! 审计事件与报告
//!
//! 基于内存审计事件生成简要报告（各操作计数/最近事件时间）。
//! 开奖本身的存证由 WinnerRecord 承担，这里记录的是操作轨迹。

use serde::{Deserialize, Serialize};

use crate::types::{now_secs, RaffleId, RaffleState};

/// 审计动作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RaffleCreated,
    TicketsReserved,
    PaymentConfirmed,
    ReservationCancelled,
    WinnerDrawn,
    StateChanged,
}

/// 审计事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEvent {
    pub ts: u64,
    pub action: AuditAction,
    pub raffle_id: RaffleId,
    /// 触发者（买家/组织者/系统任务），系统动作为 None
    pub actor: Option<String>,
    pub detail: String,
}

impl AuditEvent {
    pub(crate) fn raffle_created(raffle_id: RaffleId, organizer: &str) -> Self {
        Self {
            ts: now_secs(),
            action: AuditAction::RaffleCreated,
            raffle_id,
            actor: Some(organizer.to_string()),
            detail: "raffle created".to_string(),
        }
    }

    pub(crate) fn tickets_reserved(raffle_id: RaffleId, buyer: &str, count: usize) -> Self {
        Self {
            ts: now_secs(),
            action: AuditAction::TicketsReserved,
            raffle_id,
            actor: Some(buyer.to_string()),
            detail: format!("{} ticket(s) reserved", count),
        }
    }

    pub(crate) fn payment_confirmed(raffle_id: RaffleId, buyer: &str, count: usize) -> Self {
        Self {
            ts: now_secs(),
            action: AuditAction::PaymentConfirmed,
            raffle_id,
            actor: Some(buyer.to_string()),
            detail: format!("{} ticket(s) paid", count),
        }
    }

    pub(crate) fn reservation_cancelled(raffle_id: RaffleId, count: usize) -> Self {
        Self {
            ts: now_secs(),
            action: AuditAction::ReservationCancelled,
            raffle_id,
            actor: None,
            detail: format!("{} ticket(s) cancelled", count),
        }
    }

    pub(crate) fn winner_drawn(raffle_id: RaffleId, winning_number: u32) -> Self {
        Self {
            ts: now_secs(),
            action: AuditAction::WinnerDrawn,
            raffle_id,
            actor: None,
            detail: format!("winner drawn, ticket #{}", winning_number),
        }
    }

    pub(crate) fn state_changed(
        raffle_id: RaffleId,
        from: RaffleState,
        to: RaffleState,
        actor: Option<&str>,
    ) -> Self {
        Self {
            ts: now_secs(),
            action: AuditAction::StateChanged,
            raffle_id,
            actor: actor.map(|s| s.to_string()),
            detail: format!("{} -> {}", from, to),
        }
    }
}

/// 审计摘要报告
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuditReport {
    pub total: usize,
    pub raffles_created: usize,
    pub reservations: usize,
    pub payments: usize,
    pub cancellations: usize,
    pub draws: usize,
    pub state_changes: usize,
    pub latest_ts: Option<u64>,
}

/// 汇总事件列表为报告
pub fn generate_report(events: &[AuditEvent]) -> AuditReport {
    let mut report = AuditReport::default();
    report.total = events.len();
    for e in events {
        report.latest_ts = Some(report.latest_ts.map_or(e.ts, |cur| cur.max(e.ts)));
        match e.action {
            AuditAction::RaffleCreated => report.raffles_created += 1,
            AuditAction::TicketsReserved => report.reservations += 1,
            AuditAction::PaymentConfirmed => report.payments += 1,
            AuditAction::ReservationCancelled => report.cancellations += 1,
            AuditAction::WinnerDrawn => report.draws += 1,
            AuditAction::StateChanged => report.state_changes += 1,
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_report_counts() {
        let events = vec![
            AuditEvent::raffle_created(1, "org"),
            AuditEvent::tickets_reserved(1, "alice", 3),
            AuditEvent::tickets_reserved(1, "bob", 1),
            AuditEvent::payment_confirmed(1, "alice", 3),
            AuditEvent::reservation_cancelled(1, 1),
            AuditEvent::winner_drawn(1, 7),
            AuditEvent::state_changed(1, RaffleState::Active, RaffleState::Finalized, None),
        ];
        let report = generate_report(&events);
        assert_eq!(report.total, 7);
        assert_eq!(report.raffles_created, 1);
        assert_eq!(report.reservations, 2);
        assert_eq!(report.payments, 1);
        assert_eq!(report.cancellations, 1);
        assert_eq!(report.draws, 1);
        assert_eq!(report.state_changes, 1);
        assert!(report.latest_ts.is_some());
    }

    #[test]
    fn test_empty_report() {
        let report = generate_report(&[]);
        assert_eq!(report, AuditReport::default());
        assert!(report.latest_ts.is_none());
    }

    #[test]
    fn test_event_serde() {
        let e = AuditEvent::state_changed(9, RaffleState::Draft, RaffleState::PendingApproval, Some("org"));
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"state_changed\""));
        assert!(json.contains("draft -> pending_approval"));
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
