//! 支付确认适配器（外部边界）
//!
//! 支付网关本身在核心之外，这里只消费其回调：整批票券
//! reserved -> paid（全部成功或全部不动）。取消预留不回退
//! `tickets_sold`——名额在预留时即被消耗，号码也不回收复售。

use tracing::{info, warn};

use crate::core::audit::AuditEvent;
use crate::core::store::RaffleStore;
use crate::errors::CoreError;
use crate::types::{RaffleId, Ticket, TicketId, TicketStatus};

/// 支付确认服务句柄
#[derive(Clone)]
pub struct PaymentAdapter {
    store: RaffleStore,
}

impl PaymentAdapter {
    pub fn new(store: RaffleStore) -> Self {
        Self { store }
    }

    /// 确认整批票券已支付
    ///
    /// 前置条件：每张票都存在、处于 reserved 状态且属于 `buyer`；
    /// 任何一张不满足则整批失败且不产生任何变更。
    pub async fn confirm_payment(
        &self,
        ticket_ids: &[TicketId],
        buyer: &str,
    ) -> Result<Vec<Ticket>, CoreError> {
        let raffle_id = self.resolve_batch(ticket_ids).await?;
        let shard = self.store.shard(raffle_id).await?;
        let mut data = self.store.lock_shard(&shard).await?;

        // 先整批校验，后整批落盘
        for &id in ticket_ids {
            let ticket = data
                .tickets
                .get(&id)
                .ok_or(CoreError::TicketNotFound(id))?;
            if ticket.status != TicketStatus::Reserved {
                warn!(ticket_id = id, status = %ticket.status, "票券状态不允许确认支付");
                return Err(CoreError::InvalidTicketState {
                    ticket_id: id,
                    status: ticket.status,
                });
            }
            if ticket.owner != buyer {
                return Err(CoreError::NotTicketOwner {
                    ticket_id: id,
                    buyer: buyer.to_string(),
                });
            }
        }

        let mut updated = Vec::with_capacity(ticket_ids.len());
        for &id in ticket_ids {
            data.set_ticket_status(id, TicketStatus::Paid)?;
            updated.push(data.tickets[&id].clone());
        }
        drop(data);

        self.store
            .push_audit(AuditEvent::payment_confirmed(raffle_id, buyer, updated.len()))
            .await;
        info!(raffle_id, buyer, count = updated.len(), "支付确认完成");
        Ok(updated)
    }

    /// 取消整批预留（支付失败/超时流程调用）
    ///
    /// reserved -> cancelled，同样全部成功或全部不动；
    /// `tickets_sold` 保持不变，与分配器的防超卖口径一致。
    pub async fn cancel_reservation(
        &self,
        ticket_ids: &[TicketId],
    ) -> Result<Vec<Ticket>, CoreError> {
        let raffle_id = self.resolve_batch(ticket_ids).await?;
        let shard = self.store.shard(raffle_id).await?;
        let mut data = self.store.lock_shard(&shard).await?;

        for &id in ticket_ids {
            let ticket = data
                .tickets
                .get(&id)
                .ok_or(CoreError::TicketNotFound(id))?;
            if ticket.status != TicketStatus::Reserved {
                return Err(CoreError::InvalidTicketState {
                    ticket_id: id,
                    status: ticket.status,
                });
            }
        }

        let mut updated = Vec::with_capacity(ticket_ids.len());
        for &id in ticket_ids {
            data.set_ticket_status(id, TicketStatus::Cancelled)?;
            updated.push(data.tickets[&id].clone());
        }
        drop(data);

        self.store
            .push_audit(AuditEvent::reservation_cancelled(raffle_id, updated.len()))
            .await;
        info!(raffle_id, count = updated.len(), "预留已取消");
        Ok(updated)
    }

    /// 解析批次归属的活动；空批次与跨活动批次直接拒绝
    async fn resolve_batch(&self, ticket_ids: &[TicketId]) -> Result<RaffleId, CoreError> {
        let first = *ticket_ids.first().ok_or(CoreError::InvalidQuantity(0))?;
        let raffle_id = self.store.raffle_of_ticket(first).await?;
        for &id in &ticket_ids[1..] {
            let other = self.store.raffle_of_ticket(id).await?;
            if other != raffle_id {
                return Err(CoreError::BatchSpansRaffles {
                    expected: raffle_id,
                    got: other,
                });
            }
        }
        Ok(raffle_id)
    }
}
