//! 票券库存分配服务
//!
//! 在单场活动的独占行锁内完成「校验 -> 选号 -> 建票 -> 计数」
//! 四步，保证任意并发购买压力下都不会超卖；号码冲突只重试选号，
//! 不重做整个预留。

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::core::audit::AuditEvent;
use crate::core::store::{RaffleStore, ShardData};
use crate::errors::CoreError;
use crate::types::{now_micros, now_secs, RaffleId, RaffleState, Ticket, TicketStatus};

/// 库存分配器句柄
#[derive(Clone)]
pub struct TicketInventory {
    store: RaffleStore,
}

impl TicketInventory {
    pub fn new(store: RaffleStore) -> Self {
        Self { store }
    }

    /// 为买家预留 `quantity` 张票
    ///
    /// 全部成功或全部失败：要么创建 `quantity` 张 reserved 票并把
    /// `tickets_sold` 恰好加一次，要么什么都不落盘。预留即占用名额，
    /// 支付确认是后续独立步骤。
    pub async fn reserve(
        &self,
        raffle_id: RaffleId,
        buyer: &str,
        quantity: u32,
    ) -> Result<Vec<Ticket>, CoreError> {
        if quantity < 1 {
            return Err(CoreError::InvalidQuantity(quantity));
        }

        let shard = self.store.shard(raffle_id).await?;
        let mut data = self.store.lock_shard(&shard).await?;

        // 仅 active 活动接受预留
        if data.raffle.state != RaffleState::Active {
            return Err(CoreError::RaffleNotActive {
                raffle_id,
                state: data.raffle.state,
            });
        }

        // 单买家限额：禁止多张时上限视为1
        let limit = if data.raffle.allow_multiple_tickets {
            data.raffle.max_tickets_per_buyer
        } else {
            1
        };
        let held = data.buyer_ticket_count(buyer);
        if held.saturating_add(quantity) > limit {
            return Err(CoreError::BuyerLimitExceeded {
                raffle_id,
                buyer: buyer.to_string(),
                limit,
                held,
            });
        }

        // 容量检查：在行锁内重读计数，杜绝陈旧读
        if data.raffle.tickets_sold.saturating_add(quantity) > data.raffle.capacity {
            return Err(CoreError::CapacityExceeded {
                raffle_id,
                available: data.raffle.available(),
            });
        }

        let tickets = self.allocate_numbers(raffle_id, buyer, quantity, &mut data)?;

        // 售罄不改状态：名额上限由容量检查守住，截止由到期巡检负责
        data.raffle.tickets_sold += quantity;
        data.raffle.updated_at = now_secs();
        drop(data);

        self.store.index_tickets(&tickets).await;
        self.store
            .push_audit(AuditEvent::tickets_reserved(raffle_id, buyer, tickets.len()))
            .await;
        info!(raffle_id, buyer, quantity, "票券预留成功");
        Ok(tickets)
    }

    /// 选号并插入票券，命中号码唯一约束时仅重试选号
    fn allocate_numbers(
        &self,
        raffle_id: RaffleId,
        buyer: &str,
        quantity: u32,
        data: &mut ShardData,
    ) -> Result<Vec<Ticket>, CoreError> {
        let retries = self.store.policy().number_pick_retries;
        for attempt in 0..=retries {
            let numbers = data.free_numbers(quantity);
            if numbers.len() < quantity as usize {
                // 计数说仍有名额而号码表不够用，属于存储损坏
                error!(
                    raffle_id,
                    quantity,
                    free = numbers.len(),
                    "号码表与售出计数不一致"
                );
                return Err(CoreError::InvariantViolation(format!(
                    "raffle {}: counter reports {} available but only {} free numbers",
                    raffle_id,
                    data.raffle.available(),
                    numbers.len()
                )));
            }

            let now = now_secs();
            let mut inserted = Vec::with_capacity(quantity as usize);
            let mut conflict = false;
            for number in numbers {
                let ticket = Ticket {
                    id: self.store.next_ticket_id(),
                    raffle_id,
                    number,
                    owner: buyer.to_string(),
                    status: TicketStatus::Reserved,
                    code: generate_ticket_code(&data.codes),
                    created_at: now,
                    updated_at: now,
                };
                match data.insert_ticket(ticket.clone()) {
                    Ok(()) => inserted.push(ticket),
                    Err(CoreError::DuplicateTicketNumber { number, .. }) => {
                        warn!(raffle_id, number, attempt, "号码冲突，回滚后重试选号");
                        conflict = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            if !conflict {
                return Ok(inserted);
            }
            // 回滚本轮已插入的票券，整个预留保持未发生
            for t in &inserted {
                data.remove_ticket(t.id);
            }
        }
        warn!(raffle_id, retries, "号码选取重试耗尽");
        Err(CoreError::TransientConflict { raffle_id })
    }
}

/// 生成活动内唯一的票券验证码：随机32字节 + 微秒时间哈希后取前32个hex字符
fn generate_ticket_code(existing: &HashSet<String>) -> String {
    loop {
        let mut rng_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut rng_bytes);
        let mut hasher = Sha256::new();
        hasher.update(rng_bytes);
        hasher.update(now_micros().to_le_bytes());
        let mut code = hex::encode(hasher.finalize());
        code.truncate(32);
        if !existing.contains(&code) {
            return code;
        }
    }
}
