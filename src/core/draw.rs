//! 可验证开奖引擎
//!
//! 开奖过程完全确定：种子由「微秒时间戳|活动ID|标题|有序票券ID」
//! 拼接后做 SHA-256，中奖下标取哈希整数对参与票数的模。不使用任何
//! 语言自带的带种子PRNG——PRNG算法在不同运行时之间不可移植，直接
//! 取模让任何第三方都能逐字节复算验证。

use sha2::{Digest, Sha256};
use tracing::info;

use crate::core::audit::AuditEvent;
use crate::core::lifecycle::can_transition;
use crate::core::store::RaffleStore;
use crate::errors::CoreError;
use crate::types::{
    now_micros, now_secs, RaffleId, RaffleState, TicketId, TicketStatus, WinnerRecord,
};

/// 选取算法标识，写入开奖记录供外部核对
pub const DRAW_ALGORITHM: &str = "sha256-mod";

/// 开奖引擎句柄
#[derive(Clone)]
pub struct DrawEngine {
    store: RaffleStore,
}

impl DrawEngine {
    pub fn new(store: RaffleStore) -> Self {
        Self { store }
    }

    /// 为活动开奖，幂等：已有开奖记录时原样返回
    ///
    /// 整个过程持有该活动的独占行锁：标记中奖票、写入唯一的
    /// WinnerRecord、活动迁移至 finalized，三者一并生效。
    pub async fn select_winner(&self, raffle_id: RaffleId) -> Result<WinnerRecord, CoreError> {
        let shard = self.store.shard(raffle_id).await?;
        let mut data = self.store.lock_shard(&shard).await?;

        // 幂等路径：重复开奖返回既有记录
        if let Some(record) = &data.winner {
            info!(raffle_id, "开奖记录已存在，返回既有记录");
            return Ok(record.clone());
        }

        // 仅允许可迁移到 finalized 的状态开奖（active / closed）
        if !can_transition(data.raffle.state, RaffleState::Finalized) {
            return Err(CoreError::RaffleNotActive {
                raffle_id,
                state: data.raffle.state,
            });
        }

        let paid = data.paid_tickets();
        if paid.is_empty() {
            return Err(CoreError::NoEligibleTickets { raffle_id });
        }

        // BTreeMap遍历即ID升序，这里保留显式排序以固定重放顺序
        let mut sorted: Vec<(TicketId, u32, String)> = paid
            .iter()
            .map(|t| (t.id, t.number, t.owner.clone()))
            .collect();
        sorted.sort_by_key(|(id, _, _)| *id);
        let participant_count = sorted.len();

        let micros = now_micros();
        let ids: Vec<String> = sorted.iter().map(|(id, _, _)| id.to_string()).collect();
        let seed_string = format!(
            "{}|{}|{}|{}",
            micros,
            raffle_id,
            data.raffle.title,
            ids.join(",")
        );
        let digest = Sha256::digest(seed_string.as_bytes());
        let seed_hash = hex::encode(&digest[..]);

        let winner_index = digest_mod(&digest, participant_count);
        let (winning_ticket_id, winning_number, winner_owner) = sorted[winner_index].clone();

        let verification_hash = verification_hash(&seed_hash, micros, winning_ticket_id, winning_number);
        let ledger_text = render_ledger(
            &data.raffle.title,
            raffle_id,
            micros,
            participant_count,
            &seed_hash,
            &verification_hash,
            &winner_owner,
            winning_number,
        );

        let record = WinnerRecord {
            raffle_id,
            winning_ticket_id,
            winning_number,
            winner_owner,
            seed_hash,
            draw_timestamp_micros: micros,
            verification_hash,
            participant_count,
            algorithm: DRAW_ALGORITHM.to_string(),
            ledger_text,
        };

        // 先落记录再改票：行锁贯穿全程，幂等检查已排除既有记录
        data.insert_winner(record.clone())?;
        data.set_ticket_status(winning_ticket_id, TicketStatus::Winner)?;

        let from = data.raffle.state;
        data.raffle.state = RaffleState::Finalized;
        data.raffle.updated_at = now_secs();
        drop(data);

        self.store
            .push_audit(AuditEvent::winner_drawn(raffle_id, record.winning_number))
            .await;
        self.store
            .push_audit(AuditEvent::state_changed(
                raffle_id,
                from,
                RaffleState::Finalized,
                None,
            ))
            .await;
        info!(
            raffle_id,
            winning_ticket = record.winning_ticket_id,
            winning_number = record.winning_number,
            participants = participant_count,
            "开奖完成"
        );
        Ok(record)
    }

    /// 独立重放核验：根据存储中的票券重算种子与验证哈希
    pub async fn verify(&self, raffle_id: RaffleId) -> Result<bool, CoreError> {
        let shard = self.store.shard(raffle_id).await?;
        let data = self.store.lock_shard(&shard).await?;
        let record = data.winner.clone().ok_or(CoreError::NotYetDrawn { raffle_id })?;
        let title = data.raffle.title.clone();
        // 开奖后中奖票已是 winner 状态，参与集合 = paid + winner
        let mut ids: Vec<TicketId> = data
            .tickets
            .values()
            .filter(|t| matches!(t.status, TicketStatus::Paid | TicketStatus::Winner))
            .map(|t| t.id)
            .collect();
        ids.sort_unstable();
        drop(data);
        Ok(verify_record(&record, &title, &ids))
    }
}

/// 把SHA-256摘要按256进制大整数对 `modulus` 取模（Horner归约）
///
/// 与「十六进制摘要转大整数再取模」结果一致，但无需大整数库。
pub fn digest_mod(digest: &[u8], modulus: usize) -> usize {
    debug_assert!(modulus > 0);
    let m = modulus as u128;
    let mut acc: u128 = 0;
    for &byte in digest {
        acc = (acc * 256 + byte as u128) % m;
    }
    acc as usize
}

/// 验证哈希：SHA-256("种子哈希|微秒时间戳|中奖票ID|中奖号码")
pub fn verification_hash(
    seed_hash: &str,
    micros: u64,
    ticket_id: TicketId,
    number: u32,
) -> String {
    let input = format!("{}|{}|{}|{}", seed_hash, micros, ticket_id, number);
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// 任何第三方可调用的记录核验：凭记录输入逐字节复算
///
/// `paid_ticket_ids` 为开奖时参与的全部票券ID（无需有序，内部排序）。
pub fn verify_record(record: &WinnerRecord, title: &str, paid_ticket_ids: &[TicketId]) -> bool {
    // 合法记录至少有1名参与者；空票集直接判伪，不进入取模
    if paid_ticket_ids.is_empty() || paid_ticket_ids.len() != record.participant_count {
        return false;
    }
    let mut ids = paid_ticket_ids.to_vec();
    ids.sort_unstable();

    let joined: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    let seed_string = format!(
        "{}|{}|{}|{}",
        record.draw_timestamp_micros,
        record.raffle_id,
        title,
        joined.join(",")
    );
    let digest = Sha256::digest(seed_string.as_bytes());
    if hex::encode(&digest[..]) != record.seed_hash {
        return false;
    }

    let index = digest_mod(&digest, ids.len());
    if ids[index] != record.winning_ticket_id {
        return false;
    }

    let expected = verification_hash(
        &record.seed_hash,
        record.draw_timestamp_micros,
        record.winning_ticket_id,
        record.winning_number,
    );
    expected == record.verification_hash
}

/// 生成人类可读的开奖存证文本
#[allow(clippy::too_many_arguments)]
fn render_ledger(
    title: &str,
    raffle_id: RaffleId,
    micros: u64,
    participants: usize,
    seed_hash: &str,
    verification_hash: &str,
    winner_owner: &str,
    winning_number: u32,
) -> String {
    let drawn_at = chrono::DateTime::<chrono::Utc>::from_timestamp((micros / 1_000_000) as i64, 0)
        .map(|dt| dt.format("%d/%m/%Y %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "DIGITAL DRAW LEDGER - {title}\n\
         Raffle ID: {raffle_id}\n\
         Draw date: {drawn_at}\n\
         Timestamp: {micros}\n\
         Participants: {participants}\n\
         Algorithm: {DRAW_ALGORITHM}\n\
         Seed: {seed_hash}\n\
         Verification hash: {verification_hash}\n\
         Winner: {winner_owner} - Ticket #{winning_number}\n"
    )
}
