//! 核心数据模型
//!
//! 定义抽奖活动（Raffle）、票券（Ticket）与开奖记录（WinnerRecord）
//! 以及各自的状态枚举与校验逻辑。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CoreError;

/// 抽奖活动ID
pub type RaffleId = u64;
/// 票券ID（全局单调递增）
pub type TicketId = u64;

/// 抽奖活动状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RaffleState {
    /// 草稿
    Draft,
    /// 待审批
    PendingApproval,
    /// 已批准（尚未开售）
    Approved,
    /// 已驳回
    Rejected,
    /// 进行中（接受购票）
    Active,
    /// 暂停（等待管理员复核）
    Paused,
    /// 已截止（不再售票）
    Closed,
    /// 已开奖（终态）
    Finalized,
    /// 已取消（终态）
    Cancelled,
}

impl RaffleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaffleState::Draft => "draft",
            RaffleState::PendingApproval => "pending_approval",
            RaffleState::Approved => "approved",
            RaffleState::Rejected => "rejected",
            RaffleState::Active => "active",
            RaffleState::Paused => "paused",
            RaffleState::Closed => "closed",
            RaffleState::Finalized => "finalized",
            RaffleState::Cancelled => "cancelled",
        }
    }

    /// 是否为终态（不可再迁移）
    pub fn is_terminal(&self) -> bool {
        matches!(self, RaffleState::Finalized | RaffleState::Cancelled)
    }
}

impl fmt::Display for RaffleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 票券状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// 已预留（待支付）
    Reserved,
    /// 已支付（参与开奖）
    Paid,
    /// 已取消（不参与开奖，号码不回收）
    Cancelled,
    /// 中奖票
    Winner,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Reserved => "reserved",
            TicketStatus::Paid => "paid",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Winner => "winner",
        }
    }

    /// 是否占用售出名额（tickets_sold 统计口径）
    pub fn counts_as_sold(&self) -> bool {
        matches!(
            self,
            TicketStatus::Reserved | TicketStatus::Paid | TicketStatus::Winner
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 抽奖活动记录
///
/// 不变式：`tickets_sold` 恒等于该活动下处于
/// {reserved, paid, winner} 状态的票券数量，且永不超过 `capacity`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Raffle {
    pub id: RaffleId,
    /// 组织者地址/标识
    pub organizer: String,
    pub title: String,
    pub description: String,
    /// 单票价格（最小货币单位，如分），必须 > 0
    pub price_per_ticket: u64,
    /// 总票数，必须 >= 1
    pub capacity: u32,
    /// 已售票数（单调递增，取消不回退）
    pub tickets_sold: u32,
    /// 计划开奖时间（unix秒）
    pub draw_time: u64,
    /// 奖品估值（最小货币单位），用于可行性评估
    pub prize_value: Option<u64>,
    pub state: RaffleState,
    /// 是否允许同一买家购买多张
    pub allow_multiple_tickets: bool,
    /// 单买家最大持票数（仅在允许多张时生效）
    pub max_tickets_per_buyer: u32,
    /// 暂停原因（仅 paused 状态下有值）
    pub pause_reason: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Raffle {
    /// 剩余可售票数
    pub fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.tickets_sold)
    }

    /// 已售比例 [0.0, 1.0]
    pub fn sold_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.tickets_sold as f64 / self.capacity as f64
    }

    /// 全部售出时的总收入
    pub fn potential_revenue(&self) -> u64 {
        self.price_per_ticket * self.capacity as u64
    }

    /// 当前已售收入
    pub fn current_revenue(&self) -> u64 {
        self.price_per_ticket * self.tickets_sold as u64
    }
}

/// 创建抽奖活动的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRaffle {
    pub organizer: String,
    pub title: String,
    pub description: String,
    pub price_per_ticket: u64,
    pub capacity: u32,
    pub draw_time: u64,
    pub prize_value: Option<u64>,
    pub allow_multiple_tickets: bool,
    pub max_tickets_per_buyer: u32,
}

impl NewRaffle {
    /// 字段合法性校验
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.capacity < 1 {
            return Err(CoreError::InvalidRaffle {
                reason: "capacity must be at least 1".to_string(),
            });
        }
        if self.price_per_ticket == 0 {
            return Err(CoreError::InvalidRaffle {
                reason: "price_per_ticket must be greater than zero".to_string(),
            });
        }
        if self.max_tickets_per_buyer < 1 {
            return Err(CoreError::InvalidRaffle {
                reason: "max_tickets_per_buyer must be at least 1".to_string(),
            });
        }
        if self.title.trim().is_empty() {
            return Err(CoreError::InvalidRaffle {
                reason: "title must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// 票券记录
///
/// 不变式：同一活动内 `number` 唯一，任何时刻每个
/// `(raffle_id, number)` 至多存在一张票。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub id: TicketId,
    pub raffle_id: RaffleId,
    /// 票号，范围 [1, capacity]
    pub number: u32,
    /// 买家地址/标识
    pub owner: String,
    pub status: TicketStatus,
    /// 防伪验证码（随机熵+哈希生成，活动内唯一）
    pub code: String,
    pub created_at: u64,
    pub updated_at: u64,
}

/// 开奖记录（数字存证）
///
/// 每个活动至多一条，插入后不可变更；任何第三方可凭
/// 记录中的输入重放计算并核对 `seed_hash` 与 `verification_hash`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WinnerRecord {
    pub raffle_id: RaffleId,
    pub winning_ticket_id: TicketId,
    pub winning_number: u32,
    pub winner_owner: String,
    /// 种子哈希（SHA-256十六进制）
    pub seed_hash: String,
    /// 开奖时刻（unix微秒）
    pub draw_timestamp_micros: u64,
    /// 验证哈希（SHA-256十六进制）
    pub verification_hash: String,
    /// 参与开奖的已支付票数
    pub participant_count: usize,
    /// 选取算法标识
    pub algorithm: String,
    /// 人类可读的开奖存证文本
    pub ledger_text: String,
}

/// 当前unix秒
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 当前unix微秒
pub fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_raffle() -> NewRaffle {
        NewRaffle {
            organizer: "org1".to_string(),
            title: "iPhone 15".to_string(),
            description: "demo".to_string(),
            price_per_ticket: 1000,
            capacity: 100,
            draw_time: now_secs() + 3600,
            prize_value: Some(40_000),
            allow_multiple_tickets: true,
            max_tickets_per_buyer: 10,
        }
    }

    #[test]
    fn test_new_raffle_validation() {
        assert!(base_raffle().validate().is_ok());

        let mut r = base_raffle();
        r.capacity = 0;
        assert!(matches!(r.validate(), Err(CoreError::InvalidRaffle { .. })));

        let mut r = base_raffle();
        r.price_per_ticket = 0;
        assert!(matches!(r.validate(), Err(CoreError::InvalidRaffle { .. })));

        let mut r = base_raffle();
        r.max_tickets_per_buyer = 0;
        assert!(matches!(r.validate(), Err(CoreError::InvalidRaffle { .. })));

        let mut r = base_raffle();
        r.title = "  ".to_string();
        assert!(matches!(r.validate(), Err(CoreError::InvalidRaffle { .. })));
    }

    #[test]
    fn test_raffle_derived_values() {
        let raffle = Raffle {
            id: 1,
            organizer: "org1".to_string(),
            title: "t".to_string(),
            description: String::new(),
            price_per_ticket: 1000,
            capacity: 100,
            tickets_sold: 25,
            draw_time: 0,
            prize_value: Some(40_000),
            state: RaffleState::Active,
            allow_multiple_tickets: true,
            max_tickets_per_buyer: 10,
            pause_reason: None,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(raffle.available(), 75);
        assert!((raffle.sold_ratio() - 0.25).abs() < 1e-9);
        assert_eq!(raffle.potential_revenue(), 100_000);
        assert_eq!(raffle.current_revenue(), 25_000);
    }

    #[test]
    fn test_state_serde_snake_case() {
        let s = serde_json::to_string(&RaffleState::PendingApproval).unwrap();
        assert_eq!(s, "\"pending_approval\"");
        let t = serde_json::to_string(&TicketStatus::Reserved).unwrap();
        assert_eq!(t, "\"reserved\"");
    }

    #[test]
    fn test_counts_as_sold() {
        assert!(TicketStatus::Reserved.counts_as_sold());
        assert!(TicketStatus::Paid.counts_as_sold());
        assert!(TicketStatus::Winner.counts_as_sold());
        assert!(!TicketStatus::Cancelled.counts_as_sold());
    }
}
