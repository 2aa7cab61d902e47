//! 核心错误类型
//!
//! 错误分为四类：容量类（用户可见的正常结果）、状态类（调用窗口不合法）、
//! 并发类（可重试）、不变式违例（致命，须记录并上报）。

use thiserror::Error;

use crate::types::{RaffleId, RaffleState, TicketId, TicketStatus};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("raffle {0} not found")]
    RaffleNotFound(RaffleId),

    #[error("ticket {0} not found")]
    TicketNotFound(TicketId),

    #[error("invalid raffle definition: {reason}")]
    InvalidRaffle { reason: String },

    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(u32),

    #[error("raffle {raffle_id} is not accepting this operation (state: {state})")]
    RaffleNotActive {
        raffle_id: RaffleId,
        state: RaffleState,
    },

    #[error("raffle {raffle_id} capacity exceeded: only {available} tickets available")]
    CapacityExceeded { raffle_id: RaffleId, available: u32 },

    #[error("buyer {buyer} would exceed the per-buyer limit of {limit} for raffle {raffle_id} (already holds {held})")]
    BuyerLimitExceeded {
        raffle_id: RaffleId,
        buyer: String,
        limit: u32,
        held: u32,
    },

    #[error("ticket {ticket_id} is in state {status}, expected reserved")]
    InvalidTicketState {
        ticket_id: TicketId,
        status: TicketStatus,
    },

    #[error("ticket {ticket_id} is not owned by {buyer}")]
    NotTicketOwner { ticket_id: TicketId, buyer: String },

    #[error("ticket batch spans multiple raffles: expected raffle {expected}, got {got}")]
    BatchSpansRaffles { expected: RaffleId, got: RaffleId },

    #[error("raffle {raffle_id} has no paid tickets eligible for the draw")]
    NoEligibleTickets { raffle_id: RaffleId },

    #[error("raffle {raffle_id} has not been drawn yet")]
    NotYetDrawn { raffle_id: RaffleId },

    #[error("invalid lifecycle transition {from} -> {to} for raffle {raffle_id}")]
    InvalidTransition {
        raffle_id: RaffleId,
        from: RaffleState,
        to: RaffleState,
    },

    /// 号码冲突（唯一约束 (raffle_id, number) 命中），仅重试号码选取
    #[error("ticket number {number} already taken in raffle {raffle_id}")]
    DuplicateTicketNumber { raffle_id: RaffleId, number: u32 },

    /// 锁等待超时或号码冲突重试耗尽，调用方可重试整个操作
    #[error("transient conflict on raffle {raffle_id}, retry the operation")]
    TransientConflict { raffle_id: RaffleId },

    /// 并发开奖竞争失败，调用方应重读已落盘的开奖记录
    #[error("lost the draw race for raffle {0}")]
    RaceLost(RaffleId),

    /// 存储损坏或逻辑缺陷，绝不可静默吞掉
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl CoreError {
    /// 并发类错误：重试即可恢复
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientConflict { .. }
                | CoreError::RaceLost(_)
                | CoreError::DuplicateTicketNumber { .. }
        )
    }

    /// 容量类错误：面向用户的正常业务结果
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            CoreError::CapacityExceeded { .. } | CoreError::BuyerLimitExceeded { .. }
        )
    }

    /// 不变式违例：致命，需要上报排查
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::InvariantViolation(_))
    }
}
