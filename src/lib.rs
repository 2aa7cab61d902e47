//! 编号制抽奖系统的核心事务引擎
//!
//! 两个关键保障：
//! - **票券库存分配器**：任意并发购买压力下绝不超卖，票号活动内唯一；
//! - **可验证开奖引擎**：确定性选取中奖票，产出任何第三方可逐字节
//!   复算核验的开奖存证。
//!
//! 账户体系、支付网关、通知投递、报表导出等均为外部协作方，
//! 通过进程内调用使用本引擎。

pub mod config;
pub mod core;
pub mod errors;
pub mod types;

pub use config::{CorePolicy, ViabilityReport};
pub use core::audit::{generate_report, AuditAction, AuditEvent, AuditReport};
pub use core::draw::{digest_mod, verify_record, DrawEngine, DRAW_ALGORITHM};
pub use core::inventory::TicketInventory;
pub use core::lifecycle::{can_transition, ExpiryOutcome, RaffleLifecycle};
pub use core::payment::PaymentAdapter;
pub use core::store::RaffleStore;
pub use errors::CoreError;
pub use types::{
    NewRaffle, Raffle, RaffleId, RaffleState, Ticket, TicketId, TicketStatus, WinnerRecord,
};
