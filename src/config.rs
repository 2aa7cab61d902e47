//! 核心策略配置
//!
//! 可行性阈值属于业务策略而非不变式，默认值取自运营惯例
//! （总潜在收入 >= 2x 奖品估值，未售罄即暂停），均可按部署调整。

use serde::{Deserialize, Serialize};

use crate::types::{Raffle, RaffleId};

/// 核心策略参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorePolicy {
    /// 可行性要求：潜在总收入须达到奖品估值的倍数
    pub revenue_multiple: f64,
    /// 可行性要求：最低已售比例 [0.0, 1.0]
    pub min_sold_ratio: f64,
    /// 行锁等待预算（毫秒），超时返回 TransientConflict
    pub lock_wait_ms: u64,
    /// 号码选取的冲突重试次数上限
    pub number_pick_retries: u32,
}

impl Default for CorePolicy {
    fn default() -> Self {
        Self {
            revenue_multiple: 2.0,
            min_sold_ratio: 1.0,
            lock_wait_ms: 5000,
            number_pick_retries: 3,
        }
    }
}

/// 可行性评估结果，供管理员复核参考
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViabilityReport {
    pub raffle_id: RaffleId,
    pub potential_revenue: u64,
    /// 达标所需收入（无奖品估值时为0）
    pub required_revenue: u64,
    pub sold_ratio: f64,
    pub min_sold_ratio: f64,
    pub viable: bool,
}

impl CorePolicy {
    /// 按当前策略评估一场活动的可行性
    pub fn evaluate(&self, raffle: &Raffle) -> ViabilityReport {
        let potential = raffle.potential_revenue();
        let required = raffle
            .prize_value
            .map(|v| (v as f64 * self.revenue_multiple).ceil() as u64)
            .unwrap_or(0);
        let sold_ratio = raffle.sold_ratio();
        let viable = potential >= required && sold_ratio >= self.min_sold_ratio;
        ViabilityReport {
            raffle_id: raffle.id,
            potential_revenue: potential,
            required_revenue: required,
            sold_ratio,
            min_sold_ratio: self.min_sold_ratio,
            viable,
        }
    }
}
