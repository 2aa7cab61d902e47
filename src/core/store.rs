//! 抽奖活动注册表（数据访问层）
//!
//! 独占持有活动行、票券行与开奖记录。锁粒度严格按活动划分：
//! 每场活动一个分片（shard），分片内部由独占互斥锁保护，等价于
//! 数据库的行级 `SELECT ... FOR UPDATE`；分片目录仅用读写锁做查找，
//! 不同活动之间的操作互不阻塞。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::info;

use crate::config::CorePolicy;
use crate::core::audit::AuditEvent;
use crate::errors::CoreError;
use crate::types::{
    now_secs, NewRaffle, Raffle, RaffleId, RaffleState, Ticket, TicketId, TicketStatus,
    WinnerRecord,
};

/// 单场活动的分片：活动行 + 票券行 + 开奖记录
pub(crate) struct RaffleShard {
    pub(crate) raffle_id: RaffleId,
    pub(crate) data: Mutex<ShardData>,
}

/// 分片内部数据，仅在持有分片锁时可见
pub(crate) struct ShardData {
    pub(crate) raffle: Raffle,
    /// 票券按ID有序存放，遍历顺序即ID升序
    pub(crate) tickets: BTreeMap<TicketId, Ticket>,
    /// 已占用号码，(raffle_id, number) 唯一约束的载体
    pub(crate) numbers: HashSet<u32>,
    /// 已发放的验证码，活动内唯一
    pub(crate) codes: HashSet<String>,
    /// 开奖记录，至多一条，插入后不可变更
    pub(crate) winner: Option<WinnerRecord>,
}

impl ShardData {
    /// 插入票券，命中 (raffle_id, number) 唯一约束时拒绝
    pub(crate) fn insert_ticket(&mut self, ticket: Ticket) -> Result<(), CoreError> {
        if !self.numbers.insert(ticket.number) {
            return Err(CoreError::DuplicateTicketNumber {
                raffle_id: self.raffle.id,
                number: ticket.number,
            });
        }
        self.codes.insert(ticket.code.clone());
        self.tickets.insert(ticket.id, ticket);
        Ok(())
    }

    /// 回滚一张刚插入的票券（预留失败时使用）
    pub(crate) fn remove_ticket(&mut self, ticket_id: TicketId) {
        if let Some(t) = self.tickets.remove(&ticket_id) {
            self.numbers.remove(&t.number);
            self.codes.remove(&t.code);
        }
    }

    /// 买家当前占用名额的票数（reserved + paid + winner）
    pub(crate) fn buyer_ticket_count(&self, buyer: &str) -> u32 {
        self.tickets
            .values()
            .filter(|t| t.owner == buyer && t.status.counts_as_sold())
            .count() as u32
    }

    /// 按ID升序返回所有已支付票券
    pub(crate) fn paid_tickets(&self) -> Vec<&Ticket> {
        self.tickets
            .values()
            .filter(|t| t.status == TicketStatus::Paid)
            .collect()
    }

    /// 取最小的 `quantity` 个未占用号码（first-available策略）
    pub(crate) fn free_numbers(&self, quantity: u32) -> Vec<u32> {
        (1..=self.raffle.capacity)
            .filter(|n| !self.numbers.contains(n))
            .take(quantity as usize)
            .collect()
    }

    /// 写入开奖记录；已存在则本次尝试判负
    pub(crate) fn insert_winner(&mut self, record: WinnerRecord) -> Result<(), CoreError> {
        if self.winner.is_some() {
            return Err(CoreError::RaceLost(self.raffle.id));
        }
        self.winner = Some(record);
        Ok(())
    }

    pub(crate) fn set_ticket_status(
        &mut self,
        ticket_id: TicketId,
        status: TicketStatus,
    ) -> Result<(), CoreError> {
        let ticket = self
            .tickets
            .get_mut(&ticket_id)
            .ok_or(CoreError::TicketNotFound(ticket_id))?;
        ticket.status = status;
        ticket.updated_at = now_secs();
        Ok(())
    }
}

struct StoreInner {
    shards: RwLock<HashMap<RaffleId, Arc<RaffleShard>>>,
    /// 票券ID -> 活动ID 的反查索引
    ticket_index: RwLock<HashMap<TicketId, RaffleId>>,
    audit: RwLock<Vec<AuditEvent>>,
    next_raffle_id: AtomicU64,
    next_ticket_id: AtomicU64,
    policy: CorePolicy,
}

/// 注册表句柄，可廉价克隆并跨任务共享
#[derive(Clone)]
pub struct RaffleStore {
    inner: Arc<StoreInner>,
}

impl RaffleStore {
    pub fn new(policy: CorePolicy) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                shards: RwLock::new(HashMap::new()),
                ticket_index: RwLock::new(HashMap::new()),
                audit: RwLock::new(Vec::new()),
                next_raffle_id: AtomicU64::new(1),
                next_ticket_id: AtomicU64::new(1),
                policy,
            }),
        }
    }

    pub fn policy(&self) -> &CorePolicy {
        &self.inner.policy
    }

    /// 创建活动，初始状态为草稿
    pub async fn create_raffle(&self, new: NewRaffle) -> Result<Raffle, CoreError> {
        new.validate()?;
        let id = self.inner.next_raffle_id.fetch_add(1, Ordering::SeqCst);
        let now = now_secs();
        let raffle = Raffle {
            id,
            organizer: new.organizer,
            title: new.title,
            description: new.description,
            price_per_ticket: new.price_per_ticket,
            capacity: new.capacity,
            tickets_sold: 0,
            draw_time: new.draw_time,
            prize_value: new.prize_value,
            state: RaffleState::Draft,
            allow_multiple_tickets: new.allow_multiple_tickets,
            max_tickets_per_buyer: new.max_tickets_per_buyer,
            pause_reason: None,
            created_at: now,
            updated_at: now,
        };
        let shard = Arc::new(RaffleShard {
            raffle_id: id,
            data: Mutex::new(ShardData {
                raffle: raffle.clone(),
                tickets: BTreeMap::new(),
                numbers: HashSet::new(),
                codes: HashSet::new(),
                winner: None,
            }),
        });
        self.inner.shards.write().await.insert(id, shard);
        self.push_audit(AuditEvent::raffle_created(id, &raffle.organizer))
            .await;
        info!(raffle_id = id, title = %raffle.title, "抽奖活动已创建");
        Ok(raffle)
    }

    /// 查找活动分片
    pub(crate) async fn shard(&self, raffle_id: RaffleId) -> Result<Arc<RaffleShard>, CoreError> {
        self.inner
            .shards
            .read()
            .await
            .get(&raffle_id)
            .cloned()
            .ok_or(CoreError::RaffleNotFound(raffle_id))
    }

    /// 在锁等待预算内取得分片独占锁，超时返回 TransientConflict
    pub(crate) async fn lock_shard<'a>(
        &self,
        shard: &'a RaffleShard,
    ) -> Result<MutexGuard<'a, ShardData>, CoreError> {
        let budget = Duration::from_millis(self.inner.policy.lock_wait_ms);
        tokio::time::timeout(budget, shard.data.lock())
            .await
            .map_err(|_| CoreError::TransientConflict {
                raffle_id: shard.raffle_id,
            })
    }

    pub async fn get_raffle(&self, raffle_id: RaffleId) -> Result<Raffle, CoreError> {
        let shard = self.shard(raffle_id).await?;
        let data = self.lock_shard(&shard).await?;
        Ok(data.raffle.clone())
    }

    pub async fn list_raffle_ids(&self) -> Vec<RaffleId> {
        let mut ids: Vec<RaffleId> = self.inner.shards.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn list_tickets(&self, raffle_id: RaffleId) -> Result<Vec<Ticket>, CoreError> {
        let shard = self.shard(raffle_id).await?;
        let data = self.lock_shard(&shard).await?;
        Ok(data.tickets.values().cloned().collect())
    }

    pub async fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket, CoreError> {
        let raffle_id = self.raffle_of_ticket(ticket_id).await?;
        let shard = self.shard(raffle_id).await?;
        let data = self.lock_shard(&shard).await?;
        data.tickets
            .get(&ticket_id)
            .cloned()
            .ok_or(CoreError::TicketNotFound(ticket_id))
    }

    pub async fn winner_record(
        &self,
        raffle_id: RaffleId,
    ) -> Result<Option<WinnerRecord>, CoreError> {
        let shard = self.shard(raffle_id).await?;
        let data = self.lock_shard(&shard).await?;
        Ok(data.winner.clone())
    }

    pub(crate) async fn raffle_of_ticket(&self, ticket_id: TicketId) -> Result<RaffleId, CoreError> {
        self.inner
            .ticket_index
            .read()
            .await
            .get(&ticket_id)
            .copied()
            .ok_or(CoreError::TicketNotFound(ticket_id))
    }

    /// 预留提交后登记票券反查索引
    pub(crate) async fn index_tickets(&self, tickets: &[Ticket]) {
        let mut index = self.inner.ticket_index.write().await;
        for t in tickets {
            index.insert(t.id, t.raffle_id);
        }
    }

    pub(crate) fn next_ticket_id(&self) -> TicketId {
        self.inner.next_ticket_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) async fn push_audit(&self, event: AuditEvent) {
        self.inner.audit.write().await.push(event);
    }

    /// 审计日志快照
    pub async fn audit_log(&self) -> Vec<AuditEvent> {
        self.inner.audit.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_secs;

    fn new_raffle(capacity: u32) -> NewRaffle {
        NewRaffle {
            organizer: "org1".to_string(),
            title: "test raffle".to_string(),
            description: String::new(),
            price_per_ticket: 500,
            capacity,
            draw_time: now_secs() + 3600,
            prize_value: None,
            allow_multiple_tickets: true,
            max_tickets_per_buyer: 10,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_raffle() {
        let store = RaffleStore::new(CorePolicy::default());
        let raffle = store.create_raffle(new_raffle(10)).await.unwrap();
        assert_eq!(raffle.state, RaffleState::Draft);
        assert_eq!(raffle.tickets_sold, 0);

        let fetched = store.get_raffle(raffle.id).await.unwrap();
        assert_eq!(fetched, raffle);
        assert_eq!(store.list_raffle_ids().await, vec![raffle.id]);
    }

    #[tokio::test]
    async fn test_missing_raffle_and_ticket() {
        let store = RaffleStore::new(CorePolicy::default());
        assert!(matches!(
            store.get_raffle(999).await,
            Err(CoreError::RaffleNotFound(999))
        ));
        assert!(matches!(
            store.get_ticket(999).await,
            Err(CoreError::TicketNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_invalid_raffle_rejected() {
        let store = RaffleStore::new(CorePolicy::default());
        let mut bad = new_raffle(0);
        bad.capacity = 0;
        assert!(matches!(
            store.create_raffle(bad).await,
            Err(CoreError::InvalidRaffle { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_number_rejected_by_shard() {
        let store = RaffleStore::new(CorePolicy::default());
        let raffle = store.create_raffle(new_raffle(10)).await.unwrap();
        let shard = store.shard(raffle.id).await.unwrap();
        let mut data = store.lock_shard(&shard).await.unwrap();

        let ticket = Ticket {
            id: 1,
            raffle_id: raffle.id,
            number: 5,
            owner: "alice".to_string(),
            status: TicketStatus::Reserved,
            code: "c1".to_string(),
            created_at: 0,
            updated_at: 0,
        };
        data.insert_ticket(ticket.clone()).unwrap();
        let mut dup = ticket;
        dup.id = 2;
        dup.code = "c2".to_string();
        assert!(matches!(
            data.insert_ticket(dup),
            Err(CoreError::DuplicateTicketNumber { number: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_lock_wait_timeout_maps_to_transient_conflict() {
        let policy = CorePolicy { lock_wait_ms: 20, ..CorePolicy::default() };
        let store = RaffleStore::new(policy);
        let raffle = store.create_raffle(new_raffle(10)).await.unwrap();
        let shard = store.shard(raffle.id).await.unwrap();

        let guard = store.lock_shard(&shard).await.unwrap();
        let err = store.get_raffle(raffle.id).await.unwrap_err();
        assert!(matches!(err, CoreError::TransientConflict { .. }));
        assert!(err.is_retryable());
        drop(guard);

        // 锁释放后恢复正常
        assert!(store.get_raffle(raffle.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_free_numbers_lowest_first() {
        let store = RaffleStore::new(CorePolicy::default());
        let raffle = store.create_raffle(new_raffle(5)).await.unwrap();
        let shard = store.shard(raffle.id).await.unwrap();
        let mut data = store.lock_shard(&shard).await.unwrap();
        data.numbers.insert(1);
        data.numbers.insert(3);
        assert_eq!(data.free_numbers(3), vec![2, 4, 5]);
        assert_eq!(data.free_numbers(10), vec![2, 4, 5]);
    }
}
