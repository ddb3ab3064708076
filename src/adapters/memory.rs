use crate::domain::model::{Delivery, PublishTarget, RecordBatch, Topology};
use crate::domain::ports::{BrokerGateway, RowStore};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use sqlx::error::{DatabaseError, ErrorKind};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct BrokerState {
    /// Ready messages per queue with their redelivered flag.
    queues: HashMap<String, VecDeque<(Vec<u8>, bool)>>,
    exchanges: HashMap<String, Vec<String>>,
    unacked: BTreeMap<u64, (String, Vec<u8>)>,
    next_tag: u64,
    acks: usize,
    publishes: usize,
    fail_publishes: bool,
}

/// Broker that keeps every queue in process memory.
///
/// Follows the at-least-once rules of a real broker closely enough for
/// driver tests: fetched messages stay unacked until acknowledged and can be
/// pushed back with `requeue_unacked`, which marks them as redelivered.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_ready(&self, queue: &str, body: Vec<u8>) {
        let mut state = self.state.lock().await;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back((body, false));
    }

    pub async fn ready_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|ready| ready.iter().map(|(body, _)| body.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    pub async fn publish_count(&self) -> usize {
        self.state.lock().await.publishes
    }

    pub async fn ack_count(&self) -> usize {
        self.state.lock().await.acks
    }

    pub async fn fail_publishes(&self, fail: bool) {
        self.state.lock().await.fail_publishes = fail;
    }

    /// What the broker does when a consumer's channel closes without acking.
    pub async fn requeue_unacked(&self) {
        let mut state = self.state.lock().await;
        let pending = std::mem::take(&mut state.unacked);
        for (_, (queue, body)) in pending.into_iter().rev() {
            state
                .queues
                .entry(queue)
                .or_default()
                .push_front((body, true));
        }
    }
}

#[async_trait]
impl BrokerGateway for InMemoryBroker {
    async fn ensure_topology(&self, topology: &Topology) -> Result<()> {
        let mut state = self.state.lock().await;
        for queue in &topology.queues {
            state.queues.entry(queue.clone()).or_default();
        }
        if let Some(fanout) = &topology.fanout {
            let bound = state.exchanges.entry(fanout.name.clone()).or_default();
            for queue in &fanout.bound_queues {
                if !bound.contains(queue) {
                    bound.push(queue.clone());
                }
            }
        }
        Ok(())
    }

    async fn fetch_one(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let Some((body, redelivered)) = state.queues.get_mut(queue).and_then(VecDeque::pop_front)
        else {
            return Ok(None);
        };

        state.next_tag += 1;
        let tag = state.next_tag;
        state.unacked.insert(tag, (queue.to_string(), body.clone()));
        Ok(Some(Delivery {
            tag,
            queue: queue.to_string(),
            body,
            redelivered,
        }))
    }

    async fn acknowledge(&self, delivery: Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.unacked.remove(&delivery.tag).is_none() {
            return Err(EtlError::transport(format!(
                "unknown delivery tag {} on '{}'",
                delivery.tag, delivery.queue
            )));
        }
        state.acks += 1;
        Ok(())
    }

    async fn publish(&self, target: &PublishTarget, body: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_publishes {
            return Err(EtlError::transport(format!("publish to {} was not confirmed", target)));
        }

        let queues = match target {
            PublishTarget::Queue(name) => vec![name.clone()],
            PublishTarget::Exchange(name) => state
                .exchanges
                .get(name)
                .cloned()
                .ok_or_else(|| EtlError::transport(format!("no exchange '{}'", name)))?,
        };
        for queue in queues {
            state
                .queues
                .entry(queue)
                .or_default()
                .push_back((body.to_vec(), false));
        }
        state.publishes += 1;
        Ok(())
    }
}

/// A server-side rejection carrying a Postgres SQLSTATE code.
#[derive(Debug, thiserror::Error)]
#[error("{message} (SQLSTATE {code})")]
pub struct StoreRejection {
    code: String,
    message: String,
}

impl StoreRejection {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl DatabaseError for StoreRejection {
    fn message(&self) -> &str {
        &self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code.as_str()))
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        match self.code.as_str() {
            "23505" => ErrorKind::UniqueViolation,
            "23503" => ErrorKind::ForeignKeyViolation,
            "23502" => ErrorKind::NotNullViolation,
            "23514" => ErrorKind::CheckViolation,
            _ => ErrorKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
enum InsertFailure {
    Unavailable,
    Rejected(String),
}

/// Row store that records every inserted batch.
#[derive(Debug, Default)]
pub struct InMemoryRowStore {
    inserts: Mutex<Vec<(String, RecordBatch)>>,
    failure: Mutex<Option<InsertFailure>>,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn inserts(&self) -> Vec<(String, RecordBatch)> {
        self.inserts.lock().await.clone()
    }

    pub async fn rows_in(&self, table: &str) -> usize {
        self.inserts
            .lock()
            .await
            .iter()
            .filter(|(name, _)| name == table)
            .map(|(_, batch)| batch.len())
            .sum()
    }

    /// Simulates the database being unreachable.
    pub async fn fail_inserts(&self, fail: bool) {
        *self.failure.lock().await = fail.then_some(InsertFailure::Unavailable);
    }

    /// Simulates the database refusing the rows with `sqlstate`.
    pub async fn reject_inserts(&self, sqlstate: &str) {
        *self.failure.lock().await = Some(InsertFailure::Rejected(sqlstate.to_string()));
    }
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn bulk_insert(&self, table: &str, batch: &RecordBatch) -> Result<u64> {
        match self.failure.lock().await.clone() {
            Some(InsertFailure::Unavailable) => {
                return Err(EtlError::Store(sqlx::Error::PoolTimedOut));
            }
            Some(InsertFailure::Rejected(code)) => {
                return Err(EtlError::Store(sqlx::Error::Database(Box::new(
                    StoreRejection::new(code, format!("insert into '{}' rejected", table)),
                ))));
            }
            None => {}
        }
        if batch.is_empty() {
            return Ok(0);
        }

        self.inserts
            .lock()
            .await
            .push((table.to_string(), batch.clone()));
        Ok(batch.len() as u64)
    }
}
