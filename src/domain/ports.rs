use crate::domain::model::{Delivery, PublishTarget, RecordBatch, Topology};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
}

/// Stage-agnostic broker primitives shared by every driver.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Declares durable queues, the fanout exchange and its bindings.
    /// Safe to call on every invocation.
    async fn ensure_topology(&self, topology: &Topology) -> Result<()>;

    /// Non-blocking single pull; `None` when no message is ready.
    async fn fetch_one(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Must run only after every side effect of handling `delivery` is done.
    async fn acknowledge(&self, delivery: Delivery) -> Result<()>;

    /// Publishes a persistent message and waits for the broker to take it.
    async fn publish(&self, target: &PublishTarget, body: &[u8]) -> Result<()>;
}

/// External relational store loader.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Inserts every row of `batch` atomically; returns the number of rows written.
    async fn bulk_insert(&self, table: &str, batch: &RecordBatch) -> Result<u64>;
}
